//! Drains an at-least-once event stream into the engine.
//!
//! The consumer is transport-agnostic: anything that can be turned into a
//! [`Stream`] of [`EventMessage`]s (a bus partition, a channel, a replay file)
//! can drive it. Every message is decoded and applied on its own deadline;
//! failures are logged and counted and the loop moves on. Redelivered
//! messages are applied again.

use futures::{Stream, StreamExt};
use tracing::{debug, error, info, warn};

use crate::engine::RankingEngine;
use crate::errors::{RankingError, RankingResult};
use crate::event::{EventEnvelope, InteractionEvent};

/// One raw message from the event source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventMessage {
    /// Partition key, normally the item id.
    pub key: Option<String>,
    /// JSON-encoded [`EventEnvelope`].
    pub payload: Vec<u8>,
}

impl EventMessage {
    /// Wraps a raw payload.
    pub fn new(key: Option<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            key,
            payload: payload.into(),
        }
    }

    /// Encodes `event` as its wire envelope, keyed by item id.
    pub fn from_event(event: &InteractionEvent) -> RankingResult<Self> {
        let payload = serde_json::to_vec(&EventEnvelope::from(event))
            .map_err(|error| RankingError::InvalidValue(format!("unencodable event: {error}")))?;

        Ok(Self::new(Some(event.item_id.to_string()), payload))
    }
}

/// Counters describing one consumer run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    /// Events applied successfully (possibly with degraded side effects).
    pub applied: u64,
    /// Events dropped as malformed; nothing was mutated.
    pub rejected: u64,
    /// Events whose application failed on an authoritative call.
    pub failed: u64,
    /// Errors reported by the transport itself.
    pub transport_errors: u64,
}

/// Applies every message of `messages` until the stream ends.
pub async fn consume<S, E>(engine: &RankingEngine, messages: S) -> ConsumerStats
where
    S: Stream<Item = Result<EventMessage, E>>,
    E: std::fmt::Display,
{
    let mut stats = ConsumerStats::default();
    futures::pin_mut!(messages);

    while let Some(next) = messages.next().await {
        let message = match next {
            Ok(message) => message,
            Err(transport_error) => {
                warn!(
                    error = %transport_error,
                    "[consumer.transport_error] failed to read message"
                );
                stats.transport_errors += 1;
                continue;
            }
        };

        debug!(
            key = message.key.as_deref().unwrap_or_default(),
            bytes = message.payload.len(),
            "[consumer.received] message received"
        );

        let outcome = match EventEnvelope::from_slice(&message.payload) {
            Ok(envelope) => engine.apply_envelope(envelope, engine.default_deadline()).await,
            Err(decode_error) => Err(decode_error),
        };

        match outcome {
            Ok(_) => stats.applied += 1,
            Err(
                rejected @ (RankingError::InvalidValue(_)
                | RankingError::UnknownAction(_)
                | RankingError::NotFound(_)),
            ) => {
                warn!(error = %rejected, "[consumer.rejected] event dropped");
                stats.rejected += 1;
            }
            Err(failure @ RankingError::UpstreamUnavailable(_)) => {
                error!(error = %failure, "[consumer.failed] event processing failed");
                stats.failed += 1;
            }
        }
    }

    info!(
        applied = stats.applied,
        rejected = stats.rejected,
        failed = stats.failed,
        transport_errors = stats.transport_errors,
        "[consumer.finished] event stream drained"
    );
    stats
}
