//! Results of best-effort side effects.
//!
//! Leaderboard upserts, interaction-history upserts and preference-cache
//! writes are allowed to fail without failing the operation that caused
//! them. They report a [`SideEffect`] rather than a `Result`, so a failure
//! cannot be propagated with `?` by accident.

use std::future::Future;

use tracing::warn;

use crate::deadline::Deadline;
use crate::errors::{Operation, StoreError, StoreResult};
use crate::model::{Item, UserPreference};

/// Outcome of one best-effort write.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub enum SideEffect {
    /// The collaborator accepted the write.
    Applied,
    /// The write failed or timed out and was logged.
    Degraded(StoreError),
}

impl SideEffect {
    /// Runs a best-effort collaborator call under `deadline`, logging any
    /// failure at `warn`.
    pub async fn attempt<F>(deadline: &Deadline, operation: Operation, call: F) -> Self
    where
        F: Future<Output = StoreResult<()>>,
    {
        match deadline.run(operation, call).await {
            Ok(()) => Self::Applied,
            Err(error) => {
                warn!(
                    operation = %operation,
                    error = %error,
                    "[side_effect.degraded] best-effort write failed"
                );
                Self::Degraded(error)
            }
        }
    }

    /// True if the write did not happen.
    pub const fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded(_))
    }
}

/// Successful result of applying one event.
#[derive(Debug, Clone, PartialEq)]
pub struct EventOutcome {
    /// The item aggregate as persisted.
    pub item: Item,
    /// Whether the leaderboard saw the new score.
    pub leaderboard: SideEffect,
    /// Whether the interaction history saw the increment.
    pub interaction: SideEffect,
}

/// Successful result of writing an item (create or update).
#[derive(Debug, Clone, PartialEq)]
pub struct ItemWrite {
    /// The item aggregate as persisted.
    pub item: Item,
    /// Whether the leaderboard saw the item's score.
    pub leaderboard: SideEffect,
}

/// Successful result of a preference update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreferenceUpdate {
    /// The preference record as persisted.
    pub preference: UserPreference,
    /// Whether the cached copy was invalidated.
    pub cache_invalidation: SideEffect,
}
