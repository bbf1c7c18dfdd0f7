//! Applies interaction events to item aggregates.
//!
//! One event is a read-modify-write of the whole item aggregate followed by
//! two best-effort side effects:
//!
//! 1. read the item (`NotFound` aborts, nothing changes)
//! 2. apply the action's weight and counter increment in memory
//! 3. write the item back (authoritative; failure aborts)
//! 4. upsert `(id, score)` into the leaderboard (best-effort)
//! 5. fold the single-event increment into the user's interaction record
//!    (best-effort)
//!
//! There is no version token between steps 1 and 3. Two concurrent events
//! for the same item race and the later write replaces the earlier one, so
//! callers needing per-item ordering must partition delivery by item id.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, instrument};

use crate::deadline::Deadline;
use crate::errors::{Operation, RankingError, RankingResult, StoreError};
use crate::event::InteractionEvent;
use crate::model::Item;
use crate::outcome::{EventOutcome, SideEffect};
use crate::store::{AggregateStore, Leaderboard};
use crate::types::ItemId;

/// Applies events to the aggregate store and its derived projections.
#[derive(Clone)]
pub struct EventProcessor {
    store: Arc<dyn AggregateStore>,
    leaderboard: Arc<dyn Leaderboard>,
}

impl std::fmt::Debug for EventProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventProcessor").finish_non_exhaustive()
    }
}

impl EventProcessor {
    /// Builds a processor writing to `store` and `leaderboard`.
    pub fn new(store: Arc<dyn AggregateStore>, leaderboard: Arc<dyn Leaderboard>) -> Self {
        Self { store, leaderboard }
    }

    /// Applies one event.
    ///
    /// Not idempotent: applying the same event twice counts it twice.
    #[instrument(
        name = "processor.apply",
        skip(self, event, deadline),
        fields(item = %event.item_id, user = %event.user_id, action = %event.action)
    )]
    pub async fn apply(
        &self,
        event: &InteractionEvent,
        deadline: &Deadline,
    ) -> RankingResult<EventOutcome> {
        let mut item = self.load(event.item_id, deadline).await?;

        event.action.apply_to(&mut item);
        item.updated_at = Utc::now();

        if let Err(store_error) = deadline
            .run(Operation::UpdateItem, self.store.update_item(&item))
            .await
        {
            error!(
                error = %store_error,
                "[processor.persist_failed] aggregate write failed"
            );
            return Err(not_found_or_upstream(event.item_id, store_error));
        }

        let leaderboard = self.publish_score(&item, deadline).await;

        let increment =
            event
                .action
                .interaction_increment(event.user_id.clone(), event.item_id, item.updated_at);
        let interaction = SideEffect::attempt(
            deadline,
            Operation::UpsertUserInteraction,
            self.store.upsert_user_interaction(&increment),
        )
        .await;

        info!(
            score = item.score,
            "[processor.applied] event applied to item aggregate"
        );

        Ok(EventOutcome {
            item,
            leaderboard,
            interaction,
        })
    }

    /// Reads an item aggregate, mapping a missing record to
    /// [`RankingError::NotFound`].
    pub async fn load(&self, id: ItemId, deadline: &Deadline) -> RankingResult<Item> {
        deadline
            .run(Operation::GetItem, self.store.get_item(id))
            .await
            .map_err(|store_error| not_found_or_upstream(id, store_error))
    }

    /// Best-effort projection of the item's score into the leaderboard.
    pub async fn publish_score(&self, item: &Item, deadline: &Deadline) -> SideEffect {
        SideEffect::attempt(
            deadline,
            Operation::LeaderboardUpsert,
            self.leaderboard.upsert(item.id, item.score),
        )
        .await
    }
}

pub(crate) fn not_found_or_upstream(id: ItemId, store_error: StoreError) -> RankingError {
    match store_error {
        StoreError::NotFound { .. } => RankingError::NotFound(id),
        other => RankingError::UpstreamUnavailable(other),
    }
}
