//! Collaborator contracts consumed by the engine.
//!
//! The engine never reaches for a process-wide client. Each collaborator is
//! handed to [`RankingEngine`](crate::engine::RankingEngine) as an
//! `Arc<dyn …>` at construction. Implementations provide atomic single-key
//! reads and writes; the engine adds no locking on top.
//!
//! Implementations include:
//! - `rankcore-memory`: in-process implementations of every trait, including
//!   an [`EventPublisher`] that records messages for a later consumer run
//! - `rankcore-postgres`: [`AggregateStore`] and [`CategoryCatalog`] on PostgreSQL
//! - `rankcore-redis`: [`Leaderboard`] and [`PreferenceCache`] on Redis

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use async_trait::async_trait;

use crate::consumer::EventMessage;
use crate::errors::StoreResult;
use crate::leaderboard::{LeaderboardEntry, RankRange};
use crate::model::{Item, UserItemInteraction, UserPreference};
use crate::types::{Category, ItemId, UserId};

/// Authoritative store of item aggregates and per-user records.
#[async_trait]
pub trait AggregateStore: Send + Sync {
    /// Inserts a new item. Fails with `Conflict` if the id is taken.
    async fn create_item(&self, item: &Item) -> StoreResult<()>;

    /// Overwrites an existing item. Fails with `NotFound` if absent.
    ///
    /// There is no version check: a concurrent writer's update is silently
    /// replaced.
    async fn update_item(&self, item: &Item) -> StoreResult<()>;

    /// Reads one item. Fails with `NotFound` if absent.
    async fn get_item(&self, id: ItemId) -> StoreResult<Item>;

    /// Every interaction record of `user`, in no particular order.
    async fn get_user_interactions(&self, user: &UserId) -> StoreResult<Vec<UserItemInteraction>>;

    /// The user's preference record, `None` if never written.
    async fn get_user_preference(&self, user: &UserId) -> StoreResult<Option<UserPreference>>;

    /// Creates the (user, item) record from `increment`, or folds the
    /// increment into the existing one (see [`UserItemInteraction::accumulate`]).
    async fn upsert_user_interaction(&self, increment: &UserItemInteraction) -> StoreResult<()>;

    /// Creates or replaces the user's preference record.
    async fn upsert_user_preference(&self, preference: &UserPreference) -> StoreResult<()>;
}

/// Ordered score index supporting rank-range queries.
///
/// Holds only `(id, score)`; may lag behind the aggregate store.
#[async_trait]
pub trait Leaderboard: Send + Sync {
    /// Sets the score of `id`, replacing any previous value.
    async fn upsert(&self, id: ItemId, score: f64) -> StoreResult<()>;

    /// Entries at ranks `range`, ordered by [`rank_order`](crate::leaderboard::rank_order).
    async fn range_desc(&self, range: RankRange) -> StoreResult<Vec<LeaderboardEntry>>;
}

/// Time-bounded cache of preference records.
#[async_trait]
pub trait PreferenceCache: Send + Sync {
    /// The cached record, `None` on a miss or after expiry.
    async fn get(&self, user: &UserId) -> StoreResult<Option<UserPreference>>;

    /// Caches `preference` for `ttl`.
    async fn set(&self, user: &UserId, preference: &UserPreference, ttl: Duration)
        -> StoreResult<()>;

    /// Drops the cached record. Deleting a missing entry succeeds.
    async fn delete(&self, user: &UserId) -> StoreResult<()>;
}

/// Source of item categories. Categories are assigned externally.
#[async_trait]
pub trait CategoryCatalog: Send + Sync {
    /// Categories of each requested item. Items without categories may be
    /// omitted from the map.
    async fn categories_for(
        &self,
        ids: &[ItemId],
    ) -> StoreResult<HashMap<ItemId, BTreeSet<Category>>>;
}

/// Write side of the event bus.
///
/// Messages are keyed by item id. A bus that partitions by key keeps the
/// events of one item in order, which is the only ordering the processor
/// relies on.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Hands `message` to the bus. Delivery is at-least-once.
    async fn publish(&self, message: EventMessage) -> StoreResult<()>;
}
