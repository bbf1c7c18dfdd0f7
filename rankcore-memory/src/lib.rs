//! In-memory collaborators for the `RankCore` ranking engine
//!
//! This crate provides in-process implementations of every collaborator
//! trait from the rankcore crate, useful for testing and development
//! scenarios where persistence is not required. Each handle is cheap to
//! clone and clones share state.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::significant_drop_tightening)]

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use rankcore::errors::{Operation, StoreError, StoreResult};
use rankcore::leaderboard::{rank_order, LeaderboardEntry, RankRange};
use rankcore::model::{Item, UserItemInteraction, UserPreference};
use rankcore::store::{AggregateStore, CategoryCatalog, EventPublisher, Leaderboard, PreferenceCache};
use rankcore::types::{Category, ItemId, UserId};
use rankcore::{Collaborators, EventMessage};
use tokio::time::Instant;
use tracing::trace;

#[derive(Debug, Default)]
struct AggregateState {
    items: HashMap<ItemId, Item>,
    // Keyed by user so a history read does not scan every record.
    interactions: HashMap<UserId, HashMap<ItemId, UserItemInteraction>>,
    preferences: HashMap<UserId, UserPreference>,
}

/// Thread-safe in-memory aggregate store.
///
/// Counts how often each [`Operation`] was invoked so tests can assert which
/// collaborator calls an engine operation made.
#[derive(Debug, Clone, Default)]
pub struct InMemoryAggregateStore {
    state: Arc<RwLock<AggregateState>>,
    calls: Arc<Mutex<HashMap<Operation, u64>>>,
}

impl InMemoryAggregateStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times `operation` has been invoked on this store.
    pub fn calls(&self, operation: Operation) -> u64 {
        self.calls.lock().get(&operation).copied().unwrap_or(0)
    }

    /// Number of items currently stored.
    pub fn item_count(&self) -> usize {
        self.state.read().items.len()
    }

    fn record(&self, operation: Operation) {
        *self.calls.lock().entry(operation).or_insert(0) += 1;
    }
}

#[async_trait]
impl AggregateStore for InMemoryAggregateStore {
    async fn create_item(&self, item: &Item) -> StoreResult<()> {
        self.record(Operation::CreateItem);
        let mut state = self.state.write();

        if state.items.contains_key(&item.id) {
            return Err(StoreError::Conflict {
                operation: Operation::CreateItem,
                detail: format!("item {} already exists", item.id),
            });
        }

        state.items.insert(item.id, item.clone());
        trace!(item = %item.id, "[memory.item_created] item stored");
        Ok(())
    }

    async fn update_item(&self, item: &Item) -> StoreResult<()> {
        self.record(Operation::UpdateItem);
        let mut state = self.state.write();

        match state.items.get_mut(&item.id) {
            Some(stored) => {
                *stored = item.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound {
                operation: Operation::UpdateItem,
            }),
        }
    }

    async fn get_item(&self, id: ItemId) -> StoreResult<Item> {
        self.record(Operation::GetItem);
        self.state
            .read()
            .items
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound {
                operation: Operation::GetItem,
            })
    }

    async fn get_user_interactions(&self, user: &UserId) -> StoreResult<Vec<UserItemInteraction>> {
        self.record(Operation::GetUserInteractions);
        Ok(self
            .state
            .read()
            .interactions
            .get(user)
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn get_user_preference(&self, user: &UserId) -> StoreResult<Option<UserPreference>> {
        self.record(Operation::GetUserPreference);
        Ok(self.state.read().preferences.get(user).cloned())
    }

    async fn upsert_user_interaction(&self, increment: &UserItemInteraction) -> StoreResult<()> {
        self.record(Operation::UpsertUserInteraction);
        let mut state = self.state.write();

        state
            .interactions
            .entry(increment.user_id.clone())
            .or_default()
            .entry(increment.item_id)
            .and_modify(|record| record.accumulate(increment))
            .or_insert_with(|| increment.clone());
        Ok(())
    }

    async fn upsert_user_preference(&self, preference: &UserPreference) -> StoreResult<()> {
        self.record(Operation::UpsertUserPreference);
        self.state
            .write()
            .preferences
            .insert(preference.user_id.clone(), preference.clone());
        Ok(())
    }
}

/// Sort key whose order is the leaderboard's rank order.
#[derive(Debug, Clone, Copy)]
struct RankKey {
    score: f64,
    id: ItemId,
}

impl Ord for RankKey {
    fn cmp(&self, other: &Self) -> Ordering {
        rank_order((self.score, self.id), (other.score, other.id))
    }
}

impl PartialOrd for RankKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for RankKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for RankKey {}

#[derive(Debug, Default)]
struct LeaderboardState {
    ordered: BTreeSet<RankKey>,
    scores: HashMap<ItemId, f64>,
}

/// Thread-safe in-memory leaderboard.
///
/// Entries are kept in rank order, so a range query walks `start + k`
/// entries.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLeaderboard {
    state: Arc<Mutex<LeaderboardState>>,
}

impl InMemoryLeaderboard {
    /// Create a new empty leaderboard
    pub fn new() -> Self {
        Self::default()
    }

    /// Current score of `id`, if it has one.
    pub fn score_of(&self, id: ItemId) -> Option<f64> {
        self.state.lock().scores.get(&id).copied()
    }

    /// Number of ranked items.
    pub fn len(&self) -> usize {
        self.state.lock().scores.len()
    }

    /// True if no item has been ranked yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Leaderboard for InMemoryLeaderboard {
    async fn upsert(&self, id: ItemId, score: f64) -> StoreResult<()> {
        let mut state = self.state.lock();

        if let Some(previous) = state.scores.insert(id, score) {
            state.ordered.remove(&RankKey {
                score: previous,
                id,
            });
        }
        state.ordered.insert(RankKey { score, id });

        trace!(item = %id, score, "[memory.leaderboard_upsert] score replaced");
        Ok(())
    }

    async fn range_desc(&self, range: RankRange) -> StoreResult<Vec<LeaderboardEntry>> {
        let state = self.state.lock();

        let Some(bounds) = range.bounds(state.ordered.len()) else {
            return Ok(Vec::new());
        };

        Ok(state
            .ordered
            .iter()
            .skip(bounds.start)
            .take(bounds.len())
            .map(|key| LeaderboardEntry::new(key.id, key.score))
            .collect())
    }
}

#[derive(Debug, Clone)]
struct CachedPreference {
    preference: UserPreference,
    expires_at: Instant,
}

/// Thread-safe in-memory preference cache with per-entry expiry.
///
/// Expiry follows the tokio clock, so tests running with paused time can
/// advance past a TTL without sleeping.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPreferenceCache {
    entries: Arc<Mutex<HashMap<UserId, CachedPreference>>>,
}

impl InMemoryPreferenceCache {
    /// Create a new empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// True if an unexpired entry exists for `user`.
    pub fn contains(&self, user: &UserId) -> bool {
        self.entries
            .lock()
            .get(user)
            .is_some_and(|entry| entry.expires_at > Instant::now())
    }
}

#[async_trait]
impl PreferenceCache for InMemoryPreferenceCache {
    async fn get(&self, user: &UserId) -> StoreResult<Option<UserPreference>> {
        let mut entries = self.entries.lock();

        match entries.get(user) {
            Some(entry) if entry.expires_at > Instant::now() => Ok(Some(entry.preference.clone())),
            Some(_) => {
                entries.remove(user);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(
        &self,
        user: &UserId,
        preference: &UserPreference,
        ttl: Duration,
    ) -> StoreResult<()> {
        self.entries.lock().insert(
            user.clone(),
            CachedPreference {
                preference: preference.clone(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, user: &UserId) -> StoreResult<()> {
        self.entries.lock().remove(user);
        Ok(())
    }
}

/// In-memory category catalog. Categories are assigned with
/// [`InMemoryCategoryCatalog::assign`].
#[derive(Debug, Clone, Default)]
pub struct InMemoryCategoryCatalog {
    categories: Arc<RwLock<HashMap<ItemId, BTreeSet<Category>>>>,
}

impl InMemoryCategoryCatalog {
    /// Create a new empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the categories of `id`.
    pub fn assign(&self, id: ItemId, categories: impl IntoIterator<Item = Category>) {
        self.categories
            .write()
            .insert(id, categories.into_iter().collect());
    }
}

#[async_trait]
impl CategoryCatalog for InMemoryCategoryCatalog {
    async fn categories_for(
        &self,
        ids: &[ItemId],
    ) -> StoreResult<HashMap<ItemId, BTreeSet<Category>>> {
        let categories = self.categories.read();
        Ok(ids
            .iter()
            .filter_map(|id| categories.get(id).map(|set| (*id, set.clone())))
            .collect())
    }
}

/// In-memory event bus recording published messages in publish order.
///
/// A test publishes through the engine, then feeds [`drain`](Self::drain)
/// to the consumer loop.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventBus {
    messages: Arc<Mutex<Vec<EventMessage>>>,
}

impl InMemoryEventBus {
    /// Create a new empty bus
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages published so far, oldest first.
    pub fn published(&self) -> Vec<EventMessage> {
        self.messages.lock().clone()
    }

    /// Takes every pending message, oldest first, leaving the bus empty.
    pub fn drain(&self) -> Vec<EventMessage> {
        std::mem::take(&mut *self.messages.lock())
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventBus {
    async fn publish(&self, message: EventMessage) -> StoreResult<()> {
        trace!(
            key = message.key.as_deref().unwrap_or_default(),
            bytes = message.payload.len(),
            "[memory.event_published] message queued"
        );
        self.messages.lock().push(message);
        Ok(())
    }
}

/// A full set of in-memory collaborators sharing nothing with any other set.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    /// Aggregate store handle.
    pub store: InMemoryAggregateStore,
    /// Leaderboard handle.
    pub leaderboard: InMemoryLeaderboard,
    /// Preference cache handle.
    pub cache: InMemoryPreferenceCache,
    /// Category catalog handle.
    pub catalog: InMemoryCategoryCatalog,
    /// Event bus handle.
    pub bus: InMemoryEventBus,
}

impl InMemoryBackend {
    /// Create a fresh, empty backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Collaborator handles for building a
    /// [`RankingEngine`](rankcore::RankingEngine). The handles share state
    /// with this backend.
    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            store: Arc::new(self.store.clone()),
            leaderboard: Arc::new(self.leaderboard.clone()),
            cache: Arc::new(self.cache.clone()),
            catalog: Arc::new(self.catalog.clone()),
            publisher: Arc::new(self.bus.clone()),
        }
    }
}
