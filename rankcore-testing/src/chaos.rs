//! Failure and latency injection around any collaborator.
//!
//! [`Chaos`] wraps an implementation of any port and, before delegating,
//! sleeps for the configured latency and then fails the call with the
//! configured probability. A fixed seed makes the sequence of injected
//! failures reproducible.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use nutype::nutype;
use parking_lot::Mutex;
use rand::{random, rngs::StdRng, Rng, SeedableRng};
use rankcore::{
    AggregateStore, Category, CategoryCatalog, EventMessage, EventPublisher, Item, ItemId,
    Leaderboard, LeaderboardEntry, Operation, PreferenceCache, RankRange, StoreError, StoreResult,
    UserId, UserItemInteraction, UserPreference,
};
use tracing::debug;

/// Probability value for chaos failure injection rates.
///
/// Probability represents a value in the range [0.0, 1.0] where 0.0 means
/// never inject failures and 1.0 means always inject failures.
#[nutype(
    validate(greater_or_equal = 0.0, less_or_equal = 1.0),
    default = 0.0,
    derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Display, Into)
)]
pub struct Probability(f32);

/// What a [`Chaos`] wrapper injects, and where.
#[derive(Debug, Clone, Default)]
pub struct ChaosConfig {
    deterministic_seed: Option<u64>,
    failure_probability: Probability,
    latency: Duration,
    targets: Option<HashSet<Operation>>,
}

impl ChaosConfig {
    /// Seeded configuration whose injections repeat run after run.
    pub fn deterministic() -> Self {
        Self {
            deterministic_seed: Some(0),
            ..Self::default()
        }
    }

    /// Chance that a targeted call fails with [`StoreError::Unavailable`].
    /// Out-of-range values are clamped.
    #[must_use]
    pub fn with_failure_probability(mut self, probability: f32) -> Self {
        self.failure_probability =
            Probability::try_new(probability.clamp(0.0, 1.0)).unwrap_or_default();
        self
    }

    /// Delay added before every targeted call reaches the wrapped collaborator.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Restricts injection to `operations`. Without this, every call is
    /// targeted.
    #[must_use]
    pub fn only(mut self, operations: impl IntoIterator<Item = Operation>) -> Self {
        self.targets = Some(operations.into_iter().collect());
        self
    }

    fn targets(&self, operation: Operation) -> bool {
        self.targets
            .as_ref()
            .map_or(true, |targets| targets.contains(&operation))
    }
}

/// Wraps any collaborator and injects latency and failures into its calls.
///
/// Implements every collaborator trait its inner value implements.
#[derive(Debug)]
pub struct Chaos<T> {
    inner: T,
    config: ChaosConfig,
    rng: Mutex<StdRng>,
    injected: AtomicU64,
}

impl<T> Chaos<T> {
    /// Wraps `inner` using `config`.
    pub fn new(inner: T, config: ChaosConfig) -> Self {
        let rng = match config.deterministic_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::seed_from_u64(random()),
        };

        Self {
            inner,
            config,
            rng: Mutex::new(rng),
            injected: AtomicU64::new(0),
        }
    }

    /// The wrapped collaborator.
    pub const fn inner(&self) -> &T {
        &self.inner
    }

    /// Number of failures injected so far.
    pub fn injected_failures(&self) -> u64 {
        self.injected.load(Ordering::Relaxed)
    }

    fn should_inject(&self, probability: Probability) -> bool {
        let probability: f32 = probability.into();

        if probability <= 0.0 {
            return false;
        }

        if probability >= 1.0 {
            return true;
        }

        self.rng.lock().random_bool(f64::from(probability))
    }

    async fn gate(&self, operation: Operation) -> StoreResult<()> {
        if !self.config.targets(operation) {
            return Ok(());
        }

        if !self.config.latency.is_zero() {
            tokio::time::sleep(self.config.latency).await;
        }

        if self.should_inject(self.config.failure_probability) {
            self.injected.fetch_add(1, Ordering::Relaxed);
            debug!(operation = %operation, "[chaos.injected] failing collaborator call");
            return Err(StoreError::unavailable(operation, "injected failure"));
        }

        Ok(())
    }
}

/// Adds `.with_chaos(config)` to every collaborator.
pub trait ChaosExt: Sized {
    /// Wraps `self` in a [`Chaos`] layer.
    fn with_chaos(self, config: ChaosConfig) -> Chaos<Self>;
}

impl<T> ChaosExt for T {
    fn with_chaos(self, config: ChaosConfig) -> Chaos<Self> {
        Chaos::new(self, config)
    }
}

#[async_trait]
impl<S> AggregateStore for Chaos<S>
where
    S: AggregateStore,
{
    async fn create_item(&self, item: &Item) -> StoreResult<()> {
        self.gate(Operation::CreateItem).await?;
        self.inner.create_item(item).await
    }

    async fn update_item(&self, item: &Item) -> StoreResult<()> {
        self.gate(Operation::UpdateItem).await?;
        self.inner.update_item(item).await
    }

    async fn get_item(&self, id: ItemId) -> StoreResult<Item> {
        self.gate(Operation::GetItem).await?;
        self.inner.get_item(id).await
    }

    async fn get_user_interactions(&self, user: &UserId) -> StoreResult<Vec<UserItemInteraction>> {
        self.gate(Operation::GetUserInteractions).await?;
        self.inner.get_user_interactions(user).await
    }

    async fn get_user_preference(&self, user: &UserId) -> StoreResult<Option<UserPreference>> {
        self.gate(Operation::GetUserPreference).await?;
        self.inner.get_user_preference(user).await
    }

    async fn upsert_user_interaction(&self, increment: &UserItemInteraction) -> StoreResult<()> {
        self.gate(Operation::UpsertUserInteraction).await?;
        self.inner.upsert_user_interaction(increment).await
    }

    async fn upsert_user_preference(&self, preference: &UserPreference) -> StoreResult<()> {
        self.gate(Operation::UpsertUserPreference).await?;
        self.inner.upsert_user_preference(preference).await
    }
}

#[async_trait]
impl<L> Leaderboard for Chaos<L>
where
    L: Leaderboard,
{
    async fn upsert(&self, id: ItemId, score: f64) -> StoreResult<()> {
        self.gate(Operation::LeaderboardUpsert).await?;
        self.inner.upsert(id, score).await
    }

    async fn range_desc(&self, range: RankRange) -> StoreResult<Vec<LeaderboardEntry>> {
        self.gate(Operation::LeaderboardRange).await?;
        self.inner.range_desc(range).await
    }
}

#[async_trait]
impl<C> PreferenceCache for Chaos<C>
where
    C: PreferenceCache,
{
    async fn get(&self, user: &UserId) -> StoreResult<Option<UserPreference>> {
        self.gate(Operation::CacheGet).await?;
        self.inner.get(user).await
    }

    async fn set(
        &self,
        user: &UserId,
        preference: &UserPreference,
        ttl: Duration,
    ) -> StoreResult<()> {
        self.gate(Operation::CacheSet).await?;
        self.inner.set(user, preference, ttl).await
    }

    async fn delete(&self, user: &UserId) -> StoreResult<()> {
        self.gate(Operation::CacheDelete).await?;
        self.inner.delete(user).await
    }
}

#[async_trait]
impl<C> CategoryCatalog for Chaos<C>
where
    C: CategoryCatalog,
{
    async fn categories_for(
        &self,
        ids: &[ItemId],
    ) -> StoreResult<HashMap<ItemId, BTreeSet<Category>>> {
        self.gate(Operation::CategoryLookup).await?;
        self.inner.categories_for(ids).await
    }
}

#[async_trait]
impl<P> EventPublisher for Chaos<P>
where
    P: EventPublisher,
{
    async fn publish(&self, message: EventMessage) -> StoreResult<()> {
        self.gate(Operation::PublishEvent).await?;
        self.inner.publish(message).await
    }
}
