//! The ranking engine facade.
//!
//! [`RankingEngine`] wires the collaborators together and exposes the
//! operations a transport layer calls: item writes, event publishing and
//! application, global top-N and personalized top-N queries, and preference
//! updates.
//!
//! Reads take no snapshot across steps. A personalized query reads the
//! preference, the interaction history, the leaderboard and the item
//! aggregates one after another, and may observe writes that land between
//! those calls.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use tracing::{debug, error, instrument, warn};

use crate::config::RankingConfig;
use crate::consumer::EventMessage;
use crate::deadline::Deadline;
use crate::errors::{Operation, RankingError, RankingResult};
use crate::event::{EventEnvelope, InteractionEvent};
use crate::leaderboard::{LeaderboardEntry, RankRange};
use crate::model::Item;
use crate::outcome::{EventOutcome, ItemWrite, PreferenceUpdate};
use crate::personalization::{index_interactions, UserContext};
use crate::preferences::{PreferenceResolver, ResolvedPreference};
use crate::processor::{not_found_or_upstream, EventProcessor};
use crate::store::{AggregateStore, CategoryCatalog, EventPublisher, Leaderboard, PreferenceCache};
use crate::types::{Category, ItemId, UserId};

/// Collaborator handles injected into a [`RankingEngine`].
#[derive(Clone)]
pub struct Collaborators {
    /// Authoritative item and user records.
    pub store: Arc<dyn AggregateStore>,
    /// Derived `(id, score)` ranking.
    pub leaderboard: Arc<dyn Leaderboard>,
    /// Preference read-through cache.
    pub cache: Arc<dyn PreferenceCache>,
    /// External item categories.
    pub catalog: Arc<dyn CategoryCatalog>,
    /// Write side of the event bus.
    pub publisher: Arc<dyn EventPublisher>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

/// Event-driven popularity ranking with per-user personalization.
#[derive(Clone)]
pub struct RankingEngine {
    store: Arc<dyn AggregateStore>,
    leaderboard: Arc<dyn Leaderboard>,
    catalog: Arc<dyn CategoryCatalog>,
    publisher: Arc<dyn EventPublisher>,
    processor: EventProcessor,
    preferences: PreferenceResolver,
    config: RankingConfig,
}

impl std::fmt::Debug for RankingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RankingEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RankingEngine {
    /// Builds an engine over `collaborators`.
    pub fn new(collaborators: Collaborators, config: RankingConfig) -> Self {
        let Collaborators {
            store,
            leaderboard,
            cache,
            catalog,
            publisher,
        } = collaborators;

        Self {
            processor: EventProcessor::new(Arc::clone(&store), Arc::clone(&leaderboard)),
            preferences: PreferenceResolver::new(
                Arc::clone(&store),
                cache,
                config.preference_ttl.as_duration(),
            ),
            store,
            leaderboard,
            catalog,
            publisher,
            config,
        }
    }

    /// The engine's tunables.
    pub const fn config(&self) -> &RankingConfig {
        &self.config
    }

    /// A deadline using the configured request budget.
    pub fn default_deadline(&self) -> Deadline {
        Deadline::after(self.config.request_timeout.as_duration())
    }

    /// Creates an item with zero score and counters.
    #[instrument(name = "engine.create_item", skip_all)]
    pub async fn create_item(
        &self,
        title: impl Into<String> + Send,
        payload: impl Into<String> + Send,
        deadline: Deadline,
    ) -> RankingResult<ItemWrite> {
        let item = Item::new(ItemId::generate(), title, payload);

        deadline
            .run(Operation::CreateItem, self.store.create_item(&item))
            .await?;

        let leaderboard = self.processor.publish_score(&item, &deadline).await;
        debug!(item = %item.id, "[engine.item_created] item created");

        Ok(ItemWrite { item, leaderboard })
    }

    /// Changes an item's title and payload. Score and counters are kept.
    #[instrument(name = "engine.update_item", skip(self, title, payload, deadline))]
    pub async fn update_item(
        &self,
        id: ItemId,
        title: impl Into<String> + Send,
        payload: impl Into<String> + Send,
        deadline: Deadline,
    ) -> RankingResult<ItemWrite> {
        let mut item = self.processor.load(id, &deadline).await?;
        item.title = title.into();
        item.payload = payload.into();
        item.updated_at = Utc::now();

        deadline
            .run(Operation::UpdateItem, self.store.update_item(&item))
            .await
            .map_err(|store_error| not_found_or_upstream(id, store_error))?;

        let leaderboard = self.processor.publish_score(&item, &deadline).await;

        Ok(ItemWrite { item, leaderboard })
    }

    /// Reads one item aggregate.
    pub async fn get_item(&self, id: ItemId, deadline: Deadline) -> RankingResult<Item> {
        self.processor.load(id, &deadline).await
    }

    /// Applies a validated event.
    pub async fn apply_event(
        &self,
        event: &InteractionEvent,
        deadline: Deadline,
    ) -> RankingResult<EventOutcome> {
        self.processor.apply(event, &deadline).await
    }

    /// Publishes an event for asynchronous application by a consumer.
    ///
    /// The message is keyed by item id. Publishing is the whole operation, so
    /// a bus failure is returned to the caller.
    #[instrument(
        name = "engine.publish_event",
        skip(self, event, deadline),
        fields(item = %event.item_id, action = %event.action)
    )]
    pub async fn publish_event(
        &self,
        event: &InteractionEvent,
        deadline: Deadline,
    ) -> RankingResult<()> {
        let message = EventMessage::from_event(event)?;

        deadline
            .run(Operation::PublishEvent, self.publisher.publish(message))
            .await
            .map_err(|store_error| {
                error!(error = %store_error, "[engine.publish_failed] event not published");
                RankingError::UpstreamUnavailable(store_error)
            })?;

        debug!("[engine.event_published] event handed to the bus");
        Ok(())
    }

    /// Validates a wire envelope and applies it.
    ///
    /// A malformed envelope fails before any collaborator is called.
    pub async fn apply_envelope(
        &self,
        envelope: EventEnvelope,
        deadline: Deadline,
    ) -> RankingResult<EventOutcome> {
        let event = InteractionEvent::try_from(envelope)?;
        self.processor.apply(&event, &deadline).await
    }

    /// Global ranking, hydrated from the aggregate store.
    ///
    /// Entries whose aggregate cannot be read are skipped.
    #[instrument(name = "engine.top_items", skip(self, deadline))]
    pub async fn top_items(&self, range: RankRange, deadline: Deadline) -> RankingResult<Vec<Item>> {
        let entries = deadline
            .run(Operation::LeaderboardRange, self.leaderboard.range_desc(range))
            .await
            .map_err(|store_error| {
                error!(error = %store_error, "[engine.leaderboard_failed] range query failed");
                RankingError::UpstreamUnavailable(store_error)
            })?;

        Ok(self.hydrate(entries, &deadline).await)
    }

    /// Ranking personalized for `user`.
    ///
    /// Personalization runs over the configured candidate window of the
    /// global ranking; `range` then selects ranks of the personalized list.
    #[instrument(name = "engine.top_items_for_user", skip(self, user, deadline), fields(user = %user))]
    pub async fn top_items_for_user(
        &self,
        user: &UserId,
        range: RankRange,
        deadline: Deadline,
    ) -> RankingResult<Vec<Item>> {
        let ResolvedPreference { preference, .. } = self.preferences.resolve(user, &deadline).await;

        let interactions = deadline
            .run(
                Operation::GetUserInteractions,
                self.store.get_user_interactions(user),
            )
            .await?;
        let interactions = index_interactions(interactions);

        let window = RankRange::top(self.config.candidate_window.into());
        let candidates = self.top_items(window, deadline).await?;

        let ids: Vec<ItemId> = candidates.iter().map(|item| item.id).collect();
        let categories = match deadline
            .run(Operation::CategoryLookup, self.catalog.categories_for(&ids))
            .await
        {
            Ok(categories) => categories,
            Err(store_error) => {
                warn!(
                    error = %store_error,
                    "[engine.categories_degraded] category lookup failed, skipping affinity"
                );
                HashMap::new()
            }
        };

        let context = UserContext {
            interactions: &interactions,
            preference: &preference,
            categories: &categories,
        };
        let ranked = context.personalize(candidates, Utc::now());

        Ok(range.paginate(ranked))
    }

    /// Resolves a user's preference through the cache.
    pub async fn resolve_preference(&self, user: &UserId, deadline: Deadline) -> ResolvedPreference {
        self.preferences.resolve(user, &deadline).await
    }

    /// Replaces a user's preferred categories.
    pub async fn update_user_preference(
        &self,
        user: UserId,
        categories: impl IntoIterator<Item = Category> + Send,
        deadline: Deadline,
    ) -> RankingResult<PreferenceUpdate> {
        self.preferences.update(user, categories, &deadline).await
    }

    async fn hydrate(&self, entries: Vec<LeaderboardEntry>, deadline: &Deadline) -> Vec<Item> {
        let lookups = entries.iter().map(|entry| async move {
            let id = entry.item_id;
            match deadline
                .run(Operation::GetItem, self.store.get_item(id))
                .await
            {
                Ok(item) => Some(item),
                Err(store_error) => {
                    warn!(
                        item = %id,
                        error = %store_error,
                        "[engine.hydrate_skipped] leaderboard entry could not be hydrated"
                    );
                    None
                }
            }
        });

        join_all(lookups).await.into_iter().flatten().collect()
    }
}
