//! Read-through cache policy for user preferences.
//!
//! Reads try the cache first, fall back to the aggregate store and populate
//! the cache on the way out. Writes go to the aggregate store first and then
//! invalidate (never refresh) the cached copy, so the next read repopulates
//! it from the authoritative record.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::deadline::Deadline;
use crate::errors::{Operation, RankingResult};
use crate::model::UserPreference;
use crate::outcome::{PreferenceUpdate, SideEffect};
use crate::store::{AggregateStore, PreferenceCache};
use crate::types::{Category, UserId};

/// Where a resolved preference came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreferenceSource {
    /// Served from the cache; the aggregate store was not read.
    Cache,
    /// Loaded from the aggregate store (or synthesized because absent).
    Store,
    /// The aggregate store failed; an empty default was used and not cached.
    Fallback,
}

/// A preference record plus its provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPreference {
    /// The preference record to rank with.
    pub preference: UserPreference,
    /// Where it came from.
    pub source: PreferenceSource,
    /// Outcome of writing the record back into the cache. `None` when no
    /// write was attempted (a cache hit or a store fallback).
    pub cache_population: Option<SideEffect>,
}

/// Resolves and updates user preferences against the store and the cache.
#[derive(Clone)]
pub struct PreferenceResolver {
    store: Arc<dyn AggregateStore>,
    cache: Arc<dyn PreferenceCache>,
    ttl: Duration,
}

impl std::fmt::Debug for PreferenceResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreferenceResolver")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl PreferenceResolver {
    /// Builds a resolver caching records for `ttl`.
    pub fn new(
        store: Arc<dyn AggregateStore>,
        cache: Arc<dyn PreferenceCache>,
        ttl: Duration,
    ) -> Self {
        Self { store, cache, ttl }
    }

    /// Resolves the preference of `user`. Never fails: every collaborator
    /// failure degrades to the empty default.
    #[instrument(name = "preferences.resolve", skip(self, deadline), fields(user = %user))]
    pub async fn resolve(&self, user: &UserId, deadline: &Deadline) -> ResolvedPreference {
        match deadline.run(Operation::CacheGet, self.cache.get(user)).await {
            Ok(Some(preference)) => {
                debug!("[preferences.cache_hit] serving cached preferences");
                return ResolvedPreference {
                    preference,
                    source: PreferenceSource::Cache,
                    cache_population: None,
                };
            }
            Ok(None) => debug!("[preferences.cache_miss] loading preferences from store"),
            Err(error) => warn!(
                error = %error,
                "[preferences.cache_degraded] cache read failed, treating as miss"
            ),
        }

        let loaded = deadline
            .run(Operation::GetUserPreference, self.store.get_user_preference(user))
            .await;
        let preference = match loaded {
            Ok(Some(preference)) => preference,
            Ok(None) => UserPreference::empty(user.clone()),
            Err(error) => {
                warn!(
                    error = %error,
                    "[preferences.store_degraded] preference load failed, using empty default"
                );
                return ResolvedPreference {
                    preference: UserPreference::empty(user.clone()),
                    source: PreferenceSource::Fallback,
                    cache_population: None,
                };
            }
        };

        let populated = SideEffect::attempt(
            deadline,
            Operation::CacheSet,
            self.cache.set(user, &preference, self.ttl),
        )
        .await;

        ResolvedPreference {
            preference,
            source: PreferenceSource::Store,
            cache_population: Some(populated),
        }
    }

    /// Replaces the categories of `user`.
    ///
    /// The store write is authoritative and its failure is returned. The
    /// cache invalidation that follows is best-effort.
    #[instrument(name = "preferences.update", skip(self, categories, deadline), fields(user = %user))]
    pub async fn update(
        &self,
        user: UserId,
        categories: impl IntoIterator<Item = Category> + Send,
        deadline: &Deadline,
    ) -> RankingResult<PreferenceUpdate> {
        let preference = UserPreference::new(user, categories);

        deadline
            .run(
                Operation::UpsertUserPreference,
                self.store.upsert_user_preference(&preference),
            )
            .await?;

        let cache_invalidation = SideEffect::attempt(
            deadline,
            Operation::CacheDelete,
            self.cache.delete(&preference.user_id),
        )
        .await;

        debug!(
            categories = preference.categories.len(),
            "[preferences.updated] preference record written"
        );

        Ok(PreferenceUpdate {
            preference,
            cache_invalidation,
        })
    }
}
