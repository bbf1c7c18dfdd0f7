//! Read-through caching of user preferences.

use std::sync::Arc;
use std::time::Duration;

use rankcore::{
    AggregateStore, Collaborators, Operation, PreferenceCache, PreferenceSource, PreferenceTtlSecs,
    RankingConfig, RankingEngine, RankingError, SideEffect, StoreError, UserPreference,
};
use rankcore_memory::InMemoryBackend;
use rankcore_testing::fixtures::{category, deadline, engine_with, in_memory_engine, user};
use rankcore_testing::{ChaosConfig, ChaosExt};
use tracing_test::traced_test;

fn failing(operation: Operation) -> ChaosConfig {
    ChaosConfig::deterministic()
        .with_failure_probability(1.0)
        .only([operation])
}

#[tokio::test]
async fn second_read_is_served_from_cache() {
    // Given: a stored preference record
    let (engine, backend) = in_memory_engine(RankingConfig::default());
    let alice = user("alice");
    backend
        .store
        .upsert_user_preference(&UserPreference::new(alice.clone(), [category("jazz")]))
        .await
        .unwrap();

    // When: the preference is resolved twice
    let first = engine.resolve_preference(&alice, deadline()).await;
    let second = engine.resolve_preference(&alice, deadline()).await;

    // Then: only the first read reached the aggregate store
    assert_eq!(first.source, PreferenceSource::Store);
    assert_eq!(second.source, PreferenceSource::Cache);
    assert_eq!(second.preference, first.preference);
    assert_eq!(first.cache_population, Some(SideEffect::Applied));
    assert_eq!(second.cache_population, None);
    assert_eq!(backend.store.calls(Operation::GetUserPreference), 1);
}

#[tokio::test]
async fn absent_record_is_cached_as_empty_default() {
    let (engine, backend) = in_memory_engine(RankingConfig::default());
    let newcomer = user("newcomer");

    let resolved = engine.resolve_preference(&newcomer, deadline()).await;

    assert_eq!(resolved.source, PreferenceSource::Store);
    assert!(resolved.preference.categories.is_empty());
    assert!(backend.cache.contains(&newcomer));
}

#[tokio::test]
async fn update_invalidates_the_cached_copy() {
    // Given: a cached preference
    let (engine, backend) = in_memory_engine(RankingConfig::default());
    let alice = user("alice");
    engine
        .update_user_preference(alice.clone(), [category("jazz")], deadline())
        .await
        .unwrap();
    engine.resolve_preference(&alice, deadline()).await;
    assert!(backend.cache.contains(&alice));

    // When: the preference is replaced
    let update = engine
        .update_user_preference(alice.clone(), [category("rock")], deadline())
        .await
        .unwrap();

    // Then: the cache entry is gone and the next read sees the new record
    assert!(!update.cache_invalidation.is_degraded());
    assert!(!backend.cache.contains(&alice));
    let resolved = engine.resolve_preference(&alice, deadline()).await;
    assert_eq!(resolved.source, PreferenceSource::Store);
    assert!(resolved.preference.categories.contains(&category("rock")));
    assert!(!resolved.preference.categories.contains(&category("jazz")));
}

#[tokio::test(start_paused = true)]
async fn cached_preference_expires_after_ttl() {
    let config =
        RankingConfig::default().with_preference_ttl(PreferenceTtlSecs::try_new(60).unwrap());
    let (engine, backend) = in_memory_engine(config);
    let alice = user("alice");

    engine.resolve_preference(&alice, deadline()).await;
    tokio::time::advance(Duration::from_secs(61)).await;
    let resolved = engine.resolve_preference(&alice, deadline()).await;

    assert_eq!(resolved.source, PreferenceSource::Store);
    assert_eq!(backend.store.calls(Operation::GetUserPreference), 2);
}

#[tokio::test]
#[traced_test]
async fn store_failure_falls_back_without_caching() {
    // Given: an aggregate store that cannot read preferences
    let backend = InMemoryBackend::new();
    let collaborators = Collaborators {
        store: Arc::new(
            backend
                .store
                .clone()
                .with_chaos(failing(Operation::GetUserPreference)),
        ),
        ..backend.collaborators()
    };
    let engine = engine_with(collaborators);
    let alice = user("alice");

    // When: the preference is resolved
    let resolved = engine.resolve_preference(&alice, deadline()).await;

    // Then: an empty default is used and not cached
    assert_eq!(resolved.source, PreferenceSource::Fallback);
    assert_eq!(resolved.cache_population, None);
    assert!(resolved.preference.categories.is_empty());
    assert!(!backend.cache.contains(&alice));
    assert!(logs_contain("preferences.store_degraded"));
}

#[tokio::test]
#[traced_test]
async fn cache_read_failure_is_treated_as_a_miss() {
    let backend = InMemoryBackend::new();
    let collaborators = Collaborators {
        cache: Arc::new(
            backend
                .cache
                .clone()
                .with_chaos(failing(Operation::CacheGet)),
        ),
        ..backend.collaborators()
    };
    let engine = engine_with(collaborators);
    let alice = user("alice");
    backend
        .store
        .upsert_user_preference(&UserPreference::new(alice.clone(), [category("news")]))
        .await
        .unwrap();

    let resolved = engine.resolve_preference(&alice, deadline()).await;

    assert_eq!(resolved.source, PreferenceSource::Store);
    assert!(resolved.preference.categories.contains(&category("news")));
    assert!(logs_contain("preferences.cache_degraded"));
}

#[tokio::test]
#[traced_test]
async fn failed_cache_population_is_reported_on_the_result() {
    let backend = InMemoryBackend::new();
    let collaborators = Collaborators {
        cache: Arc::new(
            backend
                .cache
                .clone()
                .with_chaos(failing(Operation::CacheSet)),
        ),
        ..backend.collaborators()
    };
    let engine = engine_with(collaborators);
    let alice = user("alice");

    let resolved = engine.resolve_preference(&alice, deadline()).await;

    assert_eq!(resolved.source, PreferenceSource::Store);
    assert!(matches!(
        resolved.cache_population,
        Some(SideEffect::Degraded(StoreError::Unavailable {
            operation: Operation::CacheSet,
            ..
        }))
    ));
    assert!(!backend.cache.contains(&alice));
    assert!(logs_contain("side_effect.degraded"));
}

#[tokio::test]
async fn failed_preference_write_leaves_cache_untouched() {
    // Given: a cached preference and a store that rejects preference writes
    let backend = InMemoryBackend::new();
    let alice = user("alice");
    let healthy = engine_with(backend.collaborators());
    healthy
        .update_user_preference(alice.clone(), [category("jazz")], deadline())
        .await
        .unwrap();
    healthy.resolve_preference(&alice, deadline()).await;

    let collaborators = Collaborators {
        store: Arc::new(
            backend
                .store
                .clone()
                .with_chaos(failing(Operation::UpsertUserPreference)),
        ),
        ..backend.collaborators()
    };
    let engine = RankingEngine::new(collaborators, RankingConfig::default());

    // When: the update is attempted
    let result = engine
        .update_user_preference(alice.clone(), [category("rock")], deadline())
        .await;

    // Then: it fails and the old cached copy survives
    assert!(matches!(
        result,
        Err(RankingError::UpstreamUnavailable(StoreError::Unavailable {
            operation: Operation::UpsertUserPreference,
            ..
        }))
    ));
    let cached = backend.cache.get(&alice).await.unwrap().unwrap();
    assert!(cached.categories.contains(&category("jazz")));
}

#[tokio::test]
#[traced_test]
async fn failed_invalidation_is_reported_but_not_fatal() {
    let backend = InMemoryBackend::new();
    let collaborators = Collaborators {
        cache: Arc::new(
            backend
                .cache
                .clone()
                .with_chaos(failing(Operation::CacheDelete)),
        ),
        ..backend.collaborators()
    };
    let engine = engine_with(collaborators);
    let alice = user("alice");

    let update = engine
        .update_user_preference(alice.clone(), [category("rock")], deadline())
        .await
        .unwrap();

    assert!(update.cache_invalidation.is_degraded());
    assert_eq!(
        backend.store.get_user_preference(&alice).await.unwrap(),
        Some(update.preference)
    );
    assert!(logs_contain("cache_delete"));
}
