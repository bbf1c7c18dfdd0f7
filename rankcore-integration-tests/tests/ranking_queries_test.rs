//! Global and personalized ranking queries.

use std::sync::Arc;

use chrono::{Duration, Utc};
use rankcore::{
    Action, AggregateStore, Collaborators, InteractionEvent, Item, ItemId, Leaderboard, Operation,
    RankRange, RankingConfig, RankingEngine, RankingError, StoreError, UserItemInteraction,
};
use rankcore_memory::InMemoryBackend;
use rankcore_testing::fixtures::{category, deadline, engine_with, in_memory_engine, seed_item, user};
use rankcore_testing::{ChaosConfig, ChaosExt};
use tracing_test::traced_test;

async fn apply(engine: &RankingEngine, item: &Item, actions: &[Action]) {
    for action in actions {
        let event = InteractionEvent::new(item.id, user("crowd"), *action);
        engine.apply_event(&event, deadline()).await.unwrap();
    }
}

/// Writes an item with a fixed score straight into the backend.
async fn ranked_item(backend: &InMemoryBackend, title: &str, score: f64) -> Item {
    let mut item = Item::new(ItemId::generate(), title, "{}");
    item.score = score;
    backend.store.create_item(&item).await.unwrap();
    backend.leaderboard.upsert(item.id, score).await.unwrap();
    item
}

fn ids(items: &[Item]) -> Vec<ItemId> {
    items.iter().map(|item| item.id).collect()
}

#[tokio::test]
async fn top_items_orders_by_score_then_id() {
    // Given: two items tied on a like and one with a single view
    let (engine, _backend) = in_memory_engine(RankingConfig::default());
    let first = seed_item(&engine, "first").await;
    let second = seed_item(&engine, "second").await;
    let third = seed_item(&engine, "third").await;
    apply(&engine, &third, &[Action::View]).await;
    apply(&engine, &second, &[Action::Like]).await;
    apply(&engine, &first, &[Action::Like]).await;

    // When: the top three ranks are requested
    let top = engine.top_items(RankRange::new(0, 2), deadline()).await.unwrap();

    // Then: the tied items come first in ascending id order
    let (low, high) = if first.id < second.id {
        (first.id, second.id)
    } else {
        (second.id, first.id)
    };
    assert_eq!(ids(&top), vec![low, high, third.id]);
    assert!((top[0].score - 5.0).abs() < f64::EPSILON);
    assert_eq!(top[0].likes, 1);
}

#[tokio::test]
async fn top_items_paginates_by_rank() {
    let backend = InMemoryBackend::new();
    let engine = engine_with(backend.collaborators());
    let mut ranked = Vec::new();
    for score in [50.0, 40.0, 30.0, 20.0, 10.0] {
        ranked.push(ranked_item(&backend, "ranked", score).await);
    }

    let page = engine.top_items(RankRange::new(1, 2), deadline()).await.unwrap();
    assert_eq!(ids(&page), ids(&ranked[1..3]));

    let clamped = engine.top_items(RankRange::new(3, 99), deadline()).await.unwrap();
    assert_eq!(ids(&clamped), ids(&ranked[3..]));

    let beyond = engine.top_items(RankRange::new(10, 20), deadline()).await.unwrap();
    assert!(beyond.is_empty());
}

#[tokio::test]
#[traced_test]
async fn top_items_skips_entries_missing_from_the_store() {
    // Given: a leaderboard entry whose aggregate does not exist
    let backend = InMemoryBackend::new();
    let engine = engine_with(backend.collaborators());
    let real = ranked_item(&backend, "real", 3.0).await;
    let ghost = ItemId::generate();
    backend.leaderboard.upsert(ghost, 9.0).await.unwrap();

    // When: the ranking is hydrated
    let top = engine.top_items(RankRange::top(10), deadline()).await.unwrap();

    // Then: only the real item is returned
    assert_eq!(ids(&top), vec![real.id]);
    assert!(logs_contain("engine.hydrate_skipped"));
}

#[tokio::test]
async fn leaderboard_range_failure_fails_the_query() {
    let backend = InMemoryBackend::new();
    let collaborators = Collaborators {
        leaderboard: Arc::new(backend.leaderboard.clone().with_chaos(
            ChaosConfig::deterministic()
                .with_failure_probability(1.0)
                .only([Operation::LeaderboardRange]),
        )),
        ..backend.collaborators()
    };
    let engine = engine_with(collaborators);

    let result = engine.top_items(RankRange::top(10), deadline()).await;

    assert!(matches!(
        result,
        Err(RankingError::UpstreamUnavailable(StoreError::Unavailable {
            operation: Operation::LeaderboardRange,
            ..
        }))
    ));
}

#[tokio::test]
async fn personalized_score_combines_engagement_recency_and_category() {
    // Given: an item scored 10 that the user engaged with two hours ago
    let backend = InMemoryBackend::new();
    let engine = engine_with(backend.collaborators());
    let listener = user("listener");
    let song = ranked_item(&backend, "song", 10.0).await;
    backend
        .store
        .upsert_user_interaction(&UserItemInteraction {
            views: 2,
            likes: 1,
            watch_time: 60,
            ..UserItemInteraction::empty(listener.clone(), song.id, Utc::now() - Duration::hours(2))
        })
        .await
        .unwrap();

    // And: the item shares a category with the user's preferences
    backend.catalog.assign(song.id, [category("music")]);
    engine
        .update_user_preference(listener.clone(), [category("music")], deadline())
        .await
        .unwrap();

    // When: the personalized ranking is requested
    let top = engine
        .top_items_for_user(&listener, RankRange::top(10), deadline())
        .await
        .unwrap();

    // Then: (10 + 0.2 + 0.5 + 3.0) / (1 + 2/24) + 3.0
    assert_eq!(top.len(), 1);
    assert!((top[0].score - 15.646).abs() < 1e-2, "score was {}", top[0].score);
}

#[tokio::test]
async fn personalization_can_reorder_the_global_ranking() {
    // Given: a popular item and a less popular one in the user's category
    let backend = InMemoryBackend::new();
    let engine = engine_with(backend.collaborators());
    let reader = user("reader");
    let popular = ranked_item(&backend, "popular", 10.0).await;
    let niche = ranked_item(&backend, "niche", 8.0).await;
    backend.catalog.assign(niche.id, [category("science")]);
    backend.catalog.assign(popular.id, [category("sport")]);
    engine
        .update_user_preference(reader.clone(), [category("science")], deadline())
        .await
        .unwrap();

    // When: global and personalized rankings are compared
    let global = engine.top_items(RankRange::top(2), deadline()).await.unwrap();
    let personal = engine
        .top_items_for_user(&reader, RankRange::top(2), deadline())
        .await
        .unwrap();

    // Then: the category bonus lifts the niche item to the top
    assert_eq!(ids(&global), vec![popular.id, niche.id]);
    assert_eq!(ids(&personal), vec![niche.id, popular.id]);
    assert!((personal[0].score - 11.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn personalized_pages_are_cut_after_reranking() {
    // Given: a preferred item ranked third globally, close behind second
    let backend = InMemoryBackend::new();
    let engine = engine_with(backend.collaborators());
    let reader = user("reader");
    let _first = ranked_item(&backend, "first", 30.0).await;
    let _second = ranked_item(&backend, "second", 20.0).await;
    let third = ranked_item(&backend, "third", 18.0).await;
    backend.catalog.assign(third.id, [category("science")]);
    engine
        .update_user_preference(reader.clone(), [category("science")], deadline())
        .await
        .unwrap();

    // When: only the second personalized rank is requested
    let page = engine
        .top_items_for_user(&reader, RankRange::new(1, 1), deadline())
        .await
        .unwrap();

    // Then: the page is taken from the re-ranked list
    assert_eq!(ids(&page), vec![third.id]);
    assert!((page[0].score - 21.0).abs() < f64::EPSILON);
}

#[tokio::test]
#[traced_test]
async fn category_lookup_failure_only_drops_the_bonus() {
    let backend = InMemoryBackend::new();
    let collaborators = Collaborators {
        catalog: Arc::new(
            backend
                .catalog
                .clone()
                .with_chaos(ChaosConfig::deterministic().with_failure_probability(1.0)),
        ),
        ..backend.collaborators()
    };
    let engine = engine_with(collaborators);
    let reader = user("reader");
    let item = ranked_item(&backend, "item", 5.0).await;
    backend.catalog.assign(item.id, [category("science")]);
    engine
        .update_user_preference(reader.clone(), [category("science")], deadline())
        .await
        .unwrap();

    let top = engine
        .top_items_for_user(&reader, RankRange::top(5), deadline())
        .await
        .unwrap();

    assert_eq!(ids(&top), vec![item.id]);
    assert!((top[0].score - 5.0).abs() < f64::EPSILON);
    assert!(logs_contain("engine.categories_degraded"));
}

#[tokio::test]
async fn interaction_history_failure_fails_the_personalized_query() {
    let backend = InMemoryBackend::new();
    let collaborators = Collaborators {
        store: Arc::new(backend.store.clone().with_chaos(
            ChaosConfig::deterministic()
                .with_failure_probability(1.0)
                .only([Operation::GetUserInteractions]),
        )),
        ..backend.collaborators()
    };
    let engine = engine_with(collaborators);
    ranked_item(&backend, "item", 5.0).await;

    let result = engine
        .top_items_for_user(&user("reader"), RankRange::top(5), deadline())
        .await;

    assert!(matches!(
        result,
        Err(RankingError::UpstreamUnavailable(StoreError::Unavailable {
            operation: Operation::GetUserInteractions,
            ..
        }))
    ));
}

#[tokio::test]
async fn personalization_only_sees_the_candidate_window() {
    // Given: a window of one rank and a preferred item ranked second
    let backend = InMemoryBackend::new();
    let config = RankingConfig::default()
        .with_candidate_window(rankcore::CandidateWindow::try_new(1).unwrap());
    let engine = RankingEngine::new(backend.collaborators(), config);
    let reader = user("reader");
    let leader = ranked_item(&backend, "leader", 10.0).await;
    let runner_up = ranked_item(&backend, "runner-up", 9.0).await;
    backend.catalog.assign(runner_up.id, [category("science")]);
    engine
        .update_user_preference(reader.clone(), [category("science")], deadline())
        .await
        .unwrap();

    // When: the personalized ranking is requested
    let top = engine
        .top_items_for_user(&reader, RankRange::top(10), deadline())
        .await
        .unwrap();

    // Then: the runner-up is never considered
    assert_eq!(ids(&top), vec![leader.id]);
}
