//! Builders for engines, identities and wire payloads used across tests.

use std::time::Duration;

use rankcore::{
    Category, Collaborators, Deadline, Item, ItemId, RankingConfig, RankingEngine, UserId,
};
use rankcore_memory::InMemoryBackend;
use serde_json::{json, Value};

/// Budget generous enough that in-memory calls never hit it.
pub const TEST_BUDGET: Duration = Duration::from_secs(5);

/// A deadline of [`TEST_BUDGET`] from now.
pub fn deadline() -> Deadline {
    Deadline::after(TEST_BUDGET)
}

/// A valid user id.
///
/// # Panics
///
/// Panics if `name` is blank.
pub fn user(name: &str) -> UserId {
    UserId::try_new(name).expect("fixture user id should be valid")
}

/// A valid category.
///
/// # Panics
///
/// Panics if `name` is blank.
pub fn category(name: &str) -> Category {
    Category::try_new(name).expect("fixture category should be valid")
}

/// An engine over a fresh in-memory backend, plus the backend so tests can
/// inspect what the engine wrote.
pub fn in_memory_engine(config: RankingConfig) -> (RankingEngine, InMemoryBackend) {
    let backend = InMemoryBackend::new();
    let engine = RankingEngine::new(backend.collaborators(), config);
    (engine, backend)
}

/// An engine over arbitrary collaborators using the default configuration.
pub fn engine_with(collaborators: Collaborators) -> RankingEngine {
    RankingEngine::new(collaborators, RankingConfig::default())
}

/// Creates an item through the engine.
///
/// # Panics
///
/// Panics if the aggregate store rejects the write.
pub async fn seed_item(engine: &RankingEngine, title: &str) -> Item {
    engine
        .create_item(title, "{}", deadline())
        .await
        .expect("fixture item should be created")
        .item
}

/// JSON wire payload of one interaction event.
pub fn envelope_json(item: ItemId, action: &str, user: &str, value: Option<Value>) -> Vec<u8> {
    let mut envelope = json!({
        "itemId": item.into_inner(),
        "action": action,
        "userId": user,
    });
    if let Some(value) = value {
        envelope["value"] = value;
    }
    envelope.to_string().into_bytes()
}
