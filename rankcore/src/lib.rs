//! `RankCore` - event-driven popularity ranking and personalization
//!
//! This library turns a stream of user interaction events (views, likes,
//! comments, shares, watch time) into a live global ranking of content items,
//! and re-ranks that ranking per user from their engagement history, recency
//! and category preferences.
//!
//! Storage is delegated to collaborators behind the traits in [`store`]; see
//! the `rankcore-memory`, `rankcore-postgres` and `rankcore-redis` crates for
//! implementations.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod consumer;
pub mod deadline;
pub mod engine;
pub mod errors;
pub mod event;
pub mod leaderboard;
pub mod model;
pub mod outcome;
pub mod personalization;
pub mod preferences;
pub mod processor;
pub mod store;
pub mod types;

pub use config::{CandidateWindow, PreferenceTtlSecs, RankingConfig, RequestTimeoutMs};
pub use consumer::{consume, ConsumerStats, EventMessage};
pub use deadline::Deadline;
pub use engine::{Collaborators, RankingEngine};
pub use errors::{Operation, RankingError, RankingResult, StoreError, StoreResult};
pub use event::{Action, EventEnvelope, InteractionEvent};
pub use leaderboard::{rank_order, LeaderboardEntry, RankRange};
pub use model::{Item, UserItemInteraction, UserPreference};
pub use outcome::{EventOutcome, ItemWrite, PreferenceUpdate, SideEffect};
pub use preferences::{PreferenceResolver, PreferenceSource, ResolvedPreference};
pub use processor::EventProcessor;
pub use store::{AggregateStore, CategoryCatalog, EventPublisher, Leaderboard, PreferenceCache};
pub use types::{Category, ItemId, UserId, WatchSeconds};
