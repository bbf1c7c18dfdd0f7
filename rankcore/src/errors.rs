//! Error types for the ranking engine.
//!
//! Two layers of errors exist:
//!
//! - [`StoreError`]: returned by every collaborator (aggregate store,
//!   leaderboard, preference cache, category catalog). Each variant names the
//!   [`Operation`] that failed.
//! - [`RankingError`]: returned by the exposed engine operations. Only
//!   failures of authoritative calls and malformed events ever reach it;
//!   best-effort failures are reported through
//!   [`SideEffect`](crate::outcome::SideEffect) instead.

use thiserror::Error;

use crate::types::ItemId;

/// Identifies the collaborator operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Inserting a new item aggregate.
    CreateItem,
    /// Overwriting an item aggregate.
    UpdateItem,
    /// Reading an item aggregate.
    GetItem,
    /// Reading a user's interaction history.
    GetUserInteractions,
    /// Accumulating one interaction increment.
    UpsertUserInteraction,
    /// Reading a user's preference record.
    GetUserPreference,
    /// Writing a user's preference record.
    UpsertUserPreference,
    /// Writing an (id, score) pair into the leaderboard.
    LeaderboardUpsert,
    /// Reading a descending rank range from the leaderboard.
    LeaderboardRange,
    /// Reading a cached preference record.
    CacheGet,
    /// Populating the preference cache.
    CacheSet,
    /// Invalidating a cached preference record.
    CacheDelete,
    /// Looking up item categories.
    CategoryLookup,
    /// Handing an event message to the event bus.
    PublishEvent,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::CreateItem => "create_item",
            Self::UpdateItem => "update_item",
            Self::GetItem => "get_item",
            Self::GetUserInteractions => "get_user_interactions",
            Self::UpsertUserInteraction => "upsert_user_interaction",
            Self::GetUserPreference => "get_user_preference",
            Self::UpsertUserPreference => "upsert_user_preference",
            Self::LeaderboardUpsert => "leaderboard_upsert",
            Self::LeaderboardRange => "leaderboard_range",
            Self::CacheGet => "cache_get",
            Self::CacheSet => "cache_set",
            Self::CacheDelete => "cache_delete",
            Self::CategoryLookup => "category_lookup",
            Self::PublishEvent => "publish_event",
        };
        f.write_str(name)
    }
}

/// Error returned by collaborator implementations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The addressed record does not exist.
    #[error("{operation}: record not found")]
    NotFound {
        /// Operation that was attempted.
        operation: Operation,
    },

    /// The write collides with an existing record.
    #[error("{operation}: conflict: {detail}")]
    Conflict {
        /// Operation that was attempted.
        operation: Operation,
        /// Backend-specific description.
        detail: String,
    },

    /// The backend could not be reached or rejected the call.
    #[error("{operation}: backend unavailable: {detail}")]
    Unavailable {
        /// Operation that was attempted.
        operation: Operation,
        /// Backend-specific description.
        detail: String,
    },

    /// The caller-supplied deadline expired before the backend answered.
    #[error("{operation}: deadline exceeded")]
    Timeout {
        /// Operation that was attempted.
        operation: Operation,
    },

    /// The backend returned data that cannot be mapped onto the domain model.
    #[error("{operation}: malformed record: {detail}")]
    Malformed {
        /// Operation that was attempted.
        operation: Operation,
        /// Description of the offending data.
        detail: String,
    },
}

impl StoreError {
    /// Operation the error belongs to.
    pub const fn operation(&self) -> Operation {
        match self {
            Self::NotFound { operation }
            | Self::Conflict { operation, .. }
            | Self::Unavailable { operation, .. }
            | Self::Timeout { operation }
            | Self::Malformed { operation, .. } => *operation,
        }
    }

    /// Shorthand for [`StoreError::Unavailable`].
    pub fn unavailable(operation: Operation, detail: impl std::fmt::Display) -> Self {
        Self::Unavailable {
            operation,
            detail: detail.to_string(),
        }
    }

    /// Shorthand for [`StoreError::Malformed`].
    pub fn malformed(operation: Operation, detail: impl std::fmt::Display) -> Self {
        Self::Malformed {
            operation,
            detail: detail.to_string(),
        }
    }
}

/// Error returned by the exposed ranking operations.
///
/// # Error Handling Strategy
///
/// - **NotFound**: the item does not exist; do not retry
/// - **InvalidValue** / **UnknownAction**: the event is malformed; drop it,
///   nothing was mutated
/// - **UpstreamUnavailable**: an authoritative collaborator call failed or
///   timed out; redelivery may succeed
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RankingError {
    /// The item does not exist in the aggregate store.
    #[error("item {0} not found")]
    NotFound(ItemId),

    /// The event payload is malformed.
    #[error("invalid value: {0}")]
    InvalidValue(String),

    /// The event action tag is not one of the known actions.
    #[error("unknown action: {0}")]
    UnknownAction(String),

    /// An authoritative collaborator call failed.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(StoreError),
}

impl From<StoreError> for RankingError {
    fn from(error: StoreError) -> Self {
        Self::UpstreamUnavailable(error)
    }
}

/// Result type used by the exposed ranking operations.
pub type RankingResult<T> = Result<T, RankingError>;

/// Result type used by collaborator implementations.
pub type StoreResult<T> = Result<T, StoreError>;
