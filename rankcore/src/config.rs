//! Engine configuration with type-safe validation.
//!
//! Every tunable is a `nutype` newtype validated at construction, so an
//! invalid configuration cannot be built or deserialized.

use nutype::nutype;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Number of global leaderboard ranks handed to personalization.
///
/// Validated to be between 1 and 10 000 ranks.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 10_000),
    default = 100,
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Default,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct CandidateWindow(usize);

/// Lifetime of a cached preference record in seconds.
///
/// Validated to be between 1 second and 7 days.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 604_800),
    default = 3_600,
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Default,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct PreferenceTtlSecs(u64);

impl PreferenceTtlSecs {
    /// Convert to Duration for the cache call.
    pub fn as_duration(self) -> Duration {
        Duration::from_secs(self.into())
    }
}

/// Budget for one engine operation in milliseconds.
///
/// Validated to be between 10ms and 10 minutes.
#[nutype(
    validate(greater_or_equal = 10, less_or_equal = 600_000),
    default = 5_000,
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Default,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct RequestTimeoutMs(u64);

impl RequestTimeoutMs {
    /// Convert to Duration for building a [`Deadline`](crate::deadline::Deadline).
    pub fn as_duration(self) -> Duration {
        Duration::from_millis(self.into())
    }
}

/// Tunables of a [`RankingEngine`](crate::engine::RankingEngine).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    /// Ranks fetched from the global leaderboard before personalization.
    pub candidate_window: CandidateWindow,
    /// How long resolved preferences stay cached.
    pub preference_ttl: PreferenceTtlSecs,
    /// Default budget used when the engine builds its own deadlines.
    pub request_timeout: RequestTimeoutMs,
}

impl RankingConfig {
    /// Sets the candidate window.
    #[must_use]
    pub const fn with_candidate_window(mut self, window: CandidateWindow) -> Self {
        self.candidate_window = window;
        self
    }

    /// Sets the preference cache TTL.
    #[must_use]
    pub const fn with_preference_ttl(mut self, ttl: PreferenceTtlSecs) -> Self {
        self.preference_ttl = ttl;
        self
    }

    /// Sets the default request budget.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: RequestTimeoutMs) -> Self {
        self.request_timeout = timeout;
        self
    }
}
