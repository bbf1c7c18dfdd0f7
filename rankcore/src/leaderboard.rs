//! Rank ordering and rank-range semantics shared by every leaderboard.
//!
//! Rankings are descending by score with ties broken by ascending item id.
//! A [`RankRange`] addresses zero-based ranks `start..=stop`; a start beyond
//! the end yields nothing and the stop is clamped to the last rank.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::types::ItemId;

/// One `(id, score)` projection stored by a leaderboard.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    /// Ranked item.
    pub item_id: ItemId,
    /// Its global score.
    pub score: f64,
}

impl LeaderboardEntry {
    /// Pairs an id with its score.
    pub const fn new(item_id: ItemId, score: f64) -> Self {
        Self { item_id, score }
    }
}

/// Total rank order: higher score first, then lower id first.
///
/// Uses IEEE total ordering so NaN can never break the sort.
pub fn rank_order(a: (f64, ItemId), b: (f64, ItemId)) -> Ordering {
    b.0.total_cmp(&a.0).then_with(|| a.1.cmp(&b.1))
}

/// Inclusive, zero-based window of ranks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RankRange {
    start: usize,
    stop: usize,
}

impl RankRange {
    /// Ranks `start..=stop`.
    pub const fn new(start: usize, stop: usize) -> Self {
        Self { start, stop }
    }

    /// The first `count` ranks. `count` of zero is treated as one.
    pub const fn top(count: usize) -> Self {
        Self::new(0, count.saturating_sub(1))
    }

    /// First rank, zero-based.
    pub const fn start(&self) -> usize {
        self.start
    }

    /// Last rank, inclusive.
    pub const fn stop(&self) -> usize {
        self.stop
    }

    /// Index bounds of this window inside a ranking of `len` entries, or
    /// `None` if the window selects nothing.
    pub fn bounds(&self, len: usize) -> Option<std::ops::Range<usize>> {
        if self.start >= len || self.stop < self.start {
            return None;
        }
        let stop = self.stop.min(len - 1);
        Some(self.start..stop + 1)
    }

    /// Applies the window to an already ranked list.
    pub fn paginate<T>(&self, ranked: Vec<T>) -> Vec<T> {
        match self.bounds(ranked.len()) {
            Some(range) => ranked.into_iter().skip(range.start).take(range.len()).collect(),
            None => Vec::new(),
        }
    }
}
