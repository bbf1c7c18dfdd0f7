//! Records owned by the aggregate store.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Category, ItemId, UserId};

/// An item aggregate: descriptive attributes plus its popularity counters.
///
/// `score` only ever grows through event application. The leaderboard holds
/// a derived `(id, score)` projection of this record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    /// Stable identity, also the leaderboard member.
    pub id: ItemId,
    /// Display title.
    pub title: String,
    /// Opaque content payload, stored and returned untouched.
    pub payload: String,
    /// Sum of every applied event's weight.
    pub score: f64,
    /// Number of `view` events.
    pub views: u64,
    /// Number of `like` events.
    pub likes: u64,
    /// Number of `comment` events.
    pub comments: u64,
    /// Number of `share` events.
    pub shares: u64,
    /// Total whole seconds watched.
    pub watch_time: u64,
    /// When the item was created.
    pub created_at: DateTime<Utc>,
    /// Last write to the aggregate.
    pub updated_at: DateTime<Utc>,
}

impl Item {
    /// A fresh item with zero score and counters.
    pub fn new(id: ItemId, title: impl Into<String>, payload: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            title: title.into(),
            payload: payload.into(),
            score: 0.0,
            views: 0,
            likes: 0,
            comments: 0,
            shares: 0,
            watch_time: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Accumulated engagement of one user with one item.
///
/// Counters are strictly additive across events; `last_viewed` is
/// last-write-wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserItemInteraction {
    /// The engaging user.
    pub user_id: UserId,
    /// The item engaged with.
    pub item_id: ItemId,
    /// Time of the latest event, drives recency decay.
    pub last_viewed: DateTime<Utc>,
    /// Views by this user.
    pub views: u64,
    /// Likes by this user.
    pub likes: u64,
    /// Comments by this user.
    pub comments: u64,
    /// Shares by this user.
    pub shares: u64,
    /// Whole seconds watched by this user.
    pub watch_time: u64,
}

impl UserItemInteraction {
    /// An all-zero increment stamped with `at`.
    pub const fn empty(user_id: UserId, item_id: ItemId, at: DateTime<Utc>) -> Self {
        Self {
            user_id,
            item_id,
            last_viewed: at,
            views: 0,
            likes: 0,
            comments: 0,
            shares: 0,
            watch_time: 0,
        }
    }

    /// Folds an increment into this record.
    ///
    /// Adapters implementing `upsert_user_interaction` use this so that every
    /// backend shares the same accumulation rule.
    pub fn accumulate(&mut self, increment: &Self) {
        self.views = self.views.saturating_add(increment.views);
        self.likes = self.likes.saturating_add(increment.likes);
        self.comments = self.comments.saturating_add(increment.comments);
        self.shares = self.shares.saturating_add(increment.shares);
        self.watch_time = self.watch_time.saturating_add(increment.watch_time);
        self.last_viewed = increment.last_viewed;
    }
}

/// Categories a user has declared interest in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPreference {
    /// Owner of the record.
    pub user_id: UserId,
    /// Preferred categories; empty means no affinity bonus.
    pub categories: BTreeSet<Category>,
    /// Last write to the record.
    pub updated_at: DateTime<Utc>,
}

impl UserPreference {
    /// Creates a preference record stamped with the current time.
    pub fn new(user_id: UserId, categories: impl IntoIterator<Item = Category>) -> Self {
        Self {
            user_id,
            categories: categories.into_iter().collect(),
            updated_at: Utc::now(),
        }
    }

    /// The default used when no record exists for the user.
    pub fn empty(user_id: UserId) -> Self {
        Self::new(user_id, [])
    }

    /// True if any preferred category also appears in `item_categories`.
    pub fn shares_category_with(&self, item_categories: &BTreeSet<Category>) -> bool {
        !self.categories.is_empty() && !self.categories.is_disjoint(item_categories)
    }
}
