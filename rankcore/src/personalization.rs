//! Per-user re-ranking of a candidate window.
//!
//! Each candidate's global score is adjusted in a fixed order:
//!
//! 1. engagement boost from the user's accumulated interaction counters
//! 2. recency decay `1 / (1 + hours_since_last_viewed / 24)`
//! 3. a flat category bonus when the item shares a category with the user's
//!    preferences
//!
//! Steps 1 and 2 only apply when the user has interacted with the item. The
//! adjusted list is then re-sorted with [`rank_order`].
//!
//! Personalization can move an item far up the ranking, so callers must pass
//! an oversampled candidate window rather than just the requested page.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};

use crate::leaderboard::rank_order;
use crate::model::{Item, UserItemInteraction, UserPreference};
use crate::types::{Category, ItemId};

const VIEW_BOOST: f64 = 0.1;
const LIKE_BOOST: f64 = 0.5;
const COMMENT_BOOST: f64 = 0.8;
const SHARE_BOOST: f64 = 1.2;
const WATCH_TIME_BOOST: f64 = 0.05;
const DECAY_HALF_LIFE_HOURS: f64 = 24.0;

/// Added once when an item shares at least one category with the user.
pub const CATEGORY_BONUS: f64 = 3.0;

/// Score added for the user's own engagement with an item.
#[allow(clippy::cast_precision_loss)]
pub fn engagement_boost(interaction: &UserItemInteraction) -> f64 {
    interaction.views as f64 * VIEW_BOOST
        + interaction.likes as f64 * LIKE_BOOST
        + interaction.comments as f64 * COMMENT_BOOST
        + interaction.shares as f64 * SHARE_BOOST
        + interaction.watch_time as f64 * WATCH_TIME_BOOST
}

/// Multiplier applied for how long ago the user last touched the item.
///
/// A `last_viewed` in the future (clock skew) counts as "just now".
#[allow(clippy::cast_precision_loss)]
pub fn recency_factor(last_viewed: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let elapsed_ms = (now - last_viewed).num_milliseconds().max(0);
    let hours = elapsed_ms as f64 / 3_600_000.0;
    1.0 / (1.0 + hours / DECAY_HALF_LIFE_HOURS)
}

/// Everything known about one user that affects their ranking.
#[derive(Debug, Clone)]
pub struct UserContext<'a> {
    /// The user's interaction history, by item.
    pub interactions: &'a HashMap<ItemId, UserItemInteraction>,
    /// The user's preferred categories.
    pub preference: &'a UserPreference,
    /// Categories of the candidate items. Missing items have none.
    pub categories: &'a HashMap<ItemId, BTreeSet<Category>>,
}

impl UserContext<'_> {
    /// The personalized score of `item` at `now`.
    pub fn score(&self, item: &Item, now: DateTime<Utc>) -> f64 {
        let mut score = item.score;

        if let Some(interaction) = self.interactions.get(&item.id) {
            score += engagement_boost(interaction);
            score *= recency_factor(interaction.last_viewed, now);
        }

        let matches_preference = self
            .categories
            .get(&item.id)
            .is_some_and(|categories| self.preference.shares_category_with(categories));
        if matches_preference {
            score += CATEGORY_BONUS;
        }

        score
    }

    /// Rewrites every candidate's score and re-sorts the whole list.
    pub fn personalize(&self, mut candidates: Vec<Item>, now: DateTime<Utc>) -> Vec<Item> {
        for item in &mut candidates {
            item.score = self.score(item, now);
        }
        candidates.sort_by(|a, b| rank_order((a.score, a.id), (b.score, b.id)));
        candidates
    }
}

/// Indexes an interaction history by item.
pub fn index_interactions(
    interactions: Vec<UserItemInteraction>,
) -> HashMap<ItemId, UserItemInteraction> {
    interactions
        .into_iter()
        .map(|interaction| (interaction.item_id, interaction))
        .collect()
}
