//! Interaction events and their wire envelope.
//!
//! [`InteractionEvent`] is the typed form the engine works with. Only the
//! `WatchTime` variant carries a value, so the processor never inspects an
//! untyped payload. [`EventEnvelope`] is the loosely-typed JSON shape
//! delivered by the event source; [`InteractionEvent::try_from`] is the single
//! place where action strings and optional values are checked.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::errors::RankingError;
use crate::model::{Item, UserItemInteraction};
use crate::types::{ItemId, UserId, WatchSeconds};

const VIEW_WEIGHT: f64 = 1.0;
const LIKE_WEIGHT: f64 = 5.0;
const COMMENT_WEIGHT: f64 = 3.0;
const SHARE_WEIGHT: f64 = 4.0;
const WATCH_TIME_WEIGHT: f64 = 0.05;

/// What the user did to the item.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Action {
    /// Opened the item.
    View,
    /// Liked the item.
    Like,
    /// Commented on the item.
    Comment,
    /// Shared the item.
    Share,
    /// Watched the item for the carried duration.
    WatchTime(WatchSeconds),
}

impl Action {
    /// Wire tag of the action.
    pub const fn tag(self) -> &'static str {
        match self {
            Self::View => "view",
            Self::Like => "like",
            Self::Comment => "comment",
            Self::Share => "share",
            Self::WatchTime(_) => "watch_time",
        }
    }

    /// Amount added to an item's score by one event of this action.
    pub fn score_delta(self) -> f64 {
        match self {
            Self::View => VIEW_WEIGHT,
            Self::Like => LIKE_WEIGHT,
            Self::Comment => COMMENT_WEIGHT,
            Self::Share => SHARE_WEIGHT,
            Self::WatchTime(seconds) => seconds.into_inner() * WATCH_TIME_WEIGHT,
        }
    }

    /// Applies the score delta and the matching counter increment to `item`.
    pub fn apply_to(self, item: &mut Item) {
        match self {
            Self::View => item.views = item.views.saturating_add(1),
            Self::Like => item.likes = item.likes.saturating_add(1),
            Self::Comment => item.comments = item.comments.saturating_add(1),
            Self::Share => item.shares = item.shares.saturating_add(1),
            Self::WatchTime(seconds) => {
                item.watch_time = item.watch_time.saturating_add(seconds.whole_seconds());
            }
        }
        item.score += self.score_delta();
    }

    /// The single-event interaction increment implied by this action.
    pub fn interaction_increment(
        self,
        user_id: UserId,
        item_id: ItemId,
        at: DateTime<Utc>,
    ) -> UserItemInteraction {
        let mut increment = UserItemInteraction::empty(user_id, item_id, at);
        match self {
            Self::View => increment.views = 1,
            Self::Like => increment.likes = 1,
            Self::Comment => increment.comments = 1,
            Self::Share => increment.shares = 1,
            Self::WatchTime(seconds) => increment.watch_time = seconds.whole_seconds(),
        }
        increment
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// A validated interaction event.
#[derive(Debug, Clone, PartialEq)]
pub struct InteractionEvent {
    /// Item the user interacted with.
    pub item_id: ItemId,
    /// Who interacted.
    pub user_id: UserId,
    /// What they did.
    pub action: Action,
}

impl InteractionEvent {
    /// Bundles an already validated event.
    pub const fn new(item_id: ItemId, user_id: UserId, action: Action) -> Self {
        Self {
            item_id,
            user_id,
            action,
        }
    }
}

/// Event as delivered on the wire.
///
/// `value` is only meaningful for `watch_time` and is ignored otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Target item; `itemId` and the legacy `video_id` are accepted.
    #[serde(alias = "video_id", alias = "itemId")]
    pub item_id: Uuid,
    /// Action tag such as `like` or `watch_time`.
    pub action: String,
    /// Acting user; `userId` is accepted.
    #[serde(alias = "userId")]
    pub user_id: String,
    /// Seconds watched, for `watch_time` only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl EventEnvelope {
    /// Parses a raw JSON message body.
    pub fn from_slice(payload: &[u8]) -> Result<Self, RankingError> {
        serde_json::from_slice(payload)
            .map_err(|error| RankingError::InvalidValue(format!("undecodable event: {error}")))
    }
}

impl From<&InteractionEvent> for EventEnvelope {
    fn from(event: &InteractionEvent) -> Self {
        let value = match event.action {
            Action::WatchTime(seconds) => Some(Value::from(seconds.into_inner())),
            Action::View | Action::Like | Action::Comment | Action::Share => None,
        };
        Self {
            item_id: event.item_id.into_inner(),
            action: event.action.tag().to_owned(),
            user_id: event.user_id.to_string(),
            value,
        }
    }
}

impl TryFrom<EventEnvelope> for InteractionEvent {
    type Error = RankingError;

    fn try_from(envelope: EventEnvelope) -> Result<Self, Self::Error> {
        let action = match envelope.action.as_str() {
            "view" => Action::View,
            "like" => Action::Like,
            "comment" => Action::Comment,
            "share" => Action::Share,
            "watch_time" => Action::WatchTime(watch_seconds(envelope.value.as_ref())?),
            other => return Err(RankingError::UnknownAction(other.to_owned())),
        };

        let user_id = UserId::try_new(envelope.user_id)
            .map_err(|error| RankingError::InvalidValue(format!("user id: {error}")))?;

        Ok(Self::new(ItemId::new(envelope.item_id), user_id, action))
    }
}

fn watch_seconds(value: Option<&Value>) -> Result<WatchSeconds, RankingError> {
    let raw = value
        .and_then(Value::as_f64)
        .ok_or_else(|| RankingError::InvalidValue(format!("watch time value: {value:?}")))?;
    WatchSeconds::try_new(raw)
        .map_err(|error| RankingError::InvalidValue(format!("watch time value {raw}: {error}")))
}
