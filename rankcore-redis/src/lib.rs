//! Redis collaborators for the `RankCore` ranking engine
//!
//! - [`RedisLeaderboard`]: the global ranking as one sorted set
//!   (`ZADD` / `ZREVRANGE .. WITHSCORES`)
//! - [`RedisPreferenceCache`]: JSON-encoded preference records under
//!   per-user keys with `SET .. EX` expiry
//!
//! Both share a multiplexed [`ConnectionManager`], which reconnects on its
//! own after a dropped connection.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use rankcore::errors::{Operation, StoreError, StoreResult};
use rankcore::leaderboard::{rank_order, LeaderboardEntry, RankRange};
use rankcore::model::UserPreference;
use rankcore::store::{Leaderboard, PreferenceCache};
use rankcore::types::{ItemId, UserId};
use redis::{aio::ConnectionManager, AsyncCommands};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Errors raised while connecting to Redis.
#[derive(Debug, Error)]
pub enum RedisStoreError {
    /// The URL could not be parsed or the server could not be reached.
    #[error("failed to connect to redis")]
    ConnectionFailed(#[source] redis::RedisError),
}

/// Where the Redis collaborators live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Connection URL (default: `redis://127.0.0.1:6379`)
    pub url: String,
    /// Sorted set holding the global ranking (default: `item_ranking`)
    pub leaderboard_key: String,
    /// Prefix of per-user preference keys (default: `user:preferences:`)
    pub preference_key_prefix: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            leaderboard_key: "item_ranking".to_string(),
            preference_key_prefix: "user:preferences:".to_string(),
        }
    }
}

impl RedisConfig {
    /// Key of the cached preference record of `user`.
    pub fn preference_key(&self, user: &UserId) -> String {
        format!("{}{user}", self.preference_key_prefix)
    }
}

/// Opens a managed connection to the server named by `config`.
pub async fn connect(config: &RedisConfig) -> Result<ConnectionManager, RedisStoreError> {
    info!(url = %config.url, "[redis.connect] connecting to redis");

    let client = redis::Client::open(config.url.as_str()).map_err(RedisStoreError::ConnectionFailed)?;
    let conn = ConnectionManager::new(client)
        .await
        .map_err(RedisStoreError::ConnectionFailed)?;

    info!("[redis.connected] redis connection established");
    Ok(conn)
}

/// The global ranking as a Redis sorted set of `item id -> score`.
///
/// `ZREVRANGE` orders equal scores by descending member bytes, the reverse of
/// the ranking's tie order. Ties wholly inside a window are re-sorted in
/// place. A tie group cut by a window edge is re-read in ascending member
/// order (`ZRANGE .. BYSCORE LIMIT`) from the rank where the group starts,
/// so consecutive pages never skip or repeat a tied item. Lowercase
/// hyphenated UUIDs compare bytewise in the same order as [`ItemId`].
#[derive(Clone)]
pub struct RedisLeaderboard {
    conn: ConnectionManager,
    key: String,
}

impl fmt::Debug for RedisLeaderboard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisLeaderboard")
            .field("connection", &"ConnectionManager")
            .field("key", &self.key)
            .finish()
    }
}

impl RedisLeaderboard {
    /// Uses sorted set `key` on an existing connection.
    pub fn new(conn: ConnectionManager, key: impl Into<String>) -> Self {
        Self {
            conn,
            key: key.into(),
        }
    }

    /// Connects and uses the configured sorted set.
    pub async fn connect(config: &RedisConfig) -> Result<Self, RedisStoreError> {
        Ok(Self::new(connect(config).await?, &config.leaderboard_key))
    }
}

#[async_trait]
impl Leaderboard for RedisLeaderboard {
    #[instrument(name = "redis.leaderboard_upsert", skip(self))]
    async fn upsert(&self, id: ItemId, score: f64) -> StoreResult<()> {
        let operation = Operation::LeaderboardUpsert;
        let mut conn = self.conn.clone();

        redis::cmd("ZADD")
            .arg(&self.key)
            .arg(score)
            .arg(id.to_string())
            .query_async::<()>(&mut conn)
            .await
            .map_err(|error| map_redis_error(&error, operation))
    }

    #[instrument(name = "redis.leaderboard_range", skip(self))]
    async fn range_desc(&self, range: RankRange) -> StoreResult<Vec<LeaderboardEntry>> {
        let operation = Operation::LeaderboardRange;
        if range.stop() < range.start() {
            return Ok(Vec::new());
        }

        let start = isize::try_from(range.start()).unwrap_or(isize::MAX);
        let stop = isize::try_from(range.stop()).unwrap_or(isize::MAX);
        let mut conn = self.conn.clone();

        let members: Vec<(String, f64)> = redis::cmd("ZREVRANGE")
            .arg(&self.key)
            .arg(start)
            .arg(stop)
            .arg("WITHSCORES")
            .query_async(&mut conn)
            .await
            .map_err(|error| map_redis_error(&error, operation))?;

        let mut entries = members
            .iter()
            .map(|(member, score)| Ok(LeaderboardEntry::new(parse_member(member)?, *score)))
            .collect::<StoreResult<Vec<_>>>()?;
        entries.sort_by(|a, b| rank_order((a.score, a.item_id), (b.score, b.item_id)));

        let edges = entries
            .first()
            .zip(entries.last())
            .map(|(highest, lowest)| (highest.score, lowest.score));
        let Some((highest, lowest)) = edges else {
            return Ok(entries);
        };

        self.align_tie_group(&mut conn, &mut entries, range.start(), highest)
            .await?;
        if lowest.total_cmp(&highest).is_ne() {
            self.align_tie_group(&mut conn, &mut entries, range.start(), lowest)
                .await?;
        }

        debug!(count = entries.len(), "[redis.leaderboard_range] range read");
        Ok(entries)
    }
}

impl RedisLeaderboard {
    /// Replaces the members of the entries scored `score` with the members
    /// Redis ranks at those positions under ascending-id tie order.
    ///
    /// `entries` is sorted and starts at rank `start`, so equal scores are
    /// contiguous. Leaves the window untouched if the set changed between
    /// calls.
    async fn align_tie_group(
        &self,
        conn: &mut ConnectionManager,
        entries: &mut [LeaderboardEntry],
        start: usize,
        score: f64,
    ) -> StoreResult<()> {
        let operation = Operation::LeaderboardRange;
        let positions: Vec<usize> = entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.score.total_cmp(&score).is_eq())
            .map(|(position, _)| position)
            .collect();
        let Some(&first_position) = positions.first() else {
            return Ok(());
        };

        let bound = score.to_string();
        let ranked_above: usize = redis::cmd("ZCOUNT")
            .arg(&self.key)
            .arg(format!("({bound}"))
            .arg("+inf")
            .query_async(&mut *conn)
            .await
            .map_err(|error| map_redis_error(&error, operation))?;

        let Some(offset) = (start + first_position).checked_sub(ranked_above) else {
            debug!(score, "[redis.tie_group_moved] ranking changed during read");
            return Ok(());
        };

        let members: Vec<String> = redis::cmd("ZRANGE")
            .arg(&self.key)
            .arg(&bound)
            .arg(&bound)
            .arg("BYSCORE")
            .arg("LIMIT")
            .arg(offset)
            .arg(positions.len())
            .query_async(&mut *conn)
            .await
            .map_err(|error| map_redis_error(&error, operation))?;

        if members.len() != positions.len() {
            debug!(score, "[redis.tie_group_moved] ranking changed during read");
            return Ok(());
        }

        for (position, member) in positions.into_iter().zip(&members) {
            entries[position] = LeaderboardEntry::new(parse_member(member)?, score);
        }
        Ok(())
    }
}

fn parse_member(member: &str) -> StoreResult<ItemId> {
    Uuid::parse_str(member)
        .map(ItemId::new)
        .map_err(|error| {
            StoreError::malformed(Operation::LeaderboardRange, format!("member {member}: {error}"))
        })
}

/// Preference records cached as JSON strings with a per-key expiry.
#[derive(Clone)]
pub struct RedisPreferenceCache {
    conn: ConnectionManager,
    config: RedisConfig,
}

impl fmt::Debug for RedisPreferenceCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisPreferenceCache")
            .field("connection", &"ConnectionManager")
            .field("prefix", &self.config.preference_key_prefix)
            .finish()
    }
}

impl RedisPreferenceCache {
    /// Uses keys named by `config` on an existing connection.
    pub const fn new(conn: ConnectionManager, config: RedisConfig) -> Self {
        Self { conn, config }
    }

    /// Connects and uses the configured key prefix.
    pub async fn connect(config: RedisConfig) -> Result<Self, RedisStoreError> {
        Ok(Self::new(connect(&config).await?, config))
    }
}

#[async_trait]
impl PreferenceCache for RedisPreferenceCache {
    #[instrument(name = "redis.cache_get", skip(self), fields(user = %user))]
    async fn get(&self, user: &UserId) -> StoreResult<Option<UserPreference>> {
        let operation = Operation::CacheGet;
        let mut conn = self.conn.clone();

        let data: Option<String> = conn
            .get(self.config.preference_key(user))
            .await
            .map_err(|error| map_redis_error(&error, operation))?;

        data.map(|json| {
            serde_json::from_str(&json).map_err(|error| StoreError::malformed(operation, error))
        })
        .transpose()
    }

    #[instrument(name = "redis.cache_set", skip(self, preference), fields(user = %user))]
    async fn set(
        &self,
        user: &UserId,
        preference: &UserPreference,
        ttl: Duration,
    ) -> StoreResult<()> {
        let operation = Operation::CacheSet;
        let json = serde_json::to_string(preference)
            .map_err(|error| StoreError::malformed(operation, error))?;
        let mut conn = self.conn.clone();

        conn.set_ex::<_, _, ()>(self.config.preference_key(user), json, ttl.as_secs().max(1))
            .await
            .map_err(|error| map_redis_error(&error, operation))
    }

    #[instrument(name = "redis.cache_delete", skip(self), fields(user = %user))]
    async fn delete(&self, user: &UserId) -> StoreResult<()> {
        let operation = Operation::CacheDelete;
        let mut conn = self.conn.clone();

        conn.del::<_, ()>(self.config.preference_key(user))
            .await
            .map_err(|error| map_redis_error(&error, operation))
    }
}

fn map_redis_error(error: &redis::RedisError, operation: Operation) -> StoreError {
    warn!(
        error = %error,
        operation = %operation,
        "[redis.command_failed] redis command failed"
    );

    if error.is_timeout() {
        return StoreError::Timeout { operation };
    }
    StoreError::unavailable(operation, error)
}
