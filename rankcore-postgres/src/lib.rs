//! PostgreSQL collaborators for the `RankCore` ranking engine
//!
//! [`PostgresAggregateStore`] implements both
//! [`AggregateStore`](rankcore::AggregateStore) and
//! [`CategoryCatalog`](rankcore::CategoryCatalog) on one connection pool.
//! Interaction upserts accumulate counters inside a single
//! `INSERT .. ON CONFLICT` statement, so concurrent increments for the same
//! (user, item) pair never lose each other.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nutype::nutype;
use rankcore::errors::{Operation, StoreError, StoreResult};
use rankcore::model::{Item, UserItemInteraction, UserPreference};
use rankcore::store::{AggregateStore, CategoryCatalog};
use rankcore::types::{Category, ItemId, UserId};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{query, Pool, Postgres, Row};
use thiserror::Error;
use tracing::{debug, error, instrument};
use uuid::Uuid;

const ITEM_COLUMNS: &str =
    "id, title, payload, score, views, likes, comments, shares, watch_time, created_at, updated_at";

const INTERACTION_COLUMNS: &str =
    "user_id, item_id, last_viewed, views, likes, comments, shares, watch_time";

/// Errors raised while setting up the PostgreSQL store.
#[derive(Debug, Error)]
pub enum PostgresStoreError {
    /// The connection pool could not be created or the database is unreachable.
    #[error("failed to connect to postgres")]
    ConnectionFailed(#[source] sqlx::Error),

    /// Schema migrations failed to apply.
    #[error("failed to apply postgres migrations")]
    MigrationFailed(#[source] sqlx::migrate::MigrateError),
}

/// Maximum number of database connections in the pool.
///
/// Must be at least 1, enforced by using `NonZeroU32` as the underlying type.
#[nutype(derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRef, Into))]
pub struct MaxConnections(std::num::NonZeroU32);

/// Configuration for the [`PostgresAggregateStore`] connection pool.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// Maximum number of connections in the pool (default: 10)
    pub max_connections: MaxConnections,
    /// Timeout for acquiring a connection from the pool (default: 30 seconds)
    pub acquire_timeout: Duration,
    /// Idle timeout for connections in the pool (default: 10 minutes)
    pub idle_timeout: Duration,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        const DEFAULT_MAX_CONNECTIONS: std::num::NonZeroU32 = match std::num::NonZeroU32::new(10) {
            Some(v) => v,
            None => unreachable!(),
        };

        Self {
            max_connections: MaxConnections::new(DEFAULT_MAX_CONNECTIONS),
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
        }
    }
}

/// Item aggregates, user records and item categories in PostgreSQL.
#[derive(Debug, Clone)]
pub struct PostgresAggregateStore {
    pool: Pool<Postgres>,
}

impl PostgresAggregateStore {
    /// Connect with default configuration.
    pub async fn new<S: Into<String>>(connection_string: S) -> Result<Self, PostgresStoreError> {
        Self::with_config(connection_string, PostgresConfig::default()).await
    }

    /// Connect with custom configuration.
    pub async fn with_config<S: Into<String>>(
        connection_string: S,
        config: PostgresConfig,
    ) -> Result<Self, PostgresStoreError> {
        let connection_string = connection_string.into();
        let max_connections: std::num::NonZeroU32 = config.max_connections.into();
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.get())
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(config.idle_timeout)
            .connect(&connection_string)
            .await
            .map_err(PostgresStoreError::ConnectionFailed)?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool, e.g. one shared with other components.
    pub const fn from_pool(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Round-trips a trivial query.
    pub async fn ping(&self) -> Result<(), PostgresStoreError> {
        query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(PostgresStoreError::ConnectionFailed)
    }

    /// Applies the bundled schema migrations.
    pub async fn migrate(&self) -> Result<(), PostgresStoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(PostgresStoreError::MigrationFailed)
    }

    /// Replaces the categories of `id`.
    ///
    /// Categories are owned by an external catalog; this is the write path
    /// such a process (or a test) uses.
    #[instrument(name = "postgres.assign_categories", skip(self, categories))]
    pub async fn assign_categories(
        &self,
        id: ItemId,
        categories: impl IntoIterator<Item = Category> + Send,
    ) -> StoreResult<()> {
        let names: Vec<String> = categories
            .into_iter()
            .map(|category| category.into_inner())
            .collect();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|error| map_sqlx_error(error, Operation::CategoryLookup))?;

        query("DELETE FROM rankcore_item_categories WHERE item_id = $1")
            .bind(id.into_inner())
            .execute(&mut *tx)
            .await
            .map_err(|error| map_sqlx_error(error, Operation::CategoryLookup))?;

        query(
            "INSERT INTO rankcore_item_categories (item_id, category) \
             SELECT $1, name FROM UNNEST($2::TEXT[]) AS name ON CONFLICT DO NOTHING",
        )
        .bind(id.into_inner())
        .bind(names)
        .execute(&mut *tx)
        .await
        .map_err(|error| map_sqlx_error(error, Operation::CategoryLookup))?;

        tx.commit()
            .await
            .map_err(|error| map_sqlx_error(error, Operation::CategoryLookup))
    }
}

#[async_trait]
impl AggregateStore for PostgresAggregateStore {
    #[instrument(name = "postgres.create_item", skip(self, item), fields(item = %item.id))]
    async fn create_item(&self, item: &Item) -> StoreResult<()> {
        let operation = Operation::CreateItem;
        query(&format!(
            "INSERT INTO rankcore_items ({ITEM_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"
        ))
        .bind(item.id.into_inner())
        .bind(&item.title)
        .bind(&item.payload)
        .bind(item.score)
        .bind(to_db(item.views, operation)?)
        .bind(to_db(item.likes, operation)?)
        .bind(to_db(item.comments, operation)?)
        .bind(to_db(item.shares, operation)?)
        .bind(to_db(item.watch_time, operation)?)
        .bind(item.created_at)
        .bind(item.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|error| map_sqlx_error(error, operation))?;

        debug!("[postgres.item_created] item row inserted");
        Ok(())
    }

    #[instrument(name = "postgres.update_item", skip(self, item), fields(item = %item.id))]
    async fn update_item(&self, item: &Item) -> StoreResult<()> {
        let operation = Operation::UpdateItem;
        let result = query(
            "UPDATE rankcore_items SET title = $2, payload = $3, score = $4, views = $5, \
             likes = $6, comments = $7, shares = $8, watch_time = $9, updated_at = $10 \
             WHERE id = $1",
        )
        .bind(item.id.into_inner())
        .bind(&item.title)
        .bind(&item.payload)
        .bind(item.score)
        .bind(to_db(item.views, operation)?)
        .bind(to_db(item.likes, operation)?)
        .bind(to_db(item.comments, operation)?)
        .bind(to_db(item.shares, operation)?)
        .bind(to_db(item.watch_time, operation)?)
        .bind(item.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|error| map_sqlx_error(error, operation))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound { operation });
        }
        Ok(())
    }

    #[instrument(name = "postgres.get_item", skip(self))]
    async fn get_item(&self, id: ItemId) -> StoreResult<Item> {
        let operation = Operation::GetItem;
        let row = query(&format!(
            "SELECT {ITEM_COLUMNS} FROM rankcore_items WHERE id = $1"
        ))
        .bind(id.into_inner())
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| map_sqlx_error(error, operation))?
        .ok_or(StoreError::NotFound { operation })?;

        item_from_row(&row, operation)
    }

    #[instrument(name = "postgres.get_user_interactions", skip(self), fields(user = %user))]
    async fn get_user_interactions(&self, user: &UserId) -> StoreResult<Vec<UserItemInteraction>> {
        let operation = Operation::GetUserInteractions;
        let rows = query(&format!(
            "SELECT {INTERACTION_COLUMNS} FROM rankcore_user_item_interactions WHERE user_id = $1"
        ))
        .bind(user.as_ref())
        .fetch_all(&self.pool)
        .await
        .map_err(|error| map_sqlx_error(error, operation))?;

        rows.iter()
            .map(|row| interaction_from_row(row, operation))
            .collect()
    }

    #[instrument(name = "postgres.get_user_preference", skip(self), fields(user = %user))]
    async fn get_user_preference(&self, user: &UserId) -> StoreResult<Option<UserPreference>> {
        let operation = Operation::GetUserPreference;
        let row = query(
            "SELECT user_id, categories, updated_at FROM rankcore_user_preferences \
             WHERE user_id = $1",
        )
        .bind(user.as_ref())
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| map_sqlx_error(error, operation))?;

        row.map(|row| preference_from_row(&row, operation))
            .transpose()
    }

    #[instrument(
        name = "postgres.upsert_user_interaction",
        skip(self, increment),
        fields(user = %increment.user_id, item = %increment.item_id)
    )]
    async fn upsert_user_interaction(&self, increment: &UserItemInteraction) -> StoreResult<()> {
        let operation = Operation::UpsertUserInteraction;
        query(&format!(
            "INSERT INTO rankcore_user_item_interactions AS current ({INTERACTION_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (user_id, item_id) DO UPDATE SET \
                 last_viewed = EXCLUDED.last_viewed, \
                 views = current.views + EXCLUDED.views, \
                 likes = current.likes + EXCLUDED.likes, \
                 comments = current.comments + EXCLUDED.comments, \
                 shares = current.shares + EXCLUDED.shares, \
                 watch_time = current.watch_time + EXCLUDED.watch_time"
        ))
        .bind(increment.user_id.as_ref())
        .bind(increment.item_id.into_inner())
        .bind(increment.last_viewed)
        .bind(to_db(increment.views, operation)?)
        .bind(to_db(increment.likes, operation)?)
        .bind(to_db(increment.comments, operation)?)
        .bind(to_db(increment.shares, operation)?)
        .bind(to_db(increment.watch_time, operation)?)
        .execute(&self.pool)
        .await
        .map_err(|error| map_sqlx_error(error, operation))?;

        Ok(())
    }

    #[instrument(
        name = "postgres.upsert_user_preference",
        skip(self, preference),
        fields(user = %preference.user_id)
    )]
    async fn upsert_user_preference(&self, preference: &UserPreference) -> StoreResult<()> {
        let operation = Operation::UpsertUserPreference;
        let categories: Vec<&str> = preference
            .categories
            .iter()
            .map(AsRef::as_ref)
            .collect();

        query(
            "INSERT INTO rankcore_user_preferences (user_id, categories, updated_at) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (user_id) DO UPDATE SET \
                 categories = EXCLUDED.categories, \
                 updated_at = EXCLUDED.updated_at",
        )
        .bind(preference.user_id.as_ref())
        .bind(categories)
        .bind(preference.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|error| map_sqlx_error(error, operation))?;

        Ok(())
    }
}

#[async_trait]
impl CategoryCatalog for PostgresAggregateStore {
    #[instrument(name = "postgres.categories_for", skip(self, ids), fields(count = ids.len()))]
    async fn categories_for(
        &self,
        ids: &[ItemId],
    ) -> StoreResult<HashMap<ItemId, BTreeSet<Category>>> {
        let operation = Operation::CategoryLookup;
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let uuids: Vec<Uuid> = ids.iter().map(|id| id.into_inner()).collect();
        let rows = query(
            "SELECT item_id, category FROM rankcore_item_categories WHERE item_id = ANY($1)",
        )
        .bind(uuids)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| map_sqlx_error(error, operation))?;

        let mut categories: HashMap<ItemId, BTreeSet<Category>> = HashMap::new();
        for row in rows {
            let item_id: Uuid = column(&row, "item_id", operation)?;
            let name: String = column(&row, "category", operation)?;
            let category = Category::try_new(name)
                .map_err(|error| StoreError::malformed(operation, error))?;
            categories
                .entry(ItemId::new(item_id))
                .or_default()
                .insert(category);
        }
        Ok(categories)
    }
}

fn item_from_row(row: &PgRow, operation: Operation) -> StoreResult<Item> {
    Ok(Item {
        id: ItemId::new(column(row, "id", operation)?),
        title: column(row, "title", operation)?,
        payload: column(row, "payload", operation)?,
        score: column(row, "score", operation)?,
        views: counter(row, "views", operation)?,
        likes: counter(row, "likes", operation)?,
        comments: counter(row, "comments", operation)?,
        shares: counter(row, "shares", operation)?,
        watch_time: counter(row, "watch_time", operation)?,
        created_at: column::<DateTime<Utc>>(row, "created_at", operation)?,
        updated_at: column::<DateTime<Utc>>(row, "updated_at", operation)?,
    })
}

fn interaction_from_row(row: &PgRow, operation: Operation) -> StoreResult<UserItemInteraction> {
    Ok(UserItemInteraction {
        user_id: user_id(row, operation)?,
        item_id: ItemId::new(column(row, "item_id", operation)?),
        last_viewed: column(row, "last_viewed", operation)?,
        views: counter(row, "views", operation)?,
        likes: counter(row, "likes", operation)?,
        comments: counter(row, "comments", operation)?,
        shares: counter(row, "shares", operation)?,
        watch_time: counter(row, "watch_time", operation)?,
    })
}

fn preference_from_row(row: &PgRow, operation: Operation) -> StoreResult<UserPreference> {
    let names: Vec<String> = column(row, "categories", operation)?;
    let categories = names
        .into_iter()
        .map(|name| Category::try_new(name).map_err(|error| StoreError::malformed(operation, error)))
        .collect::<StoreResult<BTreeSet<Category>>>()?;

    Ok(UserPreference {
        user_id: user_id(row, operation)?,
        categories,
        updated_at: column(row, "updated_at", operation)?,
    })
}

fn user_id(row: &PgRow, operation: Operation) -> StoreResult<UserId> {
    let raw: String = column(row, "user_id", operation)?;
    UserId::try_new(raw).map_err(|error| StoreError::malformed(operation, error))
}

fn column<'r, T>(row: &'r PgRow, name: &str, operation: Operation) -> StoreResult<T>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(name)
        .map_err(|error| map_sqlx_error(error, operation))
}

fn counter(row: &PgRow, name: &str, operation: Operation) -> StoreResult<u64> {
    let value: i64 = column(row, name, operation)?;
    u64::try_from(value)
        .map_err(|_| StoreError::malformed(operation, format!("{name} is negative: {value}")))
}

fn to_db(value: u64, operation: Operation) -> StoreResult<i64> {
    i64::try_from(value)
        .map_err(|_| StoreError::malformed(operation, format!("counter {value} exceeds BIGINT")))
}

fn map_sqlx_error(error: sqlx::Error, operation: Operation) -> StoreError {
    match &error {
        sqlx::Error::RowNotFound => return StoreError::NotFound { operation },
        sqlx::Error::Database(db_error) if db_error.is_unique_violation() => {
            return StoreError::Conflict {
                operation,
                detail: db_error.to_string(),
            };
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::ColumnNotFound(_) => {
            return StoreError::malformed(operation, &error);
        }
        _ => {}
    }

    error!(
        error = %error,
        operation = %operation,
        "[postgres.database_error] database operation failed"
    );
    StoreError::unavailable(operation, error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_rows_map_to_not_found() {
        let mapped = map_sqlx_error(sqlx::Error::RowNotFound, Operation::GetItem);
        assert_eq!(
            mapped,
            StoreError::NotFound {
                operation: Operation::GetItem
            }
        );
    }

    #[test]
    fn pool_exhaustion_maps_to_unavailable() {
        let mapped = map_sqlx_error(sqlx::Error::PoolTimedOut, Operation::UpdateItem);
        assert!(matches!(
            mapped,
            StoreError::Unavailable {
                operation: Operation::UpdateItem,
                ..
            }
        ));
    }

    #[test]
    fn missing_columns_map_to_malformed() {
        let mapped = map_sqlx_error(
            sqlx::Error::ColumnNotFound("score".into()),
            Operation::GetItem,
        );
        assert!(matches!(
            mapped,
            StoreError::Malformed {
                operation: Operation::GetItem,
                ..
            }
        ));
    }

    #[test]
    fn oversized_counters_are_rejected_before_binding() {
        assert_eq!(to_db(42, Operation::UpdateItem), Ok(42));
        assert!(matches!(
            to_db(u64::MAX, Operation::UpdateItem),
            Err(StoreError::Malformed { .. })
        ));
    }

    #[test]
    fn default_config_uses_ten_connections() {
        let config = PostgresConfig::default();
        let max: std::num::NonZeroU32 = config.max_connections.into();
        assert_eq!(max.get(), 10);
        assert_eq!(config.acquire_timeout, Duration::from_secs(30));
    }
}
