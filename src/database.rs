use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;

use crate::config::DatabaseConfig;
use crate::models::{PriceObservation, TargetId, TrackedTarget};
use crate::utils::error::AppError;
use crate::Result;

/// Storage for tracked targets and their price history.
///
/// Implementations must be safe to call from many firings at once; each call
/// is expected to use its own connection for the duration of that call only.
#[async_trait]
pub trait PriceStore: Send + Sync {
    async fn list_targets(&self) -> Result<Vec<TrackedTarget>>;

    async fn get_target(&self, id: TargetId) -> Result<Option<TrackedTarget>>;

    async fn find_target_by_name(&self, name: &str) -> Result<Option<TrackedTarget>>;

    /// Inserts the target definition, ignoring its `id`, and returns the new id.
    async fn insert_target(&self, target: &TrackedTarget) -> Result<TargetId>;

    /// Commits an unsaved target together with its first observation, or
    /// neither. A stored target with the same name and the same url, selector
    /// and pattern is reused; any other owner of the name is a `Conflict`.
    async fn insert_target_with_observation(
        &self,
        target: &TrackedTarget,
        price: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<TargetId>;

    /// Returns `false` when no row has the target's id.
    async fn update_target(&self, target: &TrackedTarget) -> Result<bool>;

    /// Deletes the target together with its price history.
    async fn delete_target(&self, id: TargetId) -> Result<bool>;

    async fn insert_observation(
        &self,
        target_id: TargetId,
        price: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<i64>;

    async fn price_history(&self, target_ids: &[TargetId]) -> Result<Vec<PriceObservation>>;
}

const TARGET_COLUMNS: &str = "id, name, url, selector, pattern, update_interval, is_active";

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout))
            .connect_with(options)
            .await?;

        tracing::info!("Connected to price store at {}", config.url);
        Self::migrate(pool).await
    }

    /// Private in-memory database. A single connection is kept alive because
    /// every new SQLite memory connection would see an empty database.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Self::migrate(pool).await
    }

    async fn migrate(pool: SqlitePool) -> Result<Self> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl PriceStore for SqliteStore {
    async fn list_targets(&self) -> Result<Vec<TrackedTarget>> {
        let targets = sqlx::query_as::<_, TrackedTarget>(&format!(
            "SELECT {} FROM tracked_elements ORDER BY id",
            TARGET_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(targets)
    }

    async fn get_target(&self, id: TargetId) -> Result<Option<TrackedTarget>> {
        let target = sqlx::query_as::<_, TrackedTarget>(&format!(
            "SELECT {} FROM tracked_elements WHERE id = ?",
            TARGET_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(target)
    }

    async fn find_target_by_name(&self, name: &str) -> Result<Option<TrackedTarget>> {
        let target = sqlx::query_as::<_, TrackedTarget>(&format!(
            "SELECT {} FROM tracked_elements WHERE name = ? ORDER BY id LIMIT 1",
            TARGET_COLUMNS
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(target)
    }

    async fn insert_target(&self, target: &TrackedTarget) -> Result<TargetId> {
        let result = sqlx::query(
            "INSERT INTO tracked_elements (name, url, selector, pattern, update_interval, is_active)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&target.name)
        .bind(&target.url)
        .bind(&target.selector)
        .bind(&target.pattern)
        .bind(target.update_interval)
        .bind(target.is_active)
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        tracing::debug!("Inserted target '{}' with id {}", target.name, id);
        Ok(id)
    }

    async fn insert_target_with_observation(
        &self,
        target: &TrackedTarget,
        price: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<TargetId> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            "INSERT INTO tracked_elements (name, url, selector, pattern, update_interval, is_active)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(name) DO NOTHING",
        )
        .bind(&target.name)
        .bind(&target.url)
        .bind(&target.selector)
        .bind(&target.pattern)
        .bind(target.update_interval)
        .bind(target.is_active)
        .execute(&mut *tx)
        .await?;

        let id = if inserted.rows_affected() > 0 {
            inserted.last_insert_rowid()
        } else {
            let existing = sqlx::query_as::<_, TrackedTarget>(&format!(
                "SELECT {} FROM tracked_elements WHERE name = ?",
                TARGET_COLUMNS
            ))
            .bind(&target.name)
            .fetch_one(&mut *tx)
            .await?;

            if existing.url != target.url
                || existing.selector != target.selector
                || existing.pattern != target.pattern
            {
                return Err(AppError::Conflict(format!(
                    "name '{}' belongs to target {} with a different definition",
                    target.name, existing.id
                )));
            }
            existing.id
        };

        sqlx::query(
            "INSERT INTO price_history (tracked_elements_id, current_price, timestamp) VALUES (?, ?, ?)",
        )
        .bind(id)
        .bind(price)
        .bind(timestamp)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(id)
    }

    async fn update_target(&self, target: &TrackedTarget) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE tracked_elements
             SET name = ?, url = ?, selector = ?, pattern = ?, update_interval = ?, is_active = ?
             WHERE id = ?",
        )
        .bind(&target.name)
        .bind(&target.url)
        .bind(&target.selector)
        .bind(&target.pattern)
        .bind(target.update_interval)
        .bind(target.is_active)
        .bind(target.id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_target(&self, id: TargetId) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let history = sqlx::query("DELETE FROM price_history WHERE tracked_elements_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let target = sqlx::query("DELETE FROM tracked_elements WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::info!(
            "Deleted target {} ({} price history records)",
            id,
            history.rows_affected()
        );
        Ok(target.rows_affected() > 0)
    }

    async fn insert_observation(
        &self,
        target_id: TargetId,
        price: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO price_history (tracked_elements_id, current_price, timestamp) VALUES (?, ?, ?)",
        )
        .bind(target_id)
        .bind(price)
        .bind(timestamp)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn price_history(&self, target_ids: &[TargetId]) -> Result<Vec<PriceObservation>> {
        if target_ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; target_ids.len()].join(", ");
        let sql = format!(
            "SELECT id, tracked_elements_id AS target_id, current_price AS price, timestamp
             FROM price_history
             WHERE tracked_elements_id IN ({})
             ORDER BY timestamp, id",
            placeholders
        );

        let mut query = sqlx::query_as::<_, PriceObservation>(&sql);
        for id in target_ids {
            query = query.bind(*id);
        }
        Ok(query.fetch_all(&self.pool).await?)
    }
}
