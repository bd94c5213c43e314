//! PostgreSQL storage backend.
//!
//! # Feature Flag
//! Requires the `postgres` feature:
//! ```toml
//! chainwatch-storage = { version = "0.1", features = ["postgres"] }
//! ```
//!
//! # Schema
//! Created automatically on first connect:
//! - `block_trace`: one checkpoint per height
//! - `domain_event`: decoded events, unique on `(tx_hash, log_index)`

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, info};

use chainwatch_core::checkpoint::{Checkpoint, CheckpointStore};
use chainwatch_core::error::WatchError;
use chainwatch_core::events::EventStore;
use chainwatch_core::types::{DomainEvent, EventPayload};

use crate::{ensure_same_hash, storage_err};

// ─── Connection options ────────────────────────────────────────────────────────

/// Connection pool options.
#[derive(Debug, Clone)]
pub struct PostgresOptions {
    /// Maximum number of connections in the pool (default: 10)
    pub max_connections: u32,
    /// Minimum number of idle connections to keep open (default: 1)
    pub min_connections: u32,
    /// Connection timeout in seconds (default: 30)
    pub connect_timeout_secs: u64,
}

impl Default for PostgresOptions {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            connect_timeout_secs: 30,
        }
    }
}

// ─── PostgresStorage ─────────────────────────────────────────────────────────

/// PostgreSQL-backed checkpoint and event store.
#[derive(Clone)]
pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    /// Connect with default pool options and initialize the schema.
    pub async fn connect(database_url: &str) -> Result<Self, WatchError> {
        Self::connect_with_options(database_url, PostgresOptions::default()).await
    }

    pub async fn connect_with_options(
        database_url: &str,
        opts: PostgresOptions,
    ) -> Result<Self, WatchError> {
        let pool = PgPoolOptions::new()
            .max_connections(opts.max_connections)
            .min_connections(opts.min_connections)
            .acquire_timeout(std::time::Duration::from_secs(opts.connect_timeout_secs))
            .connect(database_url)
            .await
            .map_err(|e| WatchError::Storage(format!("postgres connect: {e}")))?;

        let storage = Self { pool };
        storage.init_schema().await?;
        info!("postgres storage connected");
        Ok(storage)
    }

    async fn init_schema(&self) -> Result<(), WatchError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS block_trace (
                block_number BIGINT      PRIMARY KEY,
                block_hash   VARCHAR(66) NOT NULL,
                parent_hash  VARCHAR(66) NOT NULL,
                observed_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS domain_event (
                id           BIGSERIAL   PRIMARY KEY,
                tx_hash      VARCHAR(66) NOT NULL,
                log_index    BIGINT      NOT NULL,
                block_number BIGINT      NOT NULL,
                block_hash   VARCHAR(66) NOT NULL,
                address      VARCHAR(42) NOT NULL,
                schema       TEXT        NOT NULL,
                payload      JSONB       NOT NULL,
                created_at   TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                UNIQUE (tx_hash, log_index)
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_domain_event_block ON domain_event (block_number)")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        Ok(())
    }

    /// All checkpoints in ascending height order.
    pub async fn checkpoints(&self) -> Result<Vec<Checkpoint>, WatchError> {
        let rows = sqlx::query(
            "SELECT block_number, block_hash, parent_hash, observed_at
             FROM block_trace ORDER BY block_number",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        rows.iter().map(checkpoint_from_row).collect()
    }

    /// Events stored for `height`, ordered by log index.
    pub async fn events_at(&self, height: u64) -> Result<Vec<DomainEvent>, WatchError> {
        let rows = sqlx::query(
            "SELECT tx_hash, log_index, block_number, block_hash, address, payload
             FROM domain_event WHERE block_number = $1 ORDER BY log_index",
        )
        .bind(height as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        rows.iter().map(event_from_row).collect()
    }
}

#[async_trait]
impl CheckpointStore for PostgresStorage {
    async fn highest(&self) -> Result<Option<Checkpoint>, WatchError> {
        let row = sqlx::query(
            "SELECT block_number, block_hash, parent_hash, observed_at
             FROM block_trace ORDER BY block_number DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        row.as_ref().map(checkpoint_from_row).transpose()
    }

    async fn get(&self, height: u64) -> Result<Option<Checkpoint>, WatchError> {
        let row = sqlx::query(
            "SELECT block_number, block_hash, parent_hash, observed_at
             FROM block_trace WHERE block_number = $1",
        )
        .bind(height as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        row.as_ref().map(checkpoint_from_row).transpose()
    }

    async fn put(&self, checkpoint: Checkpoint) -> Result<(), WatchError> {
        let inserted = sqlx::query(
            "INSERT INTO block_trace (block_number, block_hash, parent_hash, observed_at)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (block_number) DO NOTHING",
        )
        .bind(checkpoint.height as i64)
        .bind(&checkpoint.block_hash)
        .bind(&checkpoint.parent_hash)
        .bind(checkpoint.observed_at)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?
        .rows_affected();

        if inserted == 0 {
            return ensure_same_hash(self.get(checkpoint.height).await?, &checkpoint);
        }
        debug!(height = checkpoint.height, hash = %checkpoint.block_hash, "checkpoint saved");
        Ok(())
    }

    async fn delete(&self, height: u64) -> Result<(), WatchError> {
        sqlx::query("DELETE FROM block_trace WHERE block_number = $1")
            .bind(height as i64)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }
}

#[async_trait]
impl EventStore for PostgresStorage {
    async fn put_batch(&self, events: &[DomainEvent]) -> Result<(), WatchError> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;
        for event in events {
            let payload = serde_json::to_value(&event.payload).map_err(storage_err)?;
            sqlx::query(
                "INSERT INTO domain_event
                 (tx_hash, log_index, block_number, block_hash, address, schema, payload)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)
                 ON CONFLICT (tx_hash, log_index) DO NOTHING",
            )
            .bind(&event.tx_hash)
            .bind(event.log_index as i64)
            .bind(event.block_number as i64)
            .bind(&event.block_hash)
            .bind(&event.address)
            .bind(event.schema())
            .bind(payload)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;
        }
        tx.commit().await.map_err(storage_err)?;
        debug!(count = events.len(), "event batch stored");
        Ok(())
    }

    async fn delete_by_height(&self, height: u64) -> Result<(), WatchError> {
        sqlx::query("DELETE FROM domain_event WHERE block_number = $1")
            .bind(height as i64)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn count_at(&self, height: u64) -> Result<u64, WatchError> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM domain_event WHERE block_number = $1")
            .bind(height as i64)
            .fetch_one(&self.pool)
            .await
            .map_err(storage_err)?;
        let cnt: i64 = row.try_get("cnt").map_err(storage_err)?;
        Ok(cnt as u64)
    }
}

fn checkpoint_from_row(row: &PgRow) -> Result<Checkpoint, WatchError> {
    Ok(Checkpoint {
        height: row.try_get::<i64, _>("block_number").map_err(storage_err)? as u64,
        block_hash: row.try_get("block_hash").map_err(storage_err)?,
        parent_hash: row.try_get("parent_hash").map_err(storage_err)?,
        observed_at: row
            .try_get::<DateTime<Utc>, _>("observed_at")
            .map_err(storage_err)?,
    })
}

fn event_from_row(row: &PgRow) -> Result<DomainEvent, WatchError> {
    let payload: serde_json::Value = row.try_get("payload").map_err(storage_err)?;
    Ok(DomainEvent {
        tx_hash: row.try_get("tx_hash").map_err(storage_err)?,
        log_index: row.try_get::<i64, _>("log_index").map_err(storage_err)? as u32,
        block_number: row.try_get::<i64, _>("block_number").map_err(storage_err)? as u64,
        block_hash: row.try_get("block_hash").map_err(storage_err)?,
        address: row.try_get("address").map_err(storage_err)?,
        payload: serde_json::from_value::<EventPayload>(payload).map_err(storage_err)?,
    })
}
