//! SQLite storage backend.
//!
//! Persists checkpoints (`block_trace`) and decoded events (`domain_event`)
//! to a single SQLite file. Uses `sqlx` with WAL mode.
//!
//! # Usage
//! ```rust,no_run
//! use chainwatch_storage::sqlite::SqliteStorage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStorage::open("./chainwatch.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStorage::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::debug;

use chainwatch_core::checkpoint::{Checkpoint, CheckpointStore};
use chainwatch_core::error::WatchError;
use chainwatch_core::events::EventStore;
use chainwatch_core::types::{DomainEvent, EventPayload};

use crate::{ensure_same_hash, storage_err};

/// SQLite-backed checkpoint and event store.
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./chainwatch.db"`) or a full
    /// SQLite URL (`"sqlite:./chainwatch.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, WatchError> {
        if path.ends_with(":memory:") {
            return Self::in_memory().await;
        }
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url).await.map_err(storage_err)?;
        let storage = Self { pool };
        storage.init_schema().await?;
        debug!(url = %url, "sqlite storage opened");
        Ok(storage)
    }

    /// Open an in-memory SQLite database, lost when dropped.
    pub async fn in_memory() -> Result<Self, WatchError> {
        // Each connection owns its own database: keep exactly one, forever.
        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .max_lifetime(None)
            .idle_timeout(None)
            .connect("sqlite::memory:")
            .await
            .map_err(storage_err)?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    async fn init_schema(&self) -> Result<(), WatchError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS block_trace (
                block_number INTEGER PRIMARY KEY,
                block_hash   TEXT    NOT NULL,
                parent_hash  TEXT    NOT NULL,
                observed_at  TEXT    NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS domain_event (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                tx_hash      TEXT    NOT NULL,
                log_index    INTEGER NOT NULL,
                block_number INTEGER NOT NULL,
                block_hash   TEXT    NOT NULL,
                address      TEXT    NOT NULL,
                schema       TEXT    NOT NULL,
                payload      TEXT    NOT NULL,
                UNIQUE (tx_hash, log_index)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_domain_event_block ON domain_event (block_number);")
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
             FROM domain_event WHERE block_number = ? ORDER BY log_index",
        )
        .bind(height as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        rows.iter().map(event_from_row).collect()
    }

    /// Total number of stored events.
    pub async fn event_count(&self) -> Result<u64, WatchError> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM domain_event")
            .fetch_one(&self.pool)
            .await
            .map_err(storage_err)?;
        let cnt: i64 = row.try_get("cnt").map_err(storage_err)?;
        Ok(cnt as u64)
    }
}

// ─── CheckpointStore impl ────────────────────────────────────────────────────

#[async_trait]
impl CheckpointStore for SqliteStorage {
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
             FROM block_trace WHERE block_number = ?",
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
             VALUES (?, ?, ?, ?)
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
        sqlx::query("DELETE FROM block_trace WHERE block_number = ?")
            .bind(height as i64)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }
}

// ─── EventStore impl ─────────────────────────────────────────────────────────

#[async_trait]
impl EventStore for SqliteStorage {
    async fn put_batch(&self, events: &[DomainEvent]) -> Result<(), WatchError> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;
        for event in events {
            let payload = serde_json::to_string(&event.payload).map_err(storage_err)?;
            sqlx::query(
                "INSERT INTO domain_event
                 (tx_hash, log_index, block_number, block_hash, address, schema, payload)
                 VALUES (?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT (tx_hash, log_index) DO NOTHING",
            )
            .bind(&event.tx_hash)
            .bind(event.log_index as i64)
            .bind(event.block_number as i64)
            .bind(&event.block_hash)
            .bind(&event.address)
            .bind(event.schema())
            .bind(&payload)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;
        }
        tx.commit().await.map_err(storage_err)?;
        debug!(count = events.len(), "event batch stored");
        Ok(())
    }

    async fn delete_by_height(&self, height: u64) -> Result<(), WatchError> {
        sqlx::query("DELETE FROM domain_event WHERE block_number = ?")
            .bind(height as i64)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn count_at(&self, height: u64) -> Result<u64, WatchError> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM domain_event WHERE block_number = ?")
            .bind(height as i64)
            .fetch_one(&self.pool)
            .await
            .map_err(storage_err)?;
        let cnt: i64 = row.try_get("cnt").map_err(storage_err)?;
        Ok(cnt as u64)
    }
}

// ─── Row mapping ─────────────────────────────────────────────────────────────

fn checkpoint_from_row(row: &SqliteRow) -> Result<Checkpoint, WatchError> {
    Ok(Checkpoint {
        height: row.try_get::<i64, _>("block_number").map_err(storage_err)? as u64,
        block_hash: row.try_get("block_hash").map_err(storage_err)?,
        parent_hash: row.try_get("parent_hash").map_err(storage_err)?,
        observed_at: row
            .try_get::<DateTime<Utc>, _>("observed_at")
            .map_err(storage_err)?,
    })
}

fn event_from_row(row: &SqliteRow) -> Result<DomainEvent, WatchError> {
    let payload: String = row.try_get("payload").map_err(storage_err)?;
    Ok(DomainEvent {
        tx_hash: row.try_get("tx_hash").map_err(storage_err)?,
        log_index: row.try_get::<i64, _>("log_index").map_err(storage_err)? as u32,
        block_number: row.try_get::<i64, _>("block_number").map_err(storage_err)? as u64,
        block_hash: row.try_get("block_hash").map_err(storage_err)?,
        address: row.try_get("address").map_err(storage_err)?,
        payload: serde_json::from_str::<EventPayload>(&payload).map_err(storage_err)?,
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────
