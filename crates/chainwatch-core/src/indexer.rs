//! Pipeline configuration and state types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backoff::Backoff;

/// Where the driver takes the expected parent hash from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReorgCheckPolicy {
    /// Compare against the cursor's optimistic hash, advanced on enqueue.
    #[default]
    InMemory,
    /// Drain the consumer and compare against the stored checkpoint.
    Durable,
}

/// What the driver does when the persistence queue is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressureMode {
    /// Wait for the consumer to free a slot.
    #[default]
    Block,
    /// Drop the scanned item, keep the cursor, back off and rescan later.
    FailFast,
}

/// Configuration for a pipeline instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    /// Heights behind head to start from when no checkpoint exists.
    pub lookback: u64,
    /// Capacity of the driver → consumer queue.
    pub queue_capacity: usize,
    /// Idle wait when the cursor is ahead of the chain head (milliseconds).
    pub poll_interval_ms: u64,
    /// Fixed delay before retrying a failed gateway call (milliseconds).
    pub source_retry_ms: u64,
    /// Fixed delay between rollback attempts (milliseconds).
    pub rollback_retry_ms: u64,
    /// Rollback attempts before the pipeline halts.
    pub max_rollback_attempts: u32,
    /// Fixed delay between persistence attempts (milliseconds).
    pub persist_retry_ms: u64,
    /// Persistence attempts per item before it is dead-lettered.
    pub max_persist_attempts: u32,
    pub reorg_check: ReorgCheckPolicy,
    pub backpressure: BackpressureMode,
    /// Stop after enqueueing this height. `None` = follow the chain forever.
    pub stop_at: Option<u64>,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            lookback: 50,
            queue_capacity: 10,
            poll_interval_ms: 3_000,
            source_retry_ms: 1_000,
            rollback_retry_ms: 1_000,
            max_rollback_attempts: 5,
            persist_retry_ms: 1_000,
            max_persist_attempts: 5,
            reorg_check: ReorgCheckPolicy::InMemory,
            backpressure: BackpressureMode::Block,
            stop_at: None,
        }
    }
}

impl IndexerConfig {
    pub fn idle_backoff(&self) -> Backoff {
        Backoff::unbounded(Duration::from_millis(self.poll_interval_ms))
    }

    pub fn source_backoff(&self) -> Backoff {
        Backoff::unbounded(Duration::from_millis(self.source_retry_ms))
    }

    pub fn rollback_backoff(&self) -> Backoff {
        Backoff::bounded(
            Duration::from_millis(self.rollback_retry_ms),
            self.max_rollback_attempts,
        )
    }

    pub fn persist_backoff(&self) -> Backoff {
        Backoff::bounded(
            Duration::from_millis(self.persist_retry_ms),
            self.max_persist_attempts,
        )
    }
}

/// State of the reorg state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexerState {
    /// Not yet started.
    Idle,
    /// The next block links to the last accepted one (or nothing is accepted yet).
    Aligned,
    /// A parent-hash mismatch was detected and is being unwound.
    Forked,
}

impl std::fmt::Display for IndexerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Aligned => write!(f, "aligned"),
            Self::Forked => write!(f, "forked"),
        }
    }
}
