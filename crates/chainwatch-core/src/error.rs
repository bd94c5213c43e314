//! Error types for the chainwatch pipeline.

use thiserror::Error;

/// Errors that can occur while scanning, resolving or persisting.
#[derive(Debug, Error)]
pub enum WatchError {
    /// Transient chain gateway failure (connection, timeout, node error).
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    /// The source has not produced this height yet.
    #[error("block {height} not found at source")]
    NotFound { height: u64 },

    /// The block's data was internally inconsistent (e.g. logs from another fork).
    #[error("malformed block {height}: {reason}")]
    MalformedBlock { height: u64, reason: String },

    /// A single log entry could not be decoded.
    #[error("malformed entry: {0}")]
    MalformedEntry(#[from] DecodeError),

    /// A store write for `height` failed.
    #[error("persistence failure at height {height}: {reason}")]
    PersistenceFailure { height: u64, reason: String },

    /// The resolver could not undo the checkpoint or events at `height`.
    #[error("rollback failed at height {height}: {reason}")]
    RollbackFailed { height: u64, reason: String },

    /// A checkpoint with a different hash already exists at `height`.
    #[error("checkpoint conflict at height {height}: stored {existing}, incoming {incoming}")]
    Conflict {
        height: u64,
        existing: String,
        incoming: String,
    },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("pipeline aborted: {reason}")]
    Aborted { reason: String },
}

impl WatchError {
    /// Returns `true` if the operation should simply be retried after a delay.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::SourceUnavailable(_) | Self::MalformedBlock { .. } | Self::Storage(_)
        )
    }

    /// Returns `true` if the pipeline must halt and wait for an operator.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::PersistenceFailure { .. }
                | Self::RollbackFailed { .. }
                | Self::Config(_)
                | Self::Aborted { .. }
        )
    }
}

/// Reasons a decoder rejects a raw log entry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("expected at least {expected} topics, got {actual}")]
    MissingTopics { expected: usize, actual: usize },

    #[error("payload is {len} bytes, need at least {need}")]
    ShortPayload { len: usize, need: usize },

    #[error("invalid topic {index}: {reason}")]
    InvalidTopic { index: usize, reason: String },
}
