//! The chain gateway contract.

use async_trait::async_trait;

use crate::error::WatchError;
use crate::types::{BlockRef, LogEntry, LogFilter};

/// Read access to a remote ledger.
///
/// Implementations map transport and node errors to
/// [`WatchError::SourceUnavailable`] and a height the node has not produced
/// yet to [`WatchError::NotFound`].
#[async_trait]
pub trait ChainGateway: Send + Sync {
    /// Height of the current chain head.
    async fn latest_height(&self) -> Result<u64, WatchError>;

    /// Identity of the block at `height`.
    async fn header_at(&self, height: u64) -> Result<BlockRef, WatchError>;

    /// All logs in `[from, to]` matching `filter`.
    async fn logs_in_range(
        &self,
        from: u64,
        to: u64,
        filter: &LogFilter,
    ) -> Result<Vec<LogEntry>, WatchError>;
}
