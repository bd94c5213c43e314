//! Scan engine: fetches one block's logs and decodes them.
//!
//! A scan is a pure read: one header call (unless the caller already has the
//! header) and one log call per tracked address. Entries that fail to decode
//! are dropped individually and never abort the block.

use std::sync::Arc;

use crate::decoder::DecoderRegistry;
use crate::error::WatchError;
use crate::gateway::ChainGateway;
use crate::types::{BlockRef, DomainEvent};

/// The decoded contents of one block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanResult {
    pub block: BlockRef,
    /// Decoded events, ordered by log index.
    pub events: Vec<DomainEvent>,
    /// Number of entries rejected by their decoder.
    pub dropped: usize,
}

/// Orchestrates the chain gateway and the decoder registry for one height.
pub struct ScanEngine {
    gateway: Arc<dyn ChainGateway>,
    registry: DecoderRegistry,
}

impl ScanEngine {
    pub fn new(gateway: Arc<dyn ChainGateway>, registry: DecoderRegistry) -> Self {
        Self { gateway, registry }
    }

    pub fn registry(&self) -> &DecoderRegistry {
        &self.registry
    }

    /// Fetch the header at `height`, then scan it.
    pub async fn scan(&self, height: u64) -> Result<ScanResult, WatchError> {
        let header = self.gateway.header_at(height).await?;
        self.scan_block(&header).await
    }

    /// Scan a block whose header has already been fetched.
    pub async fn scan_block(&self, block: &BlockRef) -> Result<ScanResult, WatchError> {
        let height = block.height;
        let mut events = Vec::new();
        let mut dropped = 0usize;

        for filter in self.registry.filters() {
            let entries = self.gateway.logs_in_range(height, height, &filter).await?;

            for entry in &entries {
                if entry.removed {
                    continue;
                }
                if entry.block_number != height {
                    return Err(WatchError::MalformedBlock {
                        height,
                        reason: format!("log from height {} in scan of {height}", entry.block_number),
                    });
                }
                if !entry.block_hash.eq_ignore_ascii_case(&block.hash) {
                    return Err(WatchError::MalformedBlock {
                        height,
                        reason: format!(
                            "log block hash {} does not match header {}",
                            entry.block_hash, block.hash
                        ),
                    });
                }

                match self.registry.decode(entry) {
                    Some(Ok(event)) => events.push(event),
                    Some(Err(e)) => {
                        dropped += 1;
                        tracing::warn!(
                            height,
                            tx = %entry.tx_hash,
                            log_index = entry.log_index,
                            error = %e,
                            "dropping malformed log entry"
                        );
                    }
                    None => {
                        tracing::debug!(
                            height,
                            address = %entry.address,
                            "no decoder for log entry"
                        );
                    }
                }
            }
        }

        events.sort_by_key(|e| e.log_index);
        Ok(ScanResult {
            block: block.clone(),
            events,
            dropped,
        })
    }
}
