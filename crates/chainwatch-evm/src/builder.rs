//! Fluent builder API for pipelines.
//!
//! # Example
//!
//! ```rust,no_run
//! use chainwatch_evm::IndexerBuilder;
//! use chainwatch_core::indexer::ReorgCheckPolicy;
//!
//! let config = IndexerBuilder::new()
//!     .track_transfers("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48")
//!     .lookback(50)
//!     .queue_capacity(10)
//!     .reorg_check(ReorgCheckPolicy::Durable)
//!     .build_config();
//! ```

use std::sync::Arc;

use chainwatch_core::checkpoint::CheckpointStore;
use chainwatch_core::decoder::{DecoderRegistry, EventDecoder};
use chainwatch_core::events::EventStore;
use chainwatch_core::gateway::ChainGateway;
use chainwatch_core::indexer::{BackpressureMode, IndexerConfig, ReorgCheckPolicy};
use chainwatch_core::pipeline::Pipeline;

use crate::transfer::TransferDecoder;

/// Fluent builder for `IndexerConfig` and the decoder set.
#[derive(Default)]
pub struct IndexerBuilder {
    config: IndexerConfig,
    registry: DecoderRegistry,
}

impl IndexerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration (e.g. loaded from a file).
    pub fn from_config(config: IndexerConfig) -> Self {
        Self {
            config,
            registry: DecoderRegistry::new(),
        }
    }

    /// Heights behind head to start from on an empty store.
    pub fn lookback(mut self, blocks: u64) -> Self {
        self.config.lookback = blocks;
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    /// Idle wait when caught up with the head, in milliseconds.
    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    pub fn source_retry_ms(mut self, ms: u64) -> Self {
        self.config.source_retry_ms = ms;
        self
    }

    pub fn rollback_retry(mut self, ms: u64, max_attempts: u32) -> Self {
        self.config.rollback_retry_ms = ms;
        self.config.max_rollback_attempts = max_attempts;
        self
    }

    pub fn persist_retry(mut self, ms: u64, max_attempts: u32) -> Self {
        self.config.persist_retry_ms = ms;
        self.config.max_persist_attempts = max_attempts;
        self
    }

    pub fn reorg_check(mut self, policy: ReorgCheckPolicy) -> Self {
        self.config.reorg_check = policy;
        self
    }

    pub fn backpressure(mut self, mode: BackpressureMode) -> Self {
        self.config.backpressure = mode;
        self
    }

    /// Stop after this height instead of following the chain.
    pub fn stop_at(mut self, height: u64) -> Self {
        self.config.stop_at = Some(height);
        self
    }

    /// Track ERC-20 `Transfer` events of `token`.
    pub fn track_transfers(self, token: impl AsRef<str>) -> Self {
        self.decoder(Arc::new(TransferDecoder::new(token)))
    }

    /// Register a custom decoder.
    pub fn decoder(mut self, decoder: Arc<dyn EventDecoder>) -> Self {
        self.registry.register(decoder);
        self
    }

    pub fn build_config(&self) -> IndexerConfig {
        self.config.clone()
    }

    /// Assemble a pipeline over the given gateway and stores.
    pub fn build(
        self,
        gateway: Arc<dyn ChainGateway>,
        checkpoints: Arc<dyn CheckpointStore>,
        events: Arc<dyn EventStore>,
    ) -> Pipeline {
        if self.registry.is_empty() {
            tracing::warn!("pipeline built without decoders; only checkpoints will be stored");
        }
        Pipeline::new(self.config, gateway, self.registry, checkpoints, events)
    }
}
