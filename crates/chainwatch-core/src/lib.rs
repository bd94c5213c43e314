//! chainwatch-core: reorg-aware scanning and checkpointing pipeline.
//!
//! # Architecture
//!
//! ```text
//! Pipeline::run
//!   ├── Driver (producer)
//!   │     ├── ChainGateway      (head, headers, logs)
//!   │     ├── Alignment check   (parent hash vs. last accepted hash)
//!   │     ├── ReorgResolver     (single-step unwind)
//!   │     └── ScanEngine        (DecoderRegistry → DomainEvent)
//!   │            │
//!   │      bounded mpsc queue
//!   │            ▼
//!   └── Consumer
//!         ├── EventStore        (idempotent batch insert)
//!         └── CheckpointStore   (one checkpoint per height)
//! ```

pub mod backoff;
pub mod checkpoint;
pub mod cursor;
pub mod decoder;
pub mod error;
pub mod events;
pub mod gateway;
pub mod indexer;
pub mod pipeline;
pub mod reorg;
pub mod scan;
pub mod types;

pub use backoff::Backoff;
pub use checkpoint::{verify_continuity, Checkpoint, CheckpointStore, ContinuityBreak, MemoryCheckpointStore};
pub use cursor::Cursor;
pub use decoder::{DecoderKey, DecoderRegistry, EventDecoder};
pub use error::{DecodeError, WatchError};
pub use events::{EventStore, MemoryEventStore};
pub use gateway::ChainGateway;
pub use indexer::{BackpressureMode, IndexerConfig, IndexerState, ReorgCheckPolicy};
pub use pipeline::{DeadLetter, DeadLetterQueue, Pipeline, PipelineEvent, PipelineReport, Progress, WorkItem};
pub use reorg::{Alignment, ReorgEvent, ReorgResolver};
pub use scan::{ScanEngine, ScanResult};
pub use types::{BlockRef, DomainEvent, EventPayload, LogEntry, LogFilter};
