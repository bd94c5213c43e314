//! In-memory backend.
//!
//! The stores live in `chainwatch-core` so the pipeline's own tests can use
//! them; this module re-exports them next to the persistent backends.

pub use chainwatch_core::checkpoint::MemoryCheckpointStore;
pub use chainwatch_core::events::MemoryEventStore;
