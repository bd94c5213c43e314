//! Checkpoints: the durable record of each accepted block.
//!
//! One checkpoint is written per ingested height. They serve both as the
//! resume point after a restart and as the continuity anchor the reorg
//! resolver compares new blocks against.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::WatchError;
use crate::types::BlockRef;

/// A persisted checkpoint for one height.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub height: u64,
    pub block_hash: String,
    pub parent_hash: String,
    /// When the checkpoint was written.
    pub observed_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Build a checkpoint for `block`, stamped now.
    pub fn for_block(block: &BlockRef) -> Self {
        Self {
            height: block.height,
            block_hash: block.hash.clone(),
            parent_hash: block.parent_hash.clone(),
            observed_at: Utc::now(),
        }
    }
}

/// Durable mapping from height to block identity.
///
/// Implementations include `MemoryCheckpointStore`, `SqliteStorage` and
/// `PostgresStorage`.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// The checkpoint with the greatest height, if any.
    async fn highest(&self) -> Result<Option<Checkpoint>, WatchError>;

    /// Point lookup by height.
    async fn get(&self, height: u64) -> Result<Option<Checkpoint>, WatchError>;

    /// Insert a checkpoint.
    ///
    /// Re-putting the same hash at a height is a no-op; a different hash at an
    /// occupied height fails with [`WatchError::Conflict`].
    async fn put(&self, checkpoint: Checkpoint) -> Result<(), WatchError>;

    /// Remove the checkpoint at `height` (no-op if absent).
    async fn delete(&self, height: u64) -> Result<(), WatchError>;
}

/// A break in the chain-continuity invariant between `height - 1` and `height`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContinuityBreak {
    pub height: u64,
    pub expected_parent: String,
    pub actual_parent: String,
}

/// Check that every adjacent pair in `checkpoints` links parent to child.
///
/// `checkpoints` may arrive in any order; non-adjacent heights are not compared.
pub fn verify_continuity(checkpoints: &[Checkpoint]) -> Result<(), ContinuityBreak> {
    let by_height: BTreeMap<u64, &Checkpoint> =
        checkpoints.iter().map(|cp| (cp.height, cp)).collect();

    for (height, cp) in &by_height {
        let Some(prev_height) = height.checked_sub(1) else {
            continue;
        };
        if let Some(prev) = by_height.get(&prev_height) {
            if cp.parent_hash != prev.block_hash {
                return Err(ContinuityBreak {
                    height: *height,
                    expected_parent: prev.block_hash.clone(),
                    actual_parent: cp.parent_hash.clone(),
                });
            }
        }
    }
    Ok(())
}

// ─── In-memory store (for testing) ────────────────────────────────────────────

/// In-memory checkpoint store for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    data: Mutex<BTreeMap<u64, Checkpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All checkpoints in ascending height order.
    pub fn all(&self) -> Vec<Checkpoint> {
        self.data.lock().unwrap().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.data.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.lock().unwrap().is_empty()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn highest(&self) -> Result<Option<Checkpoint>, WatchError> {
        Ok(self.data.lock().unwrap().values().next_back().cloned())
    }

    async fn get(&self, height: u64) -> Result<Option<Checkpoint>, WatchError> {
        Ok(self.data.lock().unwrap().get(&height).cloned())
    }

    async fn put(&self, checkpoint: Checkpoint) -> Result<(), WatchError> {
        let mut data = self.data.lock().unwrap();
        if let Some(existing) = data.get(&checkpoint.height) {
            if existing.block_hash == checkpoint.block_hash {
                return Ok(());
            }
            return Err(WatchError::Conflict {
                height: checkpoint.height,
                existing: existing.block_hash.clone(),
                incoming: checkpoint.block_hash,
            });
        }
        data.insert(checkpoint.height, checkpoint);
        Ok(())
    }

    async fn delete(&self, height: u64) -> Result<(), WatchError> {
        self.data.lock().unwrap().remove(&height);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cp(height: u64, hash: &str, parent: &str) -> Checkpoint {
        Checkpoint::for_block(&BlockRef::new(height, hash, parent))
    }

    #[tokio::test]
    async fn memory_store_roundtrip() {
        let store = MemoryCheckpointStore::new();
        assert!(store.highest().await.unwrap().is_none());

        store.put(cp(10, "0xa", "0x9")).await.unwrap();
        store.put(cp(11, "0xb", "0xa")).await.unwrap();

        let top = store.highest().await.unwrap().unwrap();
        assert_eq!(top.height, 11);
        assert_eq!(store.get(10).await.unwrap().unwrap().block_hash, "0xa");
        assert!(store.get(12).await.unwrap().is_none());

        store.delete(11).await.unwrap();
        assert_eq!(store.highest().await.unwrap().unwrap().height, 10);
    }

    #[tokio::test]
    async fn put_same_hash_is_noop() {
        let store = MemoryCheckpointStore::new();
        store.put(cp(10, "0xa", "0x9")).await.unwrap();
        store.put(cp(10, "0xa", "0x9")).await.unwrap();
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn put_different_hash_conflicts() {
        let store = MemoryCheckpointStore::new();
        store.put(cp(10, "0xa", "0x9")).await.unwrap();
        let err = store.put(cp(10, "0xb", "0x9")).await.unwrap_err();
        assert!(matches!(err, WatchError::Conflict { height: 10, .. }));
    }

    #[test]
    fn continuity_holds_for_linked_chain() {
        let chain = vec![cp(1, "0x1", "0x0"), cp(2, "0x2", "0x1"), cp(3, "0x3", "0x2")];
        assert!(verify_continuity(&chain).is_ok());
    }

    #[test]
    fn continuity_ignores_gaps() {
        let chain = vec![cp(1, "0x1", "0x0"), cp(3, "0x3", "0xunrelated")];
        assert!(verify_continuity(&chain).is_ok());
    }

    #[test]
    fn continuity_reports_break() {
        let chain = vec![cp(2, "0x2", "0x1"), cp(1, "0x1", "0x0"), cp(3, "0x3", "0xfork")];
        let brk = verify_continuity(&chain).unwrap_err();
        assert_eq!(brk.height, 3);
        assert_eq!(brk.expected_parent, "0x2");
        assert_eq!(brk.actual_parent, "0xfork");
    }
}
