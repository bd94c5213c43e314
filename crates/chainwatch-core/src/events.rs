//! Event store contract and its in-memory implementation.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::WatchError;
use crate::types::DomainEvent;

/// Durable, deduplicating store of decoded events.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Insert a batch. Events whose `(tx_hash, log_index)` already exists are skipped.
    async fn put_batch(&self, events: &[DomainEvent]) -> Result<(), WatchError>;

    /// Delete every event recorded at `height`.
    async fn delete_by_height(&self, height: u64) -> Result<(), WatchError>;

    /// Number of events recorded at `height`.
    async fn count_at(&self, height: u64) -> Result<u64, WatchError>;
}

/// In-memory event store.
///
/// All data is lost when the process exits.
#[derive(Default)]
pub struct MemoryEventStore {
    events: Mutex<BTreeMap<(String, u32), DomainEvent>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored events.
    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().unwrap().is_empty()
    }

    /// Events at `height`, ordered by `(tx_hash, log_index)`.
    pub fn at_height(&self, height: u64) -> Vec<DomainEvent> {
        self.events
            .lock()
            .unwrap()
            .values()
            .filter(|e| e.block_number == height)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn put_batch(&self, events: &[DomainEvent]) -> Result<(), WatchError> {
        let mut stored = self.events.lock().unwrap();
        for event in events {
            stored
                .entry((event.tx_hash.clone(), event.log_index))
                .or_insert_with(|| event.clone());
        }
        Ok(())
    }

    async fn delete_by_height(&self, height: u64) -> Result<(), WatchError> {
        self.events
            .lock()
            .unwrap()
            .retain(|_, e| e.block_number != height);
        Ok(())
    }

    async fn count_at(&self, height: u64) -> Result<u64, WatchError> {
        let n = self
            .events
            .lock()
            .unwrap()
            .values()
            .filter(|e| e.block_number == height)
            .count();
        Ok(n as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EventPayload;

    fn ev(tx: &str, log_index: u32, block: u64) -> DomainEvent {
        DomainEvent {
            tx_hash: tx.into(),
            log_index,
            block_number: block,
            block_hash: format!("0x{block}"),
            address: "0xtoken".into(),
            payload: EventPayload::Transfer {
                from: "0x1".into(),
                to: "0x2".into(),
                amount: "100".into(),
            },
        }
    }

    #[tokio::test]
    async fn duplicate_identity_is_stored_once() {
        let store = MemoryEventStore::new();
        store.put_batch(&[ev("0xaa", 0, 10)]).await.unwrap();
        store.put_batch(&[ev("0xaa", 0, 10)]).await.unwrap();
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn same_tx_different_log_index_are_distinct() {
        let store = MemoryEventStore::new();
        store
            .put_batch(&[ev("0xaa", 0, 10), ev("0xaa", 1, 10)])
            .await
            .unwrap();
        assert_eq!(store.count_at(10).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn delete_by_height_only_touches_that_height() {
        let store = MemoryEventStore::new();
        store
            .put_batch(&[ev("0x1", 0, 10), ev("0x2", 0, 11), ev("0x3", 4, 11)])
            .await
            .unwrap();
        store.delete_by_height(11).await.unwrap();
        assert_eq!(store.count_at(11).await.unwrap(), 0);
        assert_eq!(store.count_at(10).await.unwrap(), 1);
        assert_eq!(store.at_height(10)[0].tx_hash, "0x1");
    }
}
