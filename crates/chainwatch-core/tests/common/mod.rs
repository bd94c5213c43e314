//! Shared fixtures: a scripted chain, a test decoder, and misbehaving stores.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, Semaphore};

use chainwatch_core::{
    BlockRef, ChainGateway, Checkpoint, CheckpointStore, DecodeError, DecoderRegistry, DomainEvent,
    EventDecoder, EventPayload, EventStore, IndexerConfig, LogEntry, LogFilter, MemoryCheckpointStore,
    PipelineEvent, WatchError,
};

pub const TOKEN: &str = "0xfeed";
pub const PING: &str = "0xping";

pub fn hash(tag: &str, height: u64) -> String {
    format!("0x{tag}{height}")
}

// ─── ScriptedChain ────────────────────────────────────────────────────────────

struct ChainState {
    blocks: BTreeMap<u64, BlockRef>,
    /// Heights whose blocks carry no logs.
    quiet: BTreeSet<u64>,
    head: u64,
    failing_heads: u32,
    head_calls: u32,
}

/// An in-memory chain whose tip can be extended or reorged mid-test.
///
/// Every block carries one `Ping` log whose second topic is the block hash,
/// except heights marked with [`silence`](Self::silence).
pub struct ScriptedChain {
    state: Mutex<ChainState>,
}

impl ScriptedChain {
    /// Blocks `from..=to`, hashes tagged `tag`.
    pub fn linear(from: u64, to: u64, tag: &str) -> Arc<Self> {
        let chain = Arc::new(Self {
            state: Mutex::new(ChainState {
                blocks: BTreeMap::new(),
                quiet: BTreeSet::new(),
                head: to,
                failing_heads: 0,
                head_calls: 0,
            }),
        });
        chain.write_segment(from, to, tag, None);
        chain
    }

    fn write_segment(&self, from: u64, to: u64, tag: &str, parent: Option<String>) {
        let mut state = self.state.lock().unwrap();
        let mut parent = parent.unwrap_or_else(|| {
            from.checked_sub(1)
                .and_then(|h| state.blocks.get(&h).map(|b| b.hash.clone()))
                .unwrap_or_else(|| hash(tag, from.saturating_sub(1)))
        });
        for height in from..=to {
            let block = BlockRef::new(height, hash(tag, height), parent.clone());
            parent = block.hash.clone();
            state.blocks.insert(height, block);
        }
    }

    /// Replace every block from `from` upward with a `tag` branch ending at `new_head`.
    pub fn reorg(&self, from: u64, new_head: u64, tag: &str) {
        {
            let mut state = self.state.lock().unwrap();
            state.blocks.retain(|h, _| *h < from);
        }
        self.write_segment(from, new_head, tag, None);
        self.state.lock().unwrap().head = new_head;
    }

    /// Append blocks up to `new_head` on top of the current tip.
    pub fn extend(&self, new_head: u64, tag: &str) {
        let from = self.head() + 1;
        self.write_segment(from, new_head, tag, None);
        self.state.lock().unwrap().head = new_head;
    }

    /// Blocks at `heights` carry no logs.
    pub fn silence(&self, heights: &[u64]) {
        self.state.lock().unwrap().quiet.extend(heights.iter().copied());
    }

    pub fn head(&self) -> u64 {
        self.state.lock().unwrap().head
    }

    pub fn block(&self, height: u64) -> Option<BlockRef> {
        self.state.lock().unwrap().blocks.get(&height).cloned()
    }

    /// Make the next `n` head queries fail with `SourceUnavailable`.
    pub fn fail_next_heads(&self, n: u32) {
        self.state.lock().unwrap().failing_heads = n;
    }

    pub fn head_calls(&self) -> u32 {
        self.state.lock().unwrap().head_calls
    }
}

#[async_trait]
impl ChainGateway for ScriptedChain {
    async fn latest_height(&self) -> Result<u64, WatchError> {
        let mut state = self.state.lock().unwrap();
        state.head_calls += 1;
        if state.failing_heads > 0 {
            state.failing_heads -= 1;
            return Err(WatchError::SourceUnavailable("connection refused".into()));
        }
        Ok(state.head)
    }

    async fn header_at(&self, height: u64) -> Result<BlockRef, WatchError> {
        let state = self.state.lock().unwrap();
        if height > state.head {
            return Err(WatchError::NotFound { height });
        }
        state
            .blocks
            .get(&height)
            .cloned()
            .ok_or(WatchError::NotFound { height })
    }

    async fn logs_in_range(
        &self,
        from: u64,
        to: u64,
        filter: &LogFilter,
    ) -> Result<Vec<LogEntry>, WatchError> {
        let state = self.state.lock().unwrap();
        let logs = state
            .blocks
            .range(from..=to)
            .filter(|(height, _)| !state.quiet.contains(height))
            .map(|(_, block)| LogEntry {
                address: TOKEN.into(),
                topics: vec![PING.into(), block.hash.clone()],
                data: vec![],
                block_number: block.height,
                block_hash: block.hash.clone(),
                tx_hash: format!("0xtx-{}", block.hash),
                log_index: 0,
                removed: false,
            })
            .filter(|entry| filter.matches(entry))
            .collect();
        Ok(logs)
    }
}

// ─── PingDecoder ──────────────────────────────────────────────────────────────

pub struct PingDecoder;

impl EventDecoder for PingDecoder {
    fn schema(&self) -> &str {
        "Ping"
    }
    fn address(&self) -> &str {
        TOKEN
    }
    fn topic0(&self) -> &str {
        PING
    }
    fn indexed_count(&self) -> usize {
        1
    }
    fn decode(&self, entry: &LogEntry) -> Result<DomainEvent, DecodeError> {
        let Some(origin) = entry.topics.get(1) else {
            return Err(DecodeError::MissingTopics {
                expected: 2,
                actual: entry.topics.len(),
            });
        };
        Ok(DomainEvent {
            tx_hash: entry.tx_hash.clone(),
            log_index: entry.log_index,
            block_number: entry.block_number,
            block_hash: entry.block_hash.clone(),
            address: entry.address.clone(),
            payload: EventPayload::Custom {
                schema: "Ping".into(),
                fields: serde_json::json!({ "origin": origin }),
            },
        })
    }
}

pub fn registry() -> DecoderRegistry {
    DecoderRegistry::new().with(Arc::new(PingDecoder))
}

pub fn fast_config() -> IndexerConfig {
    IndexerConfig {
        poll_interval_ms: 5,
        source_retry_ms: 2,
        rollback_retry_ms: 2,
        persist_retry_ms: 2,
        max_rollback_attempts: 3,
        max_persist_attempts: 3,
        ..IndexerConfig::default()
    }
}

// ─── Misbehaving stores ───────────────────────────────────────────────────────

/// Checkpoint store whose `put` blocks until the test opens the gate.
pub struct GatedCheckpoints {
    pub inner: MemoryCheckpointStore,
    gate: Semaphore,
}

impl GatedCheckpoints {
    pub fn closed() -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryCheckpointStore::new(),
            gate: Semaphore::new(0),
        })
    }

    pub fn open(&self) {
        self.gate.add_permits(Semaphore::MAX_PERMITS / 2);
    }
}

#[async_trait]
impl CheckpointStore for GatedCheckpoints {
    async fn highest(&self) -> Result<Option<Checkpoint>, WatchError> {
        self.inner.highest().await
    }
    async fn get(&self, height: u64) -> Result<Option<Checkpoint>, WatchError> {
        self.inner.get(height).await
    }
    async fn put(&self, checkpoint: Checkpoint) -> Result<(), WatchError> {
        self.gate
            .acquire()
            .await
            .map_err(|e| WatchError::Storage(e.to_string()))?
            .forget();
        self.inner.put(checkpoint).await
    }
    async fn delete(&self, height: u64) -> Result<(), WatchError> {
        self.inner.delete(height).await
    }
}

/// Checkpoint store that rejects writes at one height until healed.
pub struct FlakyCheckpoints {
    pub inner: MemoryCheckpointStore,
    reject_at: Mutex<Option<u64>>,
}

impl FlakyCheckpoints {
    pub fn rejecting(height: u64) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryCheckpointStore::new(),
            reject_at: Mutex::new(Some(height)),
        })
    }

    pub fn heal(&self) {
        *self.reject_at.lock().unwrap() = None;
    }
}

#[async_trait]
impl CheckpointStore for FlakyCheckpoints {
    async fn highest(&self) -> Result<Option<Checkpoint>, WatchError> {
        self.inner.highest().await
    }
    async fn get(&self, height: u64) -> Result<Option<Checkpoint>, WatchError> {
        self.inner.get(height).await
    }
    async fn put(&self, checkpoint: Checkpoint) -> Result<(), WatchError> {
        if *self.reject_at.lock().unwrap() == Some(checkpoint.height) {
            return Err(WatchError::Storage("disk I/O error".into()));
        }
        self.inner.put(checkpoint).await
    }
    async fn delete(&self, height: u64) -> Result<(), WatchError> {
        self.inner.delete(height).await
    }
}

/// Checkpoint store that rejects every write.
#[derive(Default)]
pub struct ReadOnlyCheckpoints {
    pub attempts: Mutex<u32>,
}

#[async_trait]
impl CheckpointStore for ReadOnlyCheckpoints {
    async fn highest(&self) -> Result<Option<Checkpoint>, WatchError> {
        Ok(None)
    }
    async fn get(&self, _height: u64) -> Result<Option<Checkpoint>, WatchError> {
        Ok(None)
    }
    async fn put(&self, _checkpoint: Checkpoint) -> Result<(), WatchError> {
        *self.attempts.lock().unwrap() += 1;
        Err(WatchError::Storage("database is read-only".into()))
    }
    async fn delete(&self, _height: u64) -> Result<(), WatchError> {
        Ok(())
    }
}

/// Event store whose deletes always fail.
#[derive(Default)]
pub struct UndeletableEvents {
    pub delete_attempts: Mutex<u32>,
}

#[async_trait]
impl EventStore for UndeletableEvents {
    async fn put_batch(&self, _events: &[DomainEvent]) -> Result<(), WatchError> {
        Ok(())
    }
    async fn delete_by_height(&self, _height: u64) -> Result<(), WatchError> {
        *self.delete_attempts.lock().unwrap() += 1;
        Err(WatchError::Storage("foreign key violation".into()))
    }
    async fn count_at(&self, _height: u64) -> Result<u64, WatchError> {
        Ok(0)
    }
}

// ─── Event helpers ────────────────────────────────────────────────────────────

/// Receive until `pred` matches, collecting everything seen on the way.
pub async fn wait_for<F>(
    rx: &mut broadcast::Receiver<PipelineEvent>,
    seen: &mut Vec<PipelineEvent>,
    mut pred: F,
) -> PipelineEvent
where
    F: FnMut(&PipelineEvent) -> bool,
{
    let wait = async {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    seen.push(event.clone());
                    if pred(&event) {
                        return event;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("pipeline closed its observer"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(10), wait)
        .await
        .expect("timed out waiting for pipeline event")
}

/// Everything currently buffered on the receiver.
pub fn drain_now(rx: &mut broadcast::Receiver<PipelineEvent>) -> Vec<PipelineEvent> {
    let mut out = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => out.push(event),
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => return out,
        }
    }
}

pub fn scanned(event: &PipelineEvent) -> bool {
    matches!(event, PipelineEvent::ScanSuccess { .. } | PipelineEvent::ScanEmpty { .. })
}
