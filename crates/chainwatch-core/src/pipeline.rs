//! The ingestion pipeline: one driver, one persistence consumer.
//!
//! # Driver (producer)
//! Per iteration:
//!   - Read the chain head; idle if the cursor is past it
//!   - Fetch the header at `next_height` and check its parent link
//!   - On a fork: drain the consumer, unwind one height, retry
//!   - Otherwise scan the block, enqueue it, and advance the cursor
//!     before the consumer confirms persistence
//!
//! # Consumer
//! Dequeues items in order and writes events, then the checkpoint. A failed
//! item is retried with a fixed delay; once the attempts are spent it is
//! dead-lettered and the pipeline halts, so the durable tail never skips a
//! height.
//!
//! The queue is bounded: at most `queue_capacity` items wait in it and one
//! more is in flight at the consumer, which caps how far the cursor can run
//! ahead of the last stored checkpoint.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};

use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::cursor::Cursor;
use crate::decoder::DecoderRegistry;
use crate::error::WatchError;
use crate::events::EventStore;
use crate::gateway::ChainGateway;
use crate::indexer::{BackpressureMode, IndexerConfig, IndexerState, ReorgCheckPolicy};
use crate::reorg::{Alignment, ReorgEvent, ReorgResolver};
use crate::scan::ScanEngine;
use crate::types::{BlockRef, DomainEvent};

const OBSERVER_CAPACITY: usize = 1_024;

/// One scanned block on its way to the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub block: BlockRef,
    pub events: Vec<DomainEvent>,
}

/// Observable pipeline signals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    IdleWait { next_height: u64, head: Option<u64> },
    ScanSuccess { height: u64, events: usize },
    ScanEmpty { height: u64 },
    ReorgDetected { height: u64, expected: String, actual: String },
    RollbackComplete { unwound_height: u64, next_height: u64 },
    Persisted { height: u64, events: usize },
    PersistenceFailure { height: u64, attempt: u32, error: String },
    DeadLettered { height: u64 },
}

/// A work item that exhausted its persistence attempts.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub item: WorkItem,
    pub error: String,
}

/// Shared handle to the items the consumer gave up on.
#[derive(Debug, Clone, Default)]
pub struct DeadLetterQueue {
    inner: Arc<Mutex<Vec<DeadLetter>>>,
}

impl DeadLetterQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, letter: DeadLetter) {
        self.inner.lock().unwrap().push(letter);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }

    /// Remove and return all dead letters.
    pub fn drain(&self) -> Vec<DeadLetter> {
        std::mem::take(&mut *self.inner.lock().unwrap())
    }
}

/// Final position of a pipeline that stopped without a fatal error.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub cursor: Cursor,
    pub state: IndexerState,
    /// Highest stored checkpoint after the consumer drained.
    pub durable_tail: Option<u64>,
    pub dead_letters: Vec<DeadLetter>,
}

/// What the consumer has made durable so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Items persisted since the pipeline started.
    pub persisted: u64,
}

/// Reorg-aware ingestion pipeline.
pub struct Pipeline {
    config: IndexerConfig,
    gateway: Arc<dyn ChainGateway>,
    scanner: ScanEngine,
    checkpoints: Arc<dyn CheckpointStore>,
    events: Arc<dyn EventStore>,
    observer: broadcast::Sender<PipelineEvent>,
    dead_letters: DeadLetterQueue,
}

impl Pipeline {
    pub fn new(
        config: IndexerConfig,
        gateway: Arc<dyn ChainGateway>,
        registry: DecoderRegistry,
        checkpoints: Arc<dyn CheckpointStore>,
        events: Arc<dyn EventStore>,
    ) -> Self {
        let (observer, _) = broadcast::channel(OBSERVER_CAPACITY);
        Self {
            scanner: ScanEngine::new(gateway.clone(), registry),
            config,
            gateway,
            checkpoints,
            events,
            observer,
            dead_letters: DeadLetterQueue::new(),
        }
    }

    /// Subscribe to pipeline signals. Call before [`run`](Self::run).
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.observer.subscribe()
    }

    /// Handle to the dead-letter queue; stays valid after `run` returns.
    pub fn dead_letters(&self) -> DeadLetterQueue {
        self.dead_letters.clone()
    }

    /// Rebuild the cursor from the checkpoint store.
    ///
    /// With no checkpoint, tracking starts `lookback` heights below the head.
    pub async fn recover(&self) -> Result<Cursor, WatchError> {
        if let Some(cp) = self.checkpoints.highest().await? {
            tracing::info!(height = cp.height, hash = %cp.block_hash, "resuming from checkpoint");
            return Ok(Cursor::resume_from(&cp));
        }

        let backoff = self.config.source_backoff();
        let head = loop {
            match self.gateway.latest_height().await {
                Ok(head) => break head,
                Err(e) if e.is_transient() => {
                    tracing::warn!(error = %e, "head unavailable at startup, retrying");
                    backoff.wait().await;
                }
                Err(e) => return Err(e),
            }
        };
        let start = head.saturating_sub(self.config.lookback);
        tracing::info!(head, start, lookback = self.config.lookback, "first start, no checkpoint");
        Ok(Cursor::at_origin(start))
    }

    /// Run until `shutdown` flips to `true`, `stop_at` is passed, or a fatal error.
    ///
    /// Always waits for the consumer to drain before returning.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<PipelineReport, WatchError> {
        let cursor = self.recover().await?;

        let (tx, rx) = mpsc::channel(self.config.queue_capacity.max(1));
        let (progress_tx, progress_rx) = watch::channel(Progress { persisted: 0 });

        let consumer = Consumer {
            checkpoints: self.checkpoints.clone(),
            events: self.events.clone(),
            config: self.config.clone(),
            observer: self.observer.clone(),
            progress: progress_tx,
            dead_letters: self.dead_letters.clone(),
        };
        let handle = tokio::spawn(consumer.run(rx));

        let mut driver = Driver {
            resolver: ReorgResolver::new(self.checkpoints.clone(), self.events.clone()),
            config: self.config,
            gateway: self.gateway,
            scanner: self.scanner,
            checkpoints: self.checkpoints.clone(),
            observer: self.observer,
            cursor,
            state: IndexerState::Idle,
            tx,
            progress: progress_rx,
            enqueued: 0,
            shutdown,
        };
        let driver_result = driver.run().await;
        let Driver { cursor, state, tx, .. } = driver;

        // Closing the queue lets the consumer finish what is already in it.
        drop(tx);
        tracing::info!(next_height = cursor.next_height, "driver stopped, draining consumer");
        let consumer_result = match handle.await {
            Ok(result) => result,
            Err(e) => Err(WatchError::Aborted {
                reason: format!("consumer task: {e}"),
            }),
        };

        match (driver_result, consumer_result) {
            (_, Err(e)) | (Err(e), Ok(())) => {
                tracing::error!(error = %e, "pipeline halted");
                Err(e)
            }
            (Ok(()), Ok(())) => {
                let durable_tail = self.checkpoints.highest().await?.map(|cp| cp.height);
                tracing::info!(
                    next_height = cursor.next_height,
                    durable_tail,
                    state = %state,
                    "pipeline stopped"
                );
                Ok(PipelineReport {
                    cursor,
                    state,
                    durable_tail,
                    dead_letters: self.dead_letters.drain(),
                })
            }
        }
    }
}

// ─── Driver ───────────────────────────────────────────────────────────────────

struct Driver {
    config: IndexerConfig,
    gateway: Arc<dyn ChainGateway>,
    scanner: ScanEngine,
    resolver: ReorgResolver,
    checkpoints: Arc<dyn CheckpointStore>,
    observer: broadcast::Sender<PipelineEvent>,
    cursor: Cursor,
    state: IndexerState,
    tx: mpsc::Sender<WorkItem>,
    progress: watch::Receiver<Progress>,
    /// Number of items handed to the consumer.
    enqueued: u64,
    shutdown: watch::Receiver<bool>,
}

enum Enqueue {
    Sent,
    Full,
    Shutdown,
}

impl Driver {
    async fn run(&mut self) -> Result<(), WatchError> {
        self.state = IndexerState::Aligned;
        let idle = self.config.idle_backoff();
        let source = self.config.source_backoff();

        loop {
            if *self.shutdown.borrow() {
                tracing::info!("shutdown requested");
                return Ok(());
            }
            if let Some(stop) = self.config.stop_at {
                if self.cursor.next_height > stop {
                    tracing::info!(stop_at = stop, "reached stop height");
                    return Ok(());
                }
            }
            if self.tx.is_closed() {
                return Err(consumer_gone());
            }

            let next = self.cursor.next_height;

            let head = match self.gateway.latest_height().await {
                Ok(head) => head,
                Err(e) if e.is_transient() => {
                    tracing::warn!(error = %e, "head unavailable, retrying");
                    self.pause(source.delay).await;
                    continue;
                }
                Err(e) => return Err(e),
            };
            if next > head {
                self.idle_wait(Some(head), idle.delay).await;
                continue;
            }

            let header = match self.gateway.header_at(next).await {
                Ok(header) => header,
                Err(WatchError::NotFound { .. }) => {
                    self.idle_wait(Some(head), idle.delay).await;
                    continue;
                }
                Err(e) if e.is_transient() => {
                    tracing::warn!(height = next, error = %e, "header unavailable, retrying");
                    self.pause(source.delay).await;
                    continue;
                }
                Err(e) => return Err(e),
            };

            let expected = match self.expected_parent().await {
                Ok(expected) => expected,
                Err(e) if e.is_transient() => {
                    tracing::warn!(height = next, error = %e, "expected parent unavailable, retrying");
                    self.pause(source.delay).await;
                    continue;
                }
                Err(e) => return Err(e),
            };

            if let Alignment::Forked { expected, actual } = Alignment::check(expected.as_deref(), &header) {
                self.state = IndexerState::Forked;
                tracing::warn!(
                    height = next,
                    expected = %expected,
                    actual = %actual,
                    "reorg detected"
                );
                self.emit(PipelineEvent::ReorgDetected {
                    height: next,
                    expected,
                    actual,
                });
                // The consumer may still hold the height about to be unwound.
                self.drain().await?;
                let event = self.rollback().await?;
                self.state = IndexerState::Aligned;
                self.emit(PipelineEvent::RollbackComplete {
                    unwound_height: event.unwound_height,
                    next_height: self.cursor.next_height,
                });
                continue;
            }

            let scanned = match self.scanner.scan_block(&header).await {
                Ok(scanned) => scanned,
                Err(WatchError::NotFound { .. }) => {
                    self.idle_wait(Some(head), idle.delay).await;
                    continue;
                }
                Err(e) if e.is_transient() => {
                    tracing::warn!(height = next, error = %e, "scan failed, retrying");
                    self.pause(source.delay).await;
                    continue;
                }
                Err(e) => return Err(e),
            };

            let events = scanned.events.len();
            let item = WorkItem {
                block: scanned.block,
                events: scanned.events,
            };
            match self.enqueue(item).await? {
                Enqueue::Sent => {}
                Enqueue::Full => {
                    tracing::warn!(height = next, "queue full, backing off");
                    self.pause(idle.delay).await;
                    continue;
                }
                Enqueue::Shutdown => {
                    tracing::info!(height = next, "shutdown while waiting for queue space");
                    return Ok(());
                }
            }

            if events == 0 {
                tracing::debug!(height = next, "scanned empty block");
                self.emit(PipelineEvent::ScanEmpty { height: next });
            } else {
                tracing::info!(height = next, events, "scanned block");
                self.emit(PipelineEvent::ScanSuccess { height: next, events });
            }
            self.cursor.advance(header.hash);
        }
    }

    /// The hash the next header's parent must match.
    async fn expected_parent(&mut self) -> Result<Option<String>, WatchError> {
        match self.config.reorg_check {
            ReorgCheckPolicy::InMemory => Ok(self.cursor.last_accepted_hash.clone()),
            ReorgCheckPolicy::Durable => {
                let Some(height) = self.cursor.last_accepted_height() else {
                    return Ok(None);
                };
                self.drain().await?;
                let stored = self.checkpoints.get(height).await?;
                Ok(stored
                    .map(|cp| cp.block_hash)
                    .or_else(|| self.cursor.last_accepted_hash.clone()))
            }
        }
    }

    async fn enqueue(&mut self, item: WorkItem) -> Result<Enqueue, WatchError> {
        let sent = match self.config.backpressure {
            BackpressureMode::Block => {
                tokio::select! {
                    sent = self.tx.send(item) => {
                        sent.map_err(|_| consumer_gone())?;
                        Enqueue::Sent
                    }
                    _ = wait_for_shutdown(&mut self.shutdown) => Enqueue::Shutdown,
                }
            }
            BackpressureMode::FailFast => match self.tx.try_send(item) {
                Ok(()) => Enqueue::Sent,
                Err(mpsc::error::TrySendError::Full(_)) => Enqueue::Full,
                Err(mpsc::error::TrySendError::Closed(_)) => return Err(consumer_gone()),
            },
        };
        if matches!(sent, Enqueue::Sent) {
            self.enqueued += 1;
        }
        Ok(sent)
    }

    /// Wait until the consumer has persisted every enqueued item.
    async fn drain(&mut self) -> Result<(), WatchError> {
        let target = self.enqueued;
        let drained = self.progress.wait_for(|p| p.persisted >= target).await.is_ok();
        if drained {
            Ok(())
        } else {
            Err(consumer_gone())
        }
    }

    async fn rollback(&mut self) -> Result<ReorgEvent, WatchError> {
        let backoff = self.config.rollback_backoff();
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.resolver.resolve(&mut self.cursor).await {
                Ok(event) => return Ok(event),
                Err(e) => match backoff.next_delay(attempt) {
                    Some(delay) => {
                        tracing::error!(attempt, error = %e, "rollback failed, retrying");
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        tracing::error!(attempt, error = %e, "rollback attempts exhausted");
                        return Err(e);
                    }
                },
            }
        }
    }

    async fn idle_wait(&mut self, head: Option<u64>, delay: Duration) {
        tracing::debug!(next_height = self.cursor.next_height, ?head, "waiting for new blocks");
        self.emit(PipelineEvent::IdleWait {
            next_height: self.cursor.next_height,
            head,
        });
        self.pause(delay).await;
    }

    /// Sleep for `delay`, waking early on shutdown.
    async fn pause(&mut self, delay: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = wait_for_shutdown(&mut self.shutdown) => {}
        }
    }

    fn emit(&self, event: PipelineEvent) {
        // No subscribers is fine.
        let _ = self.observer.send(event);
    }
}

/// Resolves once shutdown is requested; never resolves if the sender is gone.
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    let closed = shutdown.wait_for(|stop| *stop).await.is_err();
    if closed {
        std::future::pending::<()>().await;
    }
}

fn consumer_gone() -> WatchError {
    WatchError::Aborted {
        reason: "persistence consumer stopped".into(),
    }
}

// ─── Consumer ─────────────────────────────────────────────────────────────────

struct Consumer {
    checkpoints: Arc<dyn CheckpointStore>,
    events: Arc<dyn EventStore>,
    config: IndexerConfig,
    observer: broadcast::Sender<PipelineEvent>,
    progress: watch::Sender<Progress>,
    dead_letters: DeadLetterQueue,
}

impl Consumer {
    async fn run(self, mut rx: mpsc::Receiver<WorkItem>) -> Result<(), WatchError> {
        while let Some(item) = rx.recv().await {
            if let Err(e) = self.persist_with_retry(item).await {
                rx.close();
                let mut abandoned = 0usize;
                while rx.recv().await.is_some() {
                    abandoned += 1;
                }
                if abandoned > 0 {
                    tracing::error!(abandoned, "discarding queued items after persistence failure");
                }
                return Err(e);
            }
        }
        tracing::debug!("consumer drained");
        Ok(())
    }

    async fn persist_with_retry(&self, item: WorkItem) -> Result<(), WatchError> {
        let height = item.block.height;
        let backoff = self.config.persist_backoff();
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.persist(&item).await {
                Ok(()) => {
                    self.progress.send_modify(|p| p.persisted += 1);
                    tracing::info!(height, events = item.events.len(), "progress saved");
                    let _ = self.observer.send(PipelineEvent::Persisted {
                        height,
                        events: item.events.len(),
                    });
                    return Ok(());
                }
                Err(e) => {
                    tracing::error!(height, attempt, error = %e, "persistence failed");
                    let _ = self.observer.send(PipelineEvent::PersistenceFailure {
                        height,
                        attempt,
                        error: e.to_string(),
                    });
                    match backoff.next_delay(attempt) {
                        Some(delay) => tokio::time::sleep(delay).await,
                        None => {
                            let reason = e.to_string();
                            self.dead_letters.push(DeadLetter {
                                item,
                                error: reason.clone(),
                            });
                            let _ = self.observer.send(PipelineEvent::DeadLettered { height });
                            return Err(WatchError::PersistenceFailure { height, reason });
                        }
                    }
                }
            }
        }
    }

    /// Events first, then the checkpoint that vouches for them.
    ///
    /// A height is only enqueued while it has no checkpoint, so any events
    /// already stored there belong to an earlier unconfirmed write, possibly
    /// of a block that has since been reorged out. They are cleared first.
    async fn persist(&self, item: &WorkItem) -> Result<(), WatchError> {
        let height = item.block.height;
        let stale = self.events.count_at(height).await?;
        if stale > 0 {
            tracing::debug!(height, stale, "clearing events left by an unconfirmed write");
            self.events.delete_by_height(height).await?;
        }
        if !item.events.is_empty() {
            self.events.put_batch(&item.events).await?;
        }
        self.checkpoints.put(Checkpoint::for_block(&item.block)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dead_letter_queue_drains() {
        let queue = DeadLetterQueue::new();
        let handle = queue.clone();
        queue.push(DeadLetter {
            item: WorkItem {
                block: BlockRef::new(1, "0x1", "0x0"),
                events: vec![],
            },
            error: "boom".into(),
        });
        assert_eq!(handle.len(), 1);
        let letters = handle.drain();
        assert_eq!(letters[0].item.block.height, 1);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn wait_for_shutdown_resolves_on_signal() {
        let (tx, mut rx) = watch::channel(false);
        let waiter = tokio::spawn(async move { wait_for_shutdown(&mut rx).await });
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
