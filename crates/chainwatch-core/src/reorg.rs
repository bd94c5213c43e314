//! Reorg detection and single-step rollback.
//!
//! The resolver is a two-state machine:
//! - **Aligned**: the next block's parent hash equals the last accepted hash,
//!   or nothing has been accepted yet.
//! - **Forked**: the parent hash differs.
//!
//! Resolving a fork undoes exactly one height: the events and checkpoint at
//! `next_height - 1` are deleted and the cursor steps back onto the stored
//! checkpoint below it. A reorg N blocks deep converges after N resolutions,
//! because the driver re-checks alignment on every iteration. The procedure
//! reads only the checkpoint store, so a crash mid-unwind is re-detected and
//! re-resolved from the stored tail on the next start.

use std::sync::Arc;

use crate::checkpoint::CheckpointStore;
use crate::cursor::Cursor;
use crate::error::WatchError;
use crate::events::EventStore;
use crate::types::BlockRef;

/// Outcome of comparing a fetched header against the expected parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Alignment {
    Aligned,
    Forked { expected: String, actual: String },
}

impl Alignment {
    /// Compare `header.parent_hash` with `expected`.
    ///
    /// With no expected hash (tracking origin) the header is always aligned.
    pub fn check(expected: Option<&str>, header: &BlockRef) -> Self {
        match expected {
            Some(expected) if !expected.eq_ignore_ascii_case(&header.parent_hash) => {
                Self::Forked {
                    expected: expected.to_string(),
                    actual: header.parent_hash.clone(),
                }
            }
            _ => Self::Aligned,
        }
    }

    pub fn is_forked(&self) -> bool {
        matches!(self, Self::Forked { .. })
    }
}

/// Describes one completed rollback step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReorgEvent {
    /// The height whose checkpoint and events were deleted.
    pub unwound_height: u64,
    /// The new anchor hash (checkpoint at `unwound_height - 1`), `None` at the origin.
    pub anchor_hash: Option<String>,
}

/// Undoes persisted state when a fork is detected.
pub struct ReorgResolver {
    checkpoints: Arc<dyn CheckpointStore>,
    events: Arc<dyn EventStore>,
}

impl ReorgResolver {
    pub fn new(checkpoints: Arc<dyn CheckpointStore>, events: Arc<dyn EventStore>) -> Self {
        Self {
            checkpoints,
            events,
        }
    }

    /// Unwind the most recently accepted height and rewind `cursor` onto it.
    ///
    /// The cursor is left untouched if any step fails.
    pub async fn resolve(&self, cursor: &mut Cursor) -> Result<ReorgEvent, WatchError> {
        let prev = cursor
            .next_height
            .checked_sub(1)
            .ok_or_else(|| WatchError::RollbackFailed {
                height: 0,
                reason: "no accepted height below 0".into(),
            })?;

        // Events first: a crash in between leaves the checkpoint in place and
        // the fork is re-detected on restart.
        self.events
            .delete_by_height(prev)
            .await
            .map_err(|e| rollback_failed(prev, e))?;
        self.checkpoints
            .delete(prev)
            .await
            .map_err(|e| rollback_failed(prev, e))?;

        let anchor_hash = match prev.checked_sub(1) {
            Some(below) => self
                .checkpoints
                .get(below)
                .await
                .map_err(|e| rollback_failed(prev, e))?
                .map(|cp| cp.block_hash),
            None => None,
        };

        cursor.rewind(prev, anchor_hash.clone());
        tracing::info!(
            unwound = prev,
            next_height = cursor.next_height,
            anchor = anchor_hash.as_deref().unwrap_or("<origin>"),
            "rollback complete"
        );

        Ok(ReorgEvent {
            unwound_height: prev,
            anchor_hash,
        })
    }
}

fn rollback_failed(height: u64, err: WatchError) -> WatchError {
    WatchError::RollbackFailed {
        height,
        reason: err.to_string(),
    }
}
