//! Scan cursor: the driver's position in the chain.

use serde::{Deserialize, Serialize};

use crate::checkpoint::Checkpoint;

/// The driver's in-memory position.
///
/// The cursor knows:
/// - Which height to scan next
/// - The hash of the block accepted at `next_height - 1` (`None` at the tracking origin)
///
/// It is never persisted; it is rebuilt from the highest checkpoint at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    /// Next height to scan.
    pub next_height: u64,
    /// Hash of the last accepted block.
    pub last_accepted_hash: Option<String>,
}

impl Cursor {
    /// A cursor at the tracking origin: nothing accepted yet.
    pub fn at_origin(next_height: u64) -> Self {
        Self {
            next_height,
            last_accepted_hash: None,
        }
    }

    /// Resume right after a persisted checkpoint.
    pub fn resume_from(checkpoint: &Checkpoint) -> Self {
        Self {
            next_height: checkpoint.height + 1,
            last_accepted_hash: Some(checkpoint.block_hash.clone()),
        }
    }

    /// Returns `true` if there is no prior hash to compare against.
    pub fn is_at_origin(&self) -> bool {
        self.last_accepted_hash.is_none()
    }

    /// Accept the block at `next_height` and move past it.
    pub fn advance(&mut self, block_hash: impl Into<String>) {
        self.last_accepted_hash = Some(block_hash.into());
        self.next_height += 1;
    }

    /// Move back to `height`, anchoring on `anchor_hash` (the hash at `height - 1`).
    pub fn rewind(&mut self, height: u64, anchor_hash: Option<String>) {
        self.next_height = height;
        self.last_accepted_hash = anchor_hash;
    }

    /// Height of the last accepted block, if any.
    pub fn last_accepted_height(&self) -> Option<u64> {
        if self.is_at_origin() {
            None
        } else {
            self.next_height.checked_sub(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn cursor_advance() {
        let mut cursor = Cursor::at_origin(100);
        assert!(cursor.is_at_origin());
        cursor.advance("0xaaa");
        assert_eq!(cursor.next_height, 101);
        assert_eq!(cursor.last_accepted_hash.as_deref(), Some("0xaaa"));
        assert_eq!(cursor.last_accepted_height(), Some(100));
    }

    #[test]
    fn cursor_resume_from_checkpoint() {
        let cp = Checkpoint {
            height: 500,
            block_hash: "0x500".into(),
            parent_hash: "0x499".into(),
            observed_at: Utc::now(),
        };
        let cursor = Cursor::resume_from(&cp);
        assert_eq!(cursor.next_height, 501);
        assert_eq!(cursor.last_accepted_hash.as_deref(), Some("0x500"));
    }

    #[test]
    fn cursor_rewind_to_origin() {
        let mut cursor = Cursor::at_origin(10);
        cursor.advance("0xa");
        cursor.rewind(10, None);
        assert!(cursor.is_at_origin());
        assert_eq!(cursor.next_height, 10);
        assert_eq!(cursor.last_accepted_height(), None);
    }
}
