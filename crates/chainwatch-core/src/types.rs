//! Shared types for the scanning pipeline.

use serde::{Deserialize, Serialize};

// ─── BlockRef ─────────────────────────────────────────────────────────────────

/// The identity of one block: its height, hash and parent link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRef {
    /// Block height.
    pub height: u64,
    /// Block hash (`0x…`).
    pub hash: String,
    /// Parent block hash (`0x…`).
    pub parent_hash: String,
}

impl BlockRef {
    pub fn new(height: u64, hash: impl Into<String>, parent_hash: impl Into<String>) -> Self {
        Self {
            height,
            hash: hash.into(),
            parent_hash: parent_hash.into(),
        }
    }
}

// ─── LogEntry ─────────────────────────────────────────────────────────────────

/// A raw log entry as delivered by the chain gateway, before decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Emitting contract address.
    pub address: String,
    /// `topics[0]` is the event signature hash; the rest are indexed params.
    pub topics: Vec<String>,
    /// Non-indexed params, ABI-encoded.
    pub data: Vec<u8>,
    pub block_number: u64,
    pub block_hash: String,
    pub tx_hash: String,
    pub log_index: u32,
    /// Set by the node when the log belonged to a block that was reorged out.
    pub removed: bool,
}

impl LogEntry {
    /// The event signature hash, if present.
    pub fn topic0(&self) -> Option<&str> {
        self.topics.first().map(|s| s.as_str())
    }
}

// ─── LogFilter ────────────────────────────────────────────────────────────────

/// Which logs the gateway should return: one source address, any of the
/// listed signature hashes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogFilter {
    pub address: String,
    /// Accepted `topic0` values (empty = all events of `address`).
    pub topic0_values: Vec<String>,
}

impl LogFilter {
    /// Create a filter for a single contract address.
    pub fn address(addr: impl Into<String>) -> Self {
        Self {
            address: addr.into(),
            topic0_values: vec![],
        }
    }

    /// Add a topic0 filter (event signature hash).
    pub fn topic0(mut self, topic: impl Into<String>) -> Self {
        self.topic0_values.push(topic.into());
        self
    }

    /// Returns `true` if `entry` would be selected by this filter.
    pub fn matches(&self, entry: &LogEntry) -> bool {
        if !self.address.eq_ignore_ascii_case(&entry.address) {
            return false;
        }
        match entry.topic0() {
            Some(t0) => {
                self.topic0_values.is_empty()
                    || self.topic0_values.iter().any(|t| t.eq_ignore_ascii_case(t0))
            }
            None => self.topic0_values.is_empty(),
        }
    }
}

// ─── DomainEvent ──────────────────────────────────────────────────────────────

/// A decoded event, ready to be persisted.
///
/// Identity is `(tx_hash, log_index)`; storing the same identity twice is a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainEvent {
    pub tx_hash: String,
    pub log_index: u32,
    pub block_number: u64,
    pub block_hash: String,
    /// Emitting contract, lowercase.
    pub address: String,
    pub payload: EventPayload,
}

impl DomainEvent {
    /// The deduplication key.
    pub fn identity(&self) -> (&str, u32) {
        (&self.tx_hash, self.log_index)
    }

    /// Name of the payload schema (e.g. `"Transfer"`).
    pub fn schema(&self) -> &str {
        self.payload.schema()
    }
}

/// Semantic fields of a decoded event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    /// A value transfer. Addresses are lowercase, `amount` is a decimal string.
    Transfer {
        from: String,
        to: String,
        amount: String,
    },
    /// Output of a user-registered decoder.
    Custom {
        schema: String,
        fields: serde_json::Value,
    },
}

impl EventPayload {
    pub fn schema(&self) -> &str {
        match self {
            Self::Transfer { .. } => "Transfer",
            Self::Custom { schema, .. } => schema,
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
