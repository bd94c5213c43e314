//! Event decoder trait + registry.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::DecodeError;
use crate::types::{DomainEvent, LogEntry, LogFilter};

/// Turns one raw log entry into a domain event.
///
/// Implement this to track an additional event kind. Decoders are pure: the
/// same entry always yields the same result.
pub trait EventDecoder: Send + Sync {
    /// Schema name of the produced events (e.g. `"Transfer"`).
    fn schema(&self) -> &str;

    /// Contract address this decoder tracks.
    fn address(&self) -> &str;

    /// Event signature hash (`topics[0]`) this decoder accepts.
    fn topic0(&self) -> &str;

    /// Number of topics a well-formed entry carries, signature included.
    fn indexed_count(&self) -> usize;

    /// Decode `entry`, or reject it.
    fn decode(&self, entry: &LogEntry) -> Result<DomainEvent, DecodeError>;
}

/// Lookup key: lowercase `(address, topic0)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DecoderKey {
    pub address: String,
    pub topic0: String,
}

impl DecoderKey {
    pub fn new(address: &str, topic0: &str) -> Self {
        Self {
            address: address.to_ascii_lowercase(),
            topic0: topic0.to_ascii_lowercase(),
        }
    }
}

/// Registry of decoders keyed by source address and event signature.
#[derive(Default, Clone)]
pub struct DecoderRegistry {
    decoders: BTreeMap<DecoderKey, Arc<dyn EventDecoder>>,
}

impl DecoderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a decoder. A later registration for the same key replaces the earlier one.
    pub fn register(&mut self, decoder: Arc<dyn EventDecoder>) {
        let key = DecoderKey::new(decoder.address(), decoder.topic0());
        tracing::debug!(
            schema = decoder.schema(),
            address = %key.address,
            topic0 = %key.topic0,
            "decoder registered"
        );
        self.decoders.insert(key, decoder);
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, decoder: Arc<dyn EventDecoder>) -> Self {
        self.register(decoder);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }

    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    /// One filter per tracked address, listing all of its signatures.
    pub fn filters(&self) -> Vec<LogFilter> {
        let mut by_address: BTreeMap<&str, LogFilter> = BTreeMap::new();
        for key in self.decoders.keys() {
            by_address
                .entry(key.address.as_str())
                .or_insert_with(|| LogFilter::address(key.address.clone()))
                .topic0_values
                .push(key.topic0.clone());
        }
        by_address.into_values().collect()
    }

    /// Find the decoder responsible for `entry`.
    pub fn lookup(&self, entry: &LogEntry) -> Option<&Arc<dyn EventDecoder>> {
        let topic0 = entry.topic0()?;
        self.decoders.get(&DecoderKey::new(&entry.address, topic0))
    }

    /// Route `entry` to its decoder.
    ///
    /// Returns `None` if no decoder is registered for the entry.
    pub fn decode(&self, entry: &LogEntry) -> Option<Result<DomainEvent, DecodeError>> {
        self.lookup(entry).map(|d| d.decode(entry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EventPayload;

    struct Fixed {
        address: String,
        topic0: String,
    }

    impl EventDecoder for Fixed {
        fn schema(&self) -> &str {
            "Fixed"
        }
        fn address(&self) -> &str {
            &self.address
        }
        fn topic0(&self) -> &str {
            &self.topic0
        }
        fn indexed_count(&self) -> usize {
            1
        }
        fn decode(&self, entry: &LogEntry) -> Result<DomainEvent, DecodeError> {
            Ok(DomainEvent {
                tx_hash: entry.tx_hash.clone(),
                log_index: entry.log_index,
                block_number: entry.block_number,
                block_hash: entry.block_hash.clone(),
                address: entry.address.to_ascii_lowercase(),
                payload: EventPayload::Custom {
                    schema: "Fixed".into(),
                    fields: serde_json::Value::Null,
                },
            })
        }
    }

    fn fixed(address: &str, topic0: &str) -> Arc<dyn EventDecoder> {
        Arc::new(Fixed {
            address: address.into(),
            topic0: topic0.into(),
        })
    }

    fn entry(address: &str, topic0: &str) -> LogEntry {
        LogEntry {
            address: address.into(),
            topics: vec![topic0.into()],
            data: vec![],
            block_number: 7,
            block_hash: "0x7".into(),
            tx_hash: "0xt".into(),
            log_index: 3,
            removed: false,
        }
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let registry = DecoderRegistry::new().with(fixed("0xABC", "0xDEAD"));
        assert!(registry.decode(&entry("0xabc", "0xdead")).is_some());
        assert!(registry.decode(&entry("0xabc", "0xbeef")).is_none());
        assert!(registry.decode(&entry("0x999", "0xdead")).is_none());
    }

    #[test]
    fn filters_group_by_address() {
        let registry = DecoderRegistry::new()
            .with(fixed("0xaaa", "0x01"))
            .with(fixed("0xaaa", "0x02"))
            .with(fixed("0xbbb", "0x01"));
        let filters = registry.filters();
        assert_eq!(filters.len(), 2);
        assert_eq!(filters[0].address, "0xaaa");
        assert_eq!(filters[0].topic0_values, vec!["0x01", "0x02"]);
        assert_eq!(filters[1].address, "0xbbb");
    }

    #[test]
    fn entry_without_topics_is_not_routed() {
        let registry = DecoderRegistry::new().with(fixed("0xaaa", "0x01"));
        let mut e = entry("0xaaa", "0x01");
        e.topics.clear();
        assert!(registry.decode(&e).is_none());
    }
}
