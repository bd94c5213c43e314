//! ERC-20 `Transfer(address indexed from, address indexed to, uint256 value)` decoder.

use alloy_primitives::U256;

use chainwatch_core::decoder::EventDecoder;
use chainwatch_core::error::DecodeError;
use chainwatch_core::types::{DomainEvent, EventPayload, LogEntry};

use crate::signature::{event_topic, is_topic_hash, TRANSFER_SIGNATURE};

const WORD: usize = 32;

/// Decodes `Transfer` logs emitted by one token contract.
#[derive(Debug, Clone)]
pub struct TransferDecoder {
    token: String,
    topic0: String,
}

impl TransferDecoder {
    pub fn new(token: impl AsRef<str>) -> Self {
        Self {
            token: token.as_ref().to_ascii_lowercase(),
            topic0: event_topic(TRANSFER_SIGNATURE),
        }
    }
}

impl EventDecoder for TransferDecoder {
    fn schema(&self) -> &str {
        "Transfer"
    }

    fn address(&self) -> &str {
        &self.token
    }

    fn topic0(&self) -> &str {
        &self.topic0
    }

    fn indexed_count(&self) -> usize {
        3
    }

    fn decode(&self, entry: &LogEntry) -> Result<DomainEvent, DecodeError> {
        if entry.topics.len() < self.indexed_count() {
            return Err(DecodeError::MissingTopics {
                expected: self.indexed_count(),
                actual: entry.topics.len(),
            });
        }
        let from = topic_address(&entry.topics[1], 1)?;
        let to = topic_address(&entry.topics[2], 2)?;

        if entry.data.len() < WORD {
            return Err(DecodeError::ShortPayload {
                len: entry.data.len(),
                need: WORD,
            });
        }
        let amount = U256::from_be_slice(&entry.data[..WORD]);

        Ok(DomainEvent {
            tx_hash: entry.tx_hash.clone(),
            log_index: entry.log_index,
            block_number: entry.block_number,
            block_hash: entry.block_hash.clone(),
            address: entry.address.to_ascii_lowercase(),
            payload: EventPayload::Transfer {
                from,
                to,
                amount: amount.to_string(),
            },
        })
    }
}

/// An indexed address is the low 20 bytes of its 32-byte topic.
fn topic_address(topic: &str, index: usize) -> Result<String, DecodeError> {
    if !is_topic_hash(topic) {
        return Err(DecodeError::InvalidTopic {
            index,
            reason: format!("expected 32-byte hex word, got {topic:?}"),
        });
    }
    let tail = &topic[topic.len() - 40..];
    Ok(format!("0x{}", tail.to_ascii_lowercase()))
}
