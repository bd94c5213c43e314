//! Event signature hashing.
//!
//! `topics[0]` of an EVM log is the keccak256 hash of the event's canonical
//! signature, e.g. `keccak256("Transfer(address,address,uint256)")`.

use tiny_keccak::{Hasher, Keccak};

/// Canonical signature of the ERC-20 `Transfer` event.
pub const TRANSFER_SIGNATURE: &str = "Transfer(address,address,uint256)";

/// Raw keccak256 digest.
pub fn keccak256(input: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    let mut output = [0u8; 32];
    hasher.update(input);
    hasher.finalize(&mut output);
    output
}

/// `0x`-prefixed lowercase topic hash for a canonical signature string.
pub fn event_topic(signature: &str) -> String {
    format!("0x{}", hex::encode(keccak256(signature.as_bytes())))
}

/// Returns `true` if `topic` is `0x` followed by 64 hex digits.
pub fn is_topic_hash(topic: &str) -> bool {
    topic
        .strip_prefix("0x")
        .is_some_and(|h| h.len() == 64 && h.chars().all(|c| c.is_ascii_hexdigit()))
}
