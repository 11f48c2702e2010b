//! Key encoding and decoding utilities
//!
//! Embedded-store keys use a single-byte prefix followed by binary data so
//! records of different kinds never collide in RocksDB. Cache-tier keys are
//! plain strings shared with every other process reading the cache.

use alloy::primitives::Address;

/// Prefix of cache-tier entries mapping an address to its owner.
pub const ADDRESS_CACHE_KEY_PREFIX: &str = "addr:";

/// Encode a checkpoint key.
///
/// Format: byte 'P' (0x50) + instance id (UTF-8 bytes)
pub fn encode_checkpoint_key(instance_id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + instance_id.len());
    key.push(b'P');
    key.extend_from_slice(instance_id.as_bytes());
    key
}

/// Decode the instance id from a checkpoint key.
pub fn decode_checkpoint_key(key: &[u8]) -> anyhow::Result<String> {
    match key.split_first() {
        Some((b'P', rest)) => Ok(String::from_utf8(rest.to_vec())?),
        _ => anyhow::bail!("Not a checkpoint key: {}", hex::encode(key)),
    }
}

/// Encode the cache-tier key for an address.
///
/// Format: "addr:" + EIP-55 checksummed address
pub fn encode_address_cache_key(addr: Address) -> String {
    format!("{}{}", ADDRESS_CACHE_KEY_PREFIX, addr.to_checksum(None))
}
