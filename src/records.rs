//! Record types for the monitoring pipeline
//!
//! Watched-address rows, checkpoints, per-address match verdicts, and the
//! event published for every matched transaction. Checkpoints use postcard
//! for binary serialization in the embedded store; events are JSON on the wire.

use alloy::primitives::Address;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A row of the watched-address table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WatchedAddress {
    /// Row id
    pub id: i64,
    /// Owning user identifier (opaque)
    pub user_id: String,
    /// Chain address
    pub address: Address,
    /// Only active rows are loaded into the registry
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Highest block fully processed by one monitoring instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    /// Unique per running monitor
    pub instance_id: String,
    /// Resumption point: processing restarts at this block + 1
    pub last_processed_block: u64,
    /// Unix epoch seconds of the last write
    pub updated_at: i64,
}

/// Per-address-role registry verdict. Produced fresh per lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddressMatchResult {
    pub is_match: bool,
    pub user_id: String,
    pub address: Address,
    pub is_source: bool,
    pub is_destination: bool,
}

impl AddressMatchResult {
    /// A match for `address` owned by `user_id`, role not yet tagged.
    pub fn matched(address: Address, user_id: String) -> Self {
        Self {
            is_match: true,
            user_id,
            address,
            is_source: false,
            is_destination: false,
        }
    }

    /// A non-match for `address`.
    pub fn unmatched(address: Address) -> Self {
        Self {
            is_match: false,
            user_id: String::new(),
            address,
            is_source: false,
            is_destination: false,
        }
    }
}

/// Normalized event published once per (transaction, matched address).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionEvent {
    /// 0x-prefixed lowercase hash; also the broker message key
    pub transaction_hash: String,
    pub block_number: u64,
    pub block_hash: String,
    pub user_id: String,
    /// EIP-55 checksummed sender
    pub source: String,
    /// EIP-55 checksummed recipient (zero address for contract creation)
    pub destination: String,
    /// Decimal string, native value or decoded token amount
    pub amount: String,
    /// Decimal string, gas_used * gas_price
    pub fees: String,
    pub gas_used: u64,
    /// Decimal string, effective gas price
    pub gas_price: String,
    /// Block time
    pub timestamp: DateTime<Utc>,
    /// 1 = success, 0 = reverted
    pub status: u64,
    pub nonce: u64,
}

impl TransactionEvent {
    /// Serialize to the broker payload.
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}
