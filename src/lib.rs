//! Vigil - Ethereum address monitoring
//!
//! Follows the chain block by block, matches transaction senders and
//! recipients against a registry of watched addresses, and publishes one
//! event per matched user to Kafka. Progress is checkpointed per instance
//! so a restart resumes where the previous run stopped.

pub mod keys;
pub mod records;
pub mod store;
pub mod cli;

// Watcher modules
pub mod cache;
pub mod config;
pub mod fee;
pub mod logging;
pub mod postgres;
pub mod publisher;
pub mod registry;
pub mod rpc;
pub mod status;
pub mod transfer;
pub mod types;
pub mod watcher;

#[cfg(test)]
mod testing;

// Re-export the main types for convenience
pub use records::{AddressMatchResult, CheckpointRecord, TransactionEvent, WatchedAddress};
pub use registry::AddressRegistry;
pub use store::{CheckpointStore, RocksCheckpointStore};
