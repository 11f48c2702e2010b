//! Watched-address registry
//!
//! Resolves chain addresses to owning users through three tiers:
//! an in-memory map, the shared cache tier, and the relational store of
//! record. The store is only read on `load`/`reload`; the hot path never
//! leaves memory unless the address is unknown, in which case the cache
//! tier is consulted and a hit is promoted into memory.

use crate::keys::encode_address_cache_key;
use crate::records::{AddressMatchResult, WatchedAddress};
use alloy::primitives::Address;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{error, info, warn};

/// Lifetime of an address entry in the cache tier.
pub const ADDRESS_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Store of record for watched addresses.
#[async_trait]
pub trait AddressSource: Send + Sync {
    /// All active watched addresses, ordered by owner.
    async fn query_active_addresses(&self) -> Result<Vec<WatchedAddress>>;
}

/// String key/value cache tier.
///
/// A missing key is `Ok(None)`, never an error.
#[async_trait]
pub trait AddressCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;
}

/// In-memory address → owner map backed by the cache tier and the store.
pub struct AddressRegistry {
    source: Arc<dyn AddressSource>,
    cache: Arc<dyn AddressCache>,
    addresses: RwLock<HashMap<Address, String>>,
}

impl AddressRegistry {
    /// Create an empty registry. Call [`AddressRegistry::load`] before use.
    pub fn new(source: Arc<dyn AddressSource>, cache: Arc<dyn AddressCache>) -> Self {
        Self {
            source,
            cache,
            addresses: RwLock::new(HashMap::new()),
        }
    }

    /// Create a registry and load it, failing if the store query fails.
    pub async fn connect(
        source: Arc<dyn AddressSource>,
        cache: Arc<dyn AddressCache>,
    ) -> Result<Self> {
        let registry = Self::new(source, cache);
        registry
            .load()
            .await
            .context("Failed to load addresses during initialization")?;
        Ok(registry)
    }

    /// Replace the in-memory map with the active rows of the store.
    ///
    /// The new map is built off-lock and swapped in whole, so concurrent
    /// lookups see either the old or the new map. Cache-tier refresh is
    /// best effort.
    pub async fn load(&self) -> Result<usize> {
        info!("Loading monitored addresses from database");

        let rows = self
            .source
            .query_active_addresses()
            .await
            .context("Failed to load addresses from database")?;

        let fresh: HashMap<Address, String> = rows
            .iter()
            .map(|row| (row.address, row.user_id.clone()))
            .collect();
        let count = fresh.len();

        {
            let mut addresses = self.addresses.write().unwrap_or_else(|e| e.into_inner());
            *addresses = fresh;
        }

        for row in &rows {
            let key = encode_address_cache_key(row.address);
            if let Err(e) = self.cache.set(&key, &row.user_id, ADDRESS_CACHE_TTL).await {
                error!(address = %row.address, error = ?e, "Failed to cache address");
            }
        }

        info!(count, "Addresses loaded successfully");
        Ok(count)
    }

    /// Re-run [`AddressRegistry::load`] on demand.
    pub async fn reload(&self) -> Result<usize> {
        info!("Reloading addresses from database");
        self.load().await
    }

    /// Resolve one address: memory first, then the cache tier.
    ///
    /// A cache hit is promoted into memory. Cache-tier errors are logged and
    /// read as a miss.
    pub async fn is_watched(&self, address: Address) -> AddressMatchResult {
        let known = {
            let addresses = self.addresses.read().unwrap_or_else(|e| e.into_inner());
            addresses.get(&address).cloned()
        };
        if let Some(user_id) = known {
            return AddressMatchResult::matched(address, user_id);
        }

        let key = encode_address_cache_key(address);
        let cached = match self.cache.get(&key).await {
            Ok(cached) => cached,
            Err(e) => {
                warn!(address = %address, error = ?e, "Failed to check address cache");
                None
            }
        };

        match cached {
            Some(user_id) if !user_id.is_empty() => {
                {
                    let mut addresses =
                        self.addresses.write().unwrap_or_else(|e| e.into_inner());
                    addresses.insert(address, user_id.clone());
                }
                AddressMatchResult::matched(address, user_id)
            }
            _ => AddressMatchResult::unmatched(address),
        }
    }

    /// Evaluate the source and destination of a transaction.
    ///
    /// The zero address (contract creation) is never matched. Only matches
    /// are returned, tagged with their role.
    pub async fn check_transaction_addresses(
        &self,
        from: Address,
        to: Address,
    ) -> Vec<AddressMatchResult> {
        let mut results = Vec::with_capacity(2);

        if !from.is_zero() {
            let mut source = self.is_watched(from).await;
            if source.is_match {
                source.is_source = true;
                results.push(source);
            }
        }

        if !to.is_zero() {
            let mut destination = self.is_watched(to).await;
            if destination.is_match {
                destination.is_destination = true;
                results.push(destination);
            }
        }

        results
    }

    /// Number of addresses currently held in memory.
    pub fn count(&self) -> usize {
        self.addresses.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}
