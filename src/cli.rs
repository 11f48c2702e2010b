//! CLI implementation for checkpointctl
//!
//! Operator tool for reading and seeding checkpoints and inspecting the
//! watched-address registry. All commands output pretty JSON.

use crate::cache::RedisCache;
use crate::config::{parse_address, StoreArgs};
use crate::registry::{AddressRegistry, AddressSource};
use crate::store::CheckpointStore;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::sync::Arc;

/// Checkpoint and registry CLI tool
#[derive(Parser)]
#[command(name = "checkpointctl")]
#[command(about = "Inspect and seed monitoring checkpoints and watched addresses")]
pub struct Cli {
    #[command(flatten)]
    store: StoreArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Get the last processed block of an instance
    GetCheckpoint {
        /// Monitoring instance id
        #[arg(long, env = "INSTANCE_ID", default_value = "local-instance-1")]
        instance_id: String,
    },
    /// Seed the last processed block of an instance (never moves backwards)
    SetCheckpoint {
        /// Monitoring instance id
        #[arg(long, env = "INSTANCE_ID", default_value = "local-instance-1")]
        instance_id: String,
        /// Block number
        block: u64,
    },
    /// List the checkpoints of every instance
    ListCheckpoints,
    /// List active watched addresses
    ListAddresses,
    /// Resolve an address through the registry (memory and cache tiers)
    CheckAddress {
        /// Ethereum address (hex, with or without 0x prefix)
        address: String,
    },
}

async fn get_checkpoint(store: &dyn CheckpointStore, instance_id: &str) -> Result<Value> {
    let block = store.get_last_processed_block(instance_id).await?;
    Ok(json!({ "instance_id": instance_id, "last_processed_block": block }))
}

async fn set_checkpoint(
    store: &dyn CheckpointStore,
    instance_id: &str,
    block: u64,
) -> Result<Value> {
    store.set_last_processed_block(instance_id, block).await?;
    let stored = store.get_last_processed_block(instance_id).await?;
    Ok(json!({
        "status": "ok",
        "instance_id": instance_id,
        "requested_block": block,
        "last_processed_block": stored,
    }))
}

async fn list_checkpoints(store: &dyn CheckpointStore) -> Result<Value> {
    let checkpoints = store.list_checkpoints().await?;
    Ok(json!({ "count": checkpoints.len(), "checkpoints": checkpoints }))
}

async fn list_addresses(source: &dyn AddressSource) -> Result<Value> {
    let addresses = source.query_active_addresses().await?;
    Ok(json!({ "count": addresses.len(), "addresses": addresses }))
}

async fn check_address(registry: &AddressRegistry, address: &str) -> Result<Value> {
    let addr = parse_address(address)?;
    let verdict = registry.is_watched(addr).await;
    Ok(serde_json::to_value(verdict)?)
}

/// Run the CLI command and print JSON output.
pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    let result = match &cli.command {
        Commands::GetCheckpoint { instance_id } => {
            let store = cli.store.checkpoint_store(None).await?;
            get_checkpoint(store.as_ref(), instance_id).await?
        }
        Commands::SetCheckpoint { instance_id, block } => {
            let store = cli.store.checkpoint_store(None).await?;
            set_checkpoint(store.as_ref(), instance_id, *block).await?
        }
        Commands::ListCheckpoints => {
            let store = cli.store.checkpoint_store(None).await?;
            list_checkpoints(store.as_ref()).await?
        }
        Commands::ListAddresses => {
            let pg = cli.store.connect_postgres().await?;
            list_addresses(&pg).await?
        }
        Commands::CheckAddress { address } => {
            let pg = cli.store.connect_postgres().await?;
            let cache = RedisCache::connect(&cli.store.redis_url).await?;
            let registry = AddressRegistry::connect(Arc::new(pg), Arc::new(cache))
                .await
                .context("Failed to load registry")?;
            check_address(&registry, address).await?
        }
    };

    // Pretty print JSON
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
