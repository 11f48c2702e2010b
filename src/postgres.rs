//! PostgreSQL store of record
//!
//! Serves the active watched addresses to the registry and persists
//! per-instance checkpoints in `processing_state`.

use crate::config::parse_address;
use crate::records::{CheckpointRecord, WatchedAddress};
use crate::registry::AddressSource;
use crate::store::CheckpointStore;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{info, warn};

type AddressRow = (i64, String, String, bool, DateTime<Utc>, DateTime<Utc>);

/// Connection pool to the monitoring database.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Open a pool and verify connectivity.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        info!(max_connections, "Connecting to PostgreSQL");
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .after_connect(|conn, _meta| {
                Box::pin(async move {
                    sqlx::query("SET application_name = 'vigil'")
                        .execute(conn)
                        .await?;
                    Ok(())
                })
            })
            .connect(database_url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        sqlx::query("SELECT 1")
            .execute(&pool)
            .await
            .context("Failed to ping PostgreSQL")?;

        Ok(Self { pool })
    }

    /// Apply the embedded schema migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run database migrations")?;
        info!("Database migrations applied");
        Ok(())
    }
}

/// Convert one `monitored_addresses` row, or `None` if the address column
/// does not hold a 20-byte hex address.
fn watched_from_row(row: AddressRow) -> Option<WatchedAddress> {
    let (id, user_id, address, is_active, created_at, updated_at) = row;
    match parse_address(&address) {
        Ok(address) => Some(WatchedAddress {
            id,
            user_id,
            address,
            is_active,
            created_at,
            updated_at,
        }),
        Err(e) => {
            warn!(id, address = %address, error = ?e, "Skipping malformed monitored address");
            None
        }
    }
}

#[async_trait]
impl AddressSource for PgStore {
    async fn query_active_addresses(&self) -> Result<Vec<WatchedAddress>> {
        let rows: Vec<AddressRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, address, is_active, created_at, updated_at
            FROM monitored_addresses
            WHERE is_active = true
            ORDER BY user_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to query addresses")?;

        Ok(rows.into_iter().filter_map(watched_from_row).collect())
    }
}

#[async_trait]
impl CheckpointStore for PgStore {
    async fn get_last_processed_block(&self, instance_id: &str) -> Result<u64> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT last_processed_block FROM processing_state WHERE instance_id = $1",
        )
        .bind(instance_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to get last processed block")?;

        match row {
            Some((block,)) => u64::try_from(block)
                .with_context(|| format!("Negative checkpoint {} for {}", block, instance_id)),
            None => Ok(0),
        }
    }

    async fn set_last_processed_block(&self, instance_id: &str, block: u64) -> Result<()> {
        let block = i64::try_from(block)
            .with_context(|| format!("Block {} does not fit in BIGINT", block))?;

        sqlx::query(
            r#"
            INSERT INTO processing_state (instance_id, last_processed_block, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (instance_id) DO UPDATE SET
                last_processed_block = GREATEST(
                    processing_state.last_processed_block,
                    EXCLUDED.last_processed_block
                ),
                updated_at = NOW()
            "#,
        )
        .bind(instance_id)
        .bind(block)
        .execute(&self.pool)
        .await
        .context("Failed to set last processed block")?;
        Ok(())
    }

    async fn list_checkpoints(&self) -> Result<Vec<CheckpointRecord>> {
        let rows: Vec<(String, i64, DateTime<Utc>)> = sqlx::query_as(
            r#"
            SELECT instance_id, last_processed_block, updated_at
            FROM processing_state
            ORDER BY instance_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list checkpoints")?;

        rows.into_iter()
            .map(|(instance_id, block, updated_at)| {
                Ok(CheckpointRecord {
                    last_processed_block: u64::try_from(block).with_context(|| {
                        format!("Negative checkpoint {} for {}", block, instance_id)
                    })?,
                    instance_id,
                    updated_at: updated_at.timestamp(),
                })
            })
            .collect()
    }
}
