//! CheckpointStore trait and RocksDB implementation
//!
//! A checkpoint is the highest block fully processed by one monitoring
//! instance. Writes are upserts that never move the height backwards, so
//! retrying a write is harmless and a stale writer cannot rewind progress.

use crate::keys::{decode_checkpoint_key, encode_checkpoint_key};
use crate::records::CheckpointRecord;
use anyhow::{Context, Result};
use async_trait::async_trait;
use rocksdb::{ColumnFamilyDescriptor, IteratorMode, Options, DB};
use std::path::Path;
use std::sync::Mutex;

/// Per-instance checkpoint persistence.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Last processed block for `instance_id`.
    ///
    /// Returns 0 when no checkpoint exists (fresh instance).
    async fn get_last_processed_block(&self, instance_id: &str) -> Result<u64>;

    /// Upsert the checkpoint for `instance_id`.
    ///
    /// Idempotent; a height below the stored one leaves the row unchanged.
    async fn set_last_processed_block(&self, instance_id: &str, block: u64) -> Result<()>;

    /// Every stored checkpoint, ordered by instance id.
    async fn list_checkpoints(&self) -> Result<Vec<CheckpointRecord>>;
}

/// RocksDB-backed checkpoint store.
///
/// One `checkpoints` column family; key `'P' || instance_id`, value a
/// postcard-encoded [`CheckpointRecord`].
pub struct RocksCheckpointStore {
    db: DB,
    /// Serializes read-compare-write so the height stays monotonic.
    write_lock: Mutex<()>,
}

impl RocksCheckpointStore {
    /// Open or create a RocksDB database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let column_families = vec![ColumnFamilyDescriptor::new(
            "checkpoints",
            Options::default(),
        )];

        let db = DB::open_cf_descriptors(&opts, path, column_families)
            .context("Failed to open RocksDB database")?;

        Ok(Self {
            db,
            write_lock: Mutex::new(()),
        })
    }

    fn get_cf(&self) -> Result<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle("checkpoints")
            .context("Column family 'checkpoints' not found")
    }

    fn get_record(&self, instance_id: &str) -> Result<Option<CheckpointRecord>> {
        let cf = self.get_cf()?;
        let key = encode_checkpoint_key(instance_id);
        match self.db.get_cf(cf, &key).context("Failed to get checkpoint")? {
            Some(bytes) => {
                let record = postcard::from_bytes(&bytes)
                    .context("Failed to deserialize checkpoint record")?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl CheckpointStore for RocksCheckpointStore {
    async fn get_last_processed_block(&self, instance_id: &str) -> Result<u64> {
        Ok(self
            .get_record(instance_id)?
            .map(|record| record.last_processed_block)
            .unwrap_or(0))
    }

    async fn set_last_processed_block(&self, instance_id: &str, block: u64) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(existing) = self.get_record(instance_id)? {
            if existing.last_processed_block >= block {
                return Ok(());
            }
        }

        let record = CheckpointRecord {
            instance_id: instance_id.to_string(),
            last_processed_block: block,
            updated_at: chrono::Utc::now().timestamp(),
        };
        let cf = self.get_cf()?;
        let key = encode_checkpoint_key(instance_id);
        let value =
            postcard::to_allocvec(&record).context("Failed to serialize checkpoint record")?;
        self.db
            .put_cf(cf, &key, &value)
            .with_context(|| format!("Failed to put checkpoint for {}", instance_id))?;
        Ok(())
    }

    async fn list_checkpoints(&self) -> Result<Vec<CheckpointRecord>> {
        let cf = self.get_cf()?;
        let mut records = Vec::new();

        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, value) = item.context("Failed to iterate checkpoints")?;
            let instance_id = decode_checkpoint_key(&key)?;
            let record: CheckpointRecord = postcard::from_bytes(&value).with_context(|| {
                format!("Failed to deserialize checkpoint for {}", instance_id)
            })?;
            records.push(record);
        }

        Ok(records)
    }
}
