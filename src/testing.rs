//! In-memory collaborators and fixtures shared by unit tests.

use crate::publisher::{Delivery, EventPublisher};
use crate::records::{CheckpointRecord, TransactionEvent, WatchedAddress};
use crate::registry::{AddressCache, AddressSource};
use crate::rpc::{convert_transaction, LedgerReader};
use crate::store::CheckpointStore;
use crate::transfer::TRANSFER_SELECTOR;
use crate::types::{Block, BlockHeader, Receipt, Transaction};
use alloy::consensus::{SignableTransaction, TxEnvelope, TxLegacy};
use alloy::network::TxSignerSync;
use alloy::primitives::{address, b256, Address, Bytes, TxKind, B256, U256};
use alloy::signers::local::PrivateKeySigner;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use futures_util::stream::{self, BoxStream, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

/// Ordered log shared between fakes to assert cross-collaborator ordering.
pub type Journal = Arc<Mutex<Vec<String>>>;

pub const DEFAULT_RECIPIENT: Address = address!("70997970c51812dc3a010c7d01b50e0d17dc79c8");

/// Deterministic signer (well-known development key).
pub fn test_signer() -> PrivateKeySigner {
    PrivateKeySigner::from_bytes(&b256!(
        "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80"
    ))
    .unwrap()
}

/// Legacy chain-1 transaction signed by `signer`, 20 gwei gas price.
pub fn signed_legacy(
    signer: &PrivateKeySigner,
    nonce: u64,
    to: Option<Address>,
    value: U256,
    input: Bytes,
) -> Transaction {
    let mut tx = TxLegacy {
        chain_id: Some(1),
        nonce,
        gas_price: 20_000_000_000,
        gas_limit: 100_000,
        to: to.map(TxKind::Call).unwrap_or(TxKind::Create),
        value,
        input,
    };
    let signature = signer.sign_transaction_sync(&mut tx).unwrap();
    let envelope: TxEnvelope = tx.into_signed(signature).into();
    convert_transaction(&envelope)
}

/// Plain value-less transfer from [`test_signer`] to [`DEFAULT_RECIPIENT`].
pub fn test_transaction() -> Transaction {
    signed_legacy(
        &test_signer(),
        0,
        Some(DEFAULT_RECIPIENT),
        U256::ZERO,
        Bytes::new(),
    )
}

pub fn test_block(number: u64, transactions: Vec<Transaction>) -> Block {
    Block {
        number,
        hash: B256::left_padding_from(&number.to_be_bytes()),
        timestamp: 1_693_526_400,
        base_fee_per_gas: None,
        transactions,
    }
}

pub fn test_receipt(gas_used: u64, effective_gas_price: Option<U256>) -> Receipt {
    Receipt {
        status: 1,
        gas_used: U256::from(gas_used),
        effective_gas_price,
    }
}

/// `transfer(recipient, amount)` call data.
pub fn transfer_calldata(recipient: Address, amount: U256) -> Bytes {
    let mut data = Vec::with_capacity(68);
    data.extend_from_slice(&TRANSFER_SELECTOR);
    data.extend_from_slice(&[0u8; 12]);
    data.extend_from_slice(recipient.as_slice());
    data.extend_from_slice(&amount.to_be_bytes::<32>());
    Bytes::from(data)
}

pub fn watched(id: i64, user_id: &str, address: Address) -> WatchedAddress {
    let now = Utc::now();
    WatchedAddress {
        id,
        user_id: user_id.to_string(),
        address,
        is_active: true,
        created_at: now,
        updated_at: now,
    }
}

// ─────────────────────────────────────────────────────────────────
// Address source and cache tier
// ─────────────────────────────────────────────────────────────────

pub struct MemoryAddressSource {
    rows: Mutex<Vec<WatchedAddress>>,
    fail: AtomicBool,
}

impl MemoryAddressSource {
    pub fn new(rows: Vec<WatchedAddress>) -> Self {
        Self {
            rows: Mutex::new(rows),
            fail: AtomicBool::new(false),
        }
    }

    pub fn set_rows(&self, rows: Vec<WatchedAddress>) {
        *self.rows.lock().unwrap() = rows;
    }

    pub fn fail_queries(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl AddressSource for MemoryAddressSource {
    async fn query_active_addresses(&self) -> Result<Vec<WatchedAddress>> {
        if self.fail.load(Ordering::SeqCst) {
            bail!("connection refused");
        }
        let mut rows: Vec<WatchedAddress> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|row| row.is_active)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        Ok(rows)
    }
}

#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (String, Duration)>>,
    fail: AtomicBool,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: &str, value: &str) {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), (value.to_string(), Duration::ZERO));
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }

    pub fn fail_all(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn ttl_of(&self, key: &str) -> Option<Duration> {
        self.entries.lock().unwrap().get(key).map(|(_, ttl)| *ttl)
    }
}

#[async_trait]
impl AddressCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        if self.fail.load(Ordering::SeqCst) {
            bail!("cache unavailable");
        }
        Ok(self.entries.lock().unwrap().get(key).map(|(v, _)| v.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            bail!("cache unavailable");
        }
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), (value.to_string(), ttl));
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────
// Checkpoint store
// ─────────────────────────────────────────────────────────────────

pub struct MemoryCheckpointStore {
    checkpoints: Mutex<HashMap<String, u64>>,
    writes: Mutex<Vec<u64>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    journal: Journal,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::with_journal(Journal::default())
    }

    pub fn with_journal(journal: Journal) -> Self {
        Self {
            checkpoints: Mutex::new(HashMap::new()),
            writes: Mutex::new(Vec::new()),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            journal,
        }
    }

    pub fn seed(&self, instance_id: &str, block: u64) {
        self.checkpoints
            .lock()
            .unwrap()
            .insert(instance_id.to_string(), block);
    }

    /// Heights passed to successful writes, in call order.
    pub fn writes(&self) -> Vec<u64> {
        self.writes.lock().unwrap().clone()
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn get_last_processed_block(&self, instance_id: &str) -> Result<u64> {
        if self.fail_reads.load(Ordering::SeqCst) {
            bail!("checkpoint read failed");
        }
        Ok(self
            .checkpoints
            .lock()
            .unwrap()
            .get(instance_id)
            .copied()
            .unwrap_or(0))
    }

    async fn set_last_processed_block(&self, instance_id: &str, block: u64) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("checkpoint write failed");
        }
        let mut checkpoints = self.checkpoints.lock().unwrap();
        let current = checkpoints.entry(instance_id.to_string()).or_insert(0);
        *current = (*current).max(block);
        self.writes.lock().unwrap().push(block);
        self.journal
            .lock()
            .unwrap()
            .push(format!("checkpoint:{}", block));
        Ok(())
    }

    async fn list_checkpoints(&self) -> Result<Vec<CheckpointRecord>> {
        let mut records: Vec<CheckpointRecord> = self
            .checkpoints
            .lock()
            .unwrap()
            .iter()
            .map(|(id, block)| CheckpointRecord {
                instance_id: id.clone(),
                last_processed_block: *block,
                updated_at: 0,
            })
            .collect();
        records.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));
        Ok(records)
    }
}

// ─────────────────────────────────────────────────────────────────
// Ledger
// ─────────────────────────────────────────────────────────────────

pub struct MockLedger {
    height: AtomicU64,
    blocks: Mutex<HashMap<u64, Block>>,
    failing_blocks: Mutex<HashSet<u64>>,
    gated_blocks: Mutex<HashMap<u64, Arc<Notify>>>,
    receipts: Mutex<HashMap<B256, Receipt>>,
    failing_receipts: Mutex<HashSet<B256>>,
    fetched_blocks: Mutex<Vec<u64>>,
    receipt_calls: Mutex<Vec<B256>>,
    head_tx: Mutex<Option<mpsc::UnboundedSender<BlockHeader>>>,
    head_rx: Mutex<Option<mpsc::UnboundedReceiver<BlockHeader>>>,
    fail_subscribe: AtomicBool,
}

impl MockLedger {
    pub fn new(height: u64) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            height: AtomicU64::new(height),
            blocks: Mutex::new(HashMap::new()),
            failing_blocks: Mutex::new(HashSet::new()),
            gated_blocks: Mutex::new(HashMap::new()),
            receipts: Mutex::new(HashMap::new()),
            failing_receipts: Mutex::new(HashSet::new()),
            fetched_blocks: Mutex::new(Vec::new()),
            receipt_calls: Mutex::new(Vec::new()),
            head_tx: Mutex::new(Some(tx)),
            head_rx: Mutex::new(Some(rx)),
            fail_subscribe: AtomicBool::new(false),
        }
    }

    /// Register a block; every transaction gets a successful 21000-gas
    /// receipt unless one was added explicitly.
    pub fn add_block(&self, block: Block) {
        {
            let mut receipts = self.receipts.lock().unwrap();
            for tx in &block.transactions {
                receipts
                    .entry(tx.hash)
                    .or_insert_with(|| test_receipt(21000, None));
            }
        }
        self.blocks.lock().unwrap().insert(block.number, block);
    }

    pub fn set_receipt(&self, tx_hash: B256, receipt: Receipt) {
        self.receipts.lock().unwrap().insert(tx_hash, receipt);
    }

    pub fn fail_block(&self, number: u64) {
        self.failing_blocks.lock().unwrap().insert(number);
    }

    /// Hold fetches of block `number` until the returned gate is notified.
    pub fn gate_block(&self, number: u64) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.gated_blocks
            .lock()
            .unwrap()
            .insert(number, gate.clone());
        gate
    }

    pub fn fail_receipt(&self, tx_hash: B256) {
        self.failing_receipts.lock().unwrap().insert(tx_hash);
    }

    pub fn fail_subscribe(&self, fail: bool) {
        self.fail_subscribe.store(fail, Ordering::SeqCst);
    }

    /// Announce a new head on the live subscription.
    pub fn push_head(&self, number: u64) {
        let header = BlockHeader {
            number,
            hash: B256::left_padding_from(&number.to_be_bytes()),
        };
        if let Some(tx) = self.head_tx.lock().unwrap().as_ref() {
            let _ = tx.send(header);
        }
    }

    /// End the live subscription as a transport failure would.
    pub fn close_heads(&self) {
        self.head_tx.lock().unwrap().take();
    }

    pub fn fetched_blocks(&self) -> Vec<u64> {
        self.fetched_blocks.lock().unwrap().clone()
    }

    pub fn receipt_calls(&self) -> Vec<B256> {
        self.receipt_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl LedgerReader for MockLedger {
    async fn latest_height(&self) -> Result<u64> {
        Ok(self.height.load(Ordering::SeqCst))
    }

    async fn block_by_height(&self, height: u64) -> Result<Block> {
        self.fetched_blocks.lock().unwrap().push(height);
        let gate = self.gated_blocks.lock().unwrap().get(&height).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.failing_blocks.lock().unwrap().contains(&height) {
            bail!("Failed to get block {}", height);
        }
        Ok(self
            .blocks
            .lock()
            .unwrap()
            .get(&height)
            .cloned()
            .unwrap_or_else(|| test_block(height, vec![])))
    }

    async fn receipt(&self, tx_hash: B256) -> Result<Receipt> {
        self.receipt_calls.lock().unwrap().push(tx_hash);
        if self.failing_receipts.lock().unwrap().contains(&tx_hash) {
            bail!("Failed to get receipt for tx {:?}", tx_hash);
        }
        self.receipts
            .lock()
            .unwrap()
            .get(&tx_hash)
            .cloned()
            .with_context(|| format!("Receipt not found for tx {:?}", tx_hash))
    }

    async fn subscribe_new_heads(&self) -> Result<BoxStream<'static, BlockHeader>> {
        if self.fail_subscribe.load(Ordering::SeqCst) {
            bail!("Failed to subscribe to new heads");
        }
        let rx = self
            .head_rx
            .lock()
            .unwrap()
            .take()
            .context("already subscribed")?;
        Ok(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|header| (header, rx))
        })
        .boxed())
    }
}

// ─────────────────────────────────────────────────────────────────
// Publisher
// ─────────────────────────────────────────────────────────────────

pub struct RecordingPublisher {
    events: Mutex<Vec<TransactionEvent>>,
    failing_users: Mutex<HashSet<String>>,
    next_offset: AtomicI64,
    journal: Journal,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::with_journal(Journal::default())
    }

    pub fn with_journal(journal: Journal) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            failing_users: Mutex::new(HashSet::new()),
            next_offset: AtomicI64::new(0),
            journal,
        }
    }

    /// Make every publish for `user_id` fail.
    pub fn fail_for(&self, user_id: &str) {
        self.failing_users
            .lock()
            .unwrap()
            .insert(user_id.to_string());
    }

    pub fn events(&self) -> Vec<TransactionEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: &TransactionEvent) -> Result<Delivery> {
        if self.failing_users.lock().unwrap().contains(&event.user_id) {
            bail!("Failed to send message to Kafka: broker unavailable");
        }
        self.events.lock().unwrap().push(event.clone());
        self.journal.lock().unwrap().push(format!(
            "publish:{}:{}",
            event.block_number, event.user_id
        ));
        Ok(Delivery {
            partition: 0,
            offset: self.next_offset.fetch_add(1, Ordering::SeqCst),
        })
    }
}
