//! Monitoring orchestrator
//!
//! Resolves a start height from the checkpoint, replays historical blocks
//! up to the chain height seen at startup, then follows new heads until
//! cancelled. Blocks and transactions are processed strictly in order and
//! every processed block advances the checkpoint exactly once, after all of
//! its transactions have been evaluated.

use crate::fee::{calculate_effective_gas_price, calculate_fee};
use crate::publisher::EventPublisher;
use crate::records::{AddressMatchResult, TransactionEvent};
use crate::registry::AddressRegistry;
use crate::rpc::LedgerReader;
use crate::store::CheckpointStore;
use crate::transfer::extract_amount;
use crate::types::{Block, Transaction};
use alloy::primitives::{Address, B256, U256};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Orchestrator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    ResolvingStart,
    Backfilling,
    Following,
    Stopped,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::ResolvingStart => "resolving_start",
            Phase::Backfilling => "backfilling",
            Phase::Following => "following",
            Phase::Stopped => "stopped",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The orchestrator stopped because the cancellation signal fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

impl fmt::Display for Cancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("monitoring cancelled")
    }
}

impl std::error::Error for Cancelled {}

/// Returns true if `err` is a [`Cancelled`] outcome.
pub fn is_cancelled(err: &anyhow::Error) -> bool {
    err.downcast_ref::<Cancelled>().is_some()
}

/// Outcome of one processed block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockSummary {
    pub block_number: u64,
    pub block_hash: B256,
    pub tx_count: usize,
    /// Transactions with at least one watched address
    pub matched_txs: usize,
    pub published_events: usize,
    pub processing_ms: u64,
}

/// Why a block could not be processed.
#[derive(Debug)]
enum BlockError {
    /// Skip the block and keep going.
    Recoverable(anyhow::Error),
    /// The checkpoint could not be advanced; stop the phase.
    Checkpoint(anyhow::Error),
}

#[derive(Debug, Default, Clone, Copy)]
struct TxOutcome {
    matched: bool,
    published: usize,
}

/// Start height for a checkpoint `checkpoint` and chain height `height`.
///
/// A fresh instance (checkpoint 0) starts at the chain head instead of
/// replaying history.
pub fn resolve_start_height(checkpoint: u64, height: u64) -> u64 {
    if checkpoint == 0 {
        height
    } else {
        checkpoint.saturating_add(1)
    }
}

/// Drives the backfill and live-follow phases for one instance.
pub struct Watcher {
    instance_id: String,
    chain_id: u64,
    registry: Arc<AddressRegistry>,
    checkpoints: Arc<dyn CheckpointStore>,
    ledger: Arc<dyn LedgerReader>,
    publisher: Arc<dyn EventPublisher>,
    phase: watch::Sender<Phase>,
}

impl Watcher {
    pub fn new(
        instance_id: String,
        chain_id: u64,
        registry: Arc<AddressRegistry>,
        checkpoints: Arc<dyn CheckpointStore>,
        ledger: Arc<dyn LedgerReader>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        let (phase, _) = watch::channel(Phase::ResolvingStart);
        Self {
            instance_id,
            chain_id,
            registry,
            checkpoints,
            ledger,
            publisher,
            phase,
        }
    }

    /// Observe phase transitions.
    pub fn phase(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    fn set_phase(&self, phase: Phase) {
        info!(instance_id = %self.instance_id, phase = %phase, "Monitoring phase changed");
        self.phase.send_replace(phase);
    }

    /// Run until cancelled or a phase-fatal error.
    ///
    /// Cancellation surfaces as a [`Cancelled`] error. The phase is
    /// `Stopped` once this returns.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let result = self.run_phases(&cancel).await;
        self.set_phase(Phase::Stopped);
        result
    }

    async fn run_phases(&self, cancel: &CancellationToken) -> Result<()> {
        self.set_phase(Phase::ResolvingStart);
        let (start, height) = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Cancelled.into()),
            resolved = self.resolve_start() => resolved?,
        };

        self.set_phase(Phase::Backfilling);
        self.backfill(start, height, cancel).await?;

        self.set_phase(Phase::Following);
        self.follow(start.max(height.saturating_add(1)), cancel).await
    }

    /// Read the checkpoint and chain height; returns `(start, height)`.
    pub async fn resolve_start(&self) -> Result<(u64, u64)> {
        let checkpoint = self
            .checkpoints
            .get_last_processed_block(&self.instance_id)
            .await
            .context("Failed to get last processed block")?;
        let height = self
            .ledger
            .latest_height()
            .await
            .context("Failed to get latest block number")?;

        let start = resolve_start_height(checkpoint, height);
        info!(
            instance_id = %self.instance_id,
            checkpoint,
            latest_block = height,
            start_block = start,
            "Resolved start block"
        );
        Ok((start, height))
    }

    /// Process `[start, end]`. `end` is fixed; newer blocks belong to the
    /// live phase.
    async fn backfill(&self, start: u64, end: u64, cancel: &CancellationToken) -> Result<()> {
        if start > end {
            info!(start_block = start, latest_block = end, "No historical blocks to process");
            return Ok(());
        }

        info!(from = start, to = end, "Processing historical blocks");
        for height in start..=end {
            if cancel.is_cancelled() {
                return Err(Cancelled.into());
            }
            self.handle_block(height).await?;
        }
        info!(from = start, to = end, "Historical blocks processed");
        Ok(())
    }

    /// Process heads in delivery order until cancelled, starting at `next`.
    ///
    /// A head above `next` first pulls in every height in between, so blocks
    /// mined during backfill or whose header the node never announced are
    /// not skipped. Heads below `next` were already processed.
    async fn follow(&self, mut next: u64, cancel: &CancellationToken) -> Result<()> {
        let mut heads = self
            .ledger
            .subscribe_new_heads()
            .await
            .context("Failed to subscribe to new heads")?;
        info!("Subscribed to new block headers");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Live subscription closed");
                    return Err(Cancelled.into());
                }
                head = heads.next() => match head {
                    Some(header) => {
                        debug!(block = header.number, hash = ?header.hash, "New block header");
                        next = self.catch_up(next, header.number, cancel).await?;
                    }
                    None => anyhow::bail!("New head subscription ended"),
                },
            }
        }
    }

    /// Process `[next, head]` and return the new cursor.
    async fn catch_up(&self, next: u64, head: u64, cancel: &CancellationToken) -> Result<u64> {
        if head < next {
            debug!(block = head, next, "Head already processed");
            return Ok(next);
        }
        if head > next {
            info!(from = next, to = head - 1, "Catching up on unannounced blocks");
        }
        for height in next..=head {
            if cancel.is_cancelled() {
                return Err(Cancelled.into());
            }
            self.handle_block(height).await?;
        }
        Ok(head.saturating_add(1))
    }

    /// Process one block, absorbing recoverable failures.
    async fn handle_block(&self, height: u64) -> Result<()> {
        match self.process_block(height).await {
            Ok(summary) => {
                debug!(
                    block = summary.block_number,
                    hash = ?summary.block_hash,
                    tx_count = summary.tx_count,
                    matched_txs = summary.matched_txs,
                    published_events = summary.published_events,
                    processing_ms = summary.processing_ms,
                    "Block processed"
                );
                Ok(())
            }
            Err(BlockError::Recoverable(e)) => {
                error!(block = height, error = ?e, "Failed to process block");
                Ok(())
            }
            Err(BlockError::Checkpoint(e)) => Err(e),
        }
    }

    /// Evaluate every transaction of block `height`, then advance the
    /// checkpoint to `height`.
    async fn process_block(&self, height: u64) -> Result<BlockSummary, BlockError> {
        let started = Instant::now();
        let block = self
            .ledger
            .block_by_height(height)
            .await
            .with_context(|| format!("Failed to get block {}", height))
            .map_err(BlockError::Recoverable)?;

        let mut summary = BlockSummary {
            block_number: height,
            block_hash: block.hash,
            tx_count: block.transactions.len(),
            matched_txs: 0,
            published_events: 0,
            processing_ms: 0,
        };

        for tx in &block.transactions {
            match self.process_transaction(tx, &block).await {
                Ok(outcome) => {
                    if outcome.matched {
                        summary.matched_txs += 1;
                    }
                    summary.published_events += outcome.published;
                }
                Err(e) => {
                    error!(block = height, tx_hash = ?tx.hash, error = ?e, "Failed to process transaction");
                }
            }
        }

        self.checkpoints
            .set_last_processed_block(&self.instance_id, height)
            .await
            .with_context(|| format!("Failed to advance checkpoint to block {}", height))
            .map_err(BlockError::Checkpoint)?;

        summary.processing_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        Ok(summary)
    }

    async fn process_transaction(&self, tx: &Transaction, block: &Block) -> Result<TxOutcome> {
        let source = tx
            .recover_sender(self.chain_id)
            .context("Failed to get sender")?;
        let destination = tx.destination();

        let matches = self
            .registry
            .check_transaction_addresses(source, destination)
            .await;
        if matches.is_empty() {
            return Ok(TxOutcome::default());
        }

        let mut outcome = TxOutcome {
            matched: true,
            published: 0,
        };

        let receipt = match self.ledger.receipt(tx.hash).await {
            Ok(receipt) => receipt,
            Err(e) => {
                warn!(
                    block = block.number,
                    tx_hash = ?tx.hash,
                    error = ?e,
                    "Failed to get receipt, dropping matched transaction"
                );
                return Ok(outcome);
            }
        };

        let amount = extract_amount(tx);
        let gas_price = calculate_effective_gas_price(tx, &receipt, block)?;
        let fees = calculate_fee(receipt.gas_used, gas_price);
        let gas_used = u64::try_from(receipt.gas_used)
            .with_context(|| format!("Gas used {} exceeds u64", receipt.gas_used))?;
        let timestamp = i64::try_from(block.timestamp)
            .ok()
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
            .with_context(|| format!("Block timestamp {} out of range", block.timestamp))?;

        let fields = EventFields {
            source,
            destination,
            amount,
            fees,
            gas_used,
            gas_price,
            timestamp,
            status: receipt.status,
        };

        for m in &matches {
            let event = build_event(tx, block, m, &fields);
            match self.publisher.publish(&event).await {
                Ok(delivery) => {
                    outcome.published += 1;
                    info!(
                        tx_hash = %event.transaction_hash,
                        user_id = %event.user_id,
                        address = %m.address,
                        is_source = m.is_source,
                        is_destination = m.is_destination,
                        partition = delivery.partition,
                        offset = delivery.offset,
                        "Transaction event published"
                    );
                }
                Err(e) => {
                    error!(
                        tx_hash = %event.transaction_hash,
                        user_id = %m.user_id,
                        error = ?e,
                        "Failed to publish transaction event"
                    );
                }
            }
        }

        Ok(outcome)
    }
}

/// Per-transaction values shared by every event of that transaction.
struct EventFields {
    source: Address,
    destination: Address,
    amount: U256,
    fees: U256,
    gas_used: u64,
    gas_price: U256,
    timestamp: DateTime<Utc>,
    status: u64,
}

fn build_event(
    tx: &Transaction,
    block: &Block,
    m: &AddressMatchResult,
    fields: &EventFields,
) -> TransactionEvent {
    TransactionEvent {
        transaction_hash: format!("0x{}", hex::encode(tx.hash)),
        block_number: block.number,
        block_hash: format!("0x{}", hex::encode(block.hash)),
        user_id: m.user_id.clone(),
        source: fields.source.to_checksum(None),
        destination: fields.destination.to_checksum(None),
        amount: fields.amount.to_string(),
        fees: fields.fees.to_string(),
        gas_used: fields.gas_used,
        gas_price: fields.gas_price.to_string(),
        timestamp: fields.timestamp,
        status: fields.status,
        nonce: tx.nonce,
    }
}
