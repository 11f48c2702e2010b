//! WebSocket JSON-RPC ledger reader
//!
//! Wraps an alloy provider and converts node responses into the crate's
//! own ledger types. Transactions keep their signature and signing hash so
//! the sender can be recovered against the configured chain id.

use crate::types::{Block, BlockHeader, Receipt, Transaction};
use alloy::consensus::{Transaction as _, TxEnvelope};
use alloy::eips::BlockNumberOrTag;
use alloy::network::ReceiptResponse as _;
use alloy::primitives::{B256, U256};
use alloy::providers::{Provider, ProviderBuilder, RootProvider, WsConnect};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::stream::{BoxStream, StreamExt};
use tracing::{info, warn};

/// Chain access needed by the watcher.
#[async_trait]
pub trait LedgerReader: Send + Sync {
    /// Current chain height.
    async fn latest_height(&self) -> Result<u64>;

    /// Block at `height` with full transaction bodies.
    async fn block_by_height(&self, height: u64) -> Result<Block>;

    /// Receipt of a mined transaction.
    async fn receipt(&self, tx_hash: B256) -> Result<Receipt>;

    /// Stream of new block headers. Ends when the transport closes.
    async fn subscribe_new_heads(&self) -> Result<BoxStream<'static, BlockHeader>>;
}

/// [`LedgerReader`] over an alloy WebSocket provider.
pub struct AlloyLedger {
    provider: RootProvider,
}

impl AlloyLedger {
    /// Dial `url` (ws:// or wss://) and compare the node's chain id with
    /// `expected_chain_id`. A mismatch is logged, not fatal; mismatching
    /// transactions are rejected later during sender recovery.
    pub async fn connect(url: &str, expected_chain_id: u64) -> Result<Self> {
        let provider = ProviderBuilder::new()
            .disable_recommended_fillers()
            .connect_ws(WsConnect::new(url))
            .await
            .context("Failed to connect to Ethereum node")?;

        let node_chain_id = provider
            .get_chain_id()
            .await
            .context("Failed to get chain id")?;
        if node_chain_id != expected_chain_id {
            warn!(
                node_chain_id,
                expected_chain_id, "Node chain id differs from configured chain id"
            );
        } else {
            info!(chain_id = node_chain_id, "Connected to Ethereum node");
        }

        Ok(Self { provider })
    }
}

#[async_trait]
impl LedgerReader for AlloyLedger {
    async fn latest_height(&self) -> Result<u64> {
        self.provider
            .get_block_number()
            .await
            .context("Failed to get latest block number")
    }

    async fn block_by_height(&self, height: u64) -> Result<Block> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Number(height))
            .full()
            .await
            .with_context(|| format!("Failed to get block {}", height))?
            .with_context(|| format!("Block {} not found", height))?;

        let transactions = block
            .transactions
            .as_transactions()
            .with_context(|| format!("Block {} returned without transaction bodies", height))?
            .iter()
            .map(|tx| convert_transaction(tx.inner.inner()))
            .collect();

        Ok(Block {
            number: block.header.inner.number,
            hash: block.header.hash,
            timestamp: block.header.inner.timestamp,
            base_fee_per_gas: block.header.inner.base_fee_per_gas.map(U256::from),
            transactions,
        })
    }

    async fn receipt(&self, tx_hash: B256) -> Result<Receipt> {
        let receipt = self
            .provider
            .get_transaction_receipt(tx_hash)
            .await
            .with_context(|| format!("Failed to get receipt for tx {:?}", tx_hash))?
            .with_context(|| format!("Receipt not found for tx {:?}", tx_hash))?;

        Ok(Receipt {
            status: u64::from(receipt.status()),
            gas_used: U256::from(receipt.gas_used),
            effective_gas_price: Some(U256::from(receipt.effective_gas_price)),
        })
    }

    async fn subscribe_new_heads(&self) -> Result<BoxStream<'static, BlockHeader>> {
        let subscription = self
            .provider
            .subscribe_blocks()
            .await
            .context("Failed to subscribe to new heads")?;

        Ok(subscription
            .into_stream()
            .map(|header| BlockHeader {
                number: header.inner.number,
                hash: header.hash,
            })
            .boxed())
    }
}

/// Convert a signed envelope into the crate's transaction type.
pub fn convert_transaction(envelope: &TxEnvelope) -> Transaction {
    let (gas_price, max_fee_per_gas, max_priority_fee_per_gas) = if envelope.is_dynamic_fee() {
        (
            None,
            Some(U256::from(envelope.max_fee_per_gas())),
            envelope.max_priority_fee_per_gas().map(U256::from),
        )
    } else {
        (envelope.gas_price().map(U256::from), None, None)
    };

    Transaction {
        hash: *envelope.tx_hash(),
        chain_id: envelope.chain_id(),
        signature: *envelope.signature(),
        signature_hash: envelope.signature_hash(),
        to: envelope.to(),
        value: envelope.value(),
        gas_price,
        max_fee_per_gas,
        max_priority_fee_per_gas,
        input: envelope.input().clone(),
        nonce: envelope.nonce(),
    }
}
