//! Ledger data model
//!
//! Client-independent definitions for blocks, transactions, and receipts.
//! The RPC layer converts node responses into these types so the watcher
//! never depends on a particular client library.

use alloy::primitives::{Address, Bytes, Signature, B256, U256};
use anyhow::{Context, Result};

/// Header announced by the live subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    /// Block number
    pub number: u64,
    /// Block hash
    pub hash: B256,
}

/// Block with full transaction bodies.
#[derive(Debug, Clone)]
pub struct Block {
    /// Block number
    pub number: u64,

    /// Block hash
    pub hash: B256,

    /// Block timestamp (Unix epoch seconds)
    pub timestamp: u64,

    /// Base fee per gas (EIP-1559), absent before London
    pub base_fee_per_gas: Option<U256>,

    /// Transactions in declared order
    pub transactions: Vec<Transaction>,
}

/// Signed transaction.
///
/// The sender is not stored: it is recovered from `signature` over
/// `signature_hash` by [`Transaction::recover_sender`].
#[derive(Debug, Clone)]
pub struct Transaction {
    /// Transaction hash
    pub hash: B256,

    /// Chain id embedded in the signature payload (None for pre-EIP-155 legacy)
    pub chain_id: Option<u64>,

    /// ECDSA signature
    pub signature: Signature,

    /// Hash the sender signed
    pub signature_hash: B256,

    /// Recipient address (None for contract creation)
    pub to: Option<Address>,

    /// Value transferred in wei
    pub value: U256,

    /// Gas price (legacy and EIP-2930 transactions)
    pub gas_price: Option<U256>,

    /// Max fee per gas (EIP-1559 and later)
    pub max_fee_per_gas: Option<U256>,

    /// Max priority fee per gas (EIP-1559 and later)
    pub max_priority_fee_per_gas: Option<U256>,

    /// Call data ("0x" for plain transfers)
    pub input: Bytes,

    /// Sender nonce
    pub nonce: u64,
}

impl Transaction {
    /// Check if this is a legacy transaction (has gasPrice, no maxFeePerGas).
    pub fn is_legacy(&self) -> bool {
        self.gas_price.is_some() && self.max_fee_per_gas.is_none()
    }

    /// Check if this is an EIP-1559 transaction (has maxFeePerGas).
    pub fn is_eip1559(&self) -> bool {
        self.max_fee_per_gas.is_some()
    }

    /// Recipient, or the zero address for contract creation.
    pub fn destination(&self) -> Address {
        self.to.unwrap_or(Address::ZERO)
    }

    /// Recover the sender for a signer bound to `chain_id`.
    ///
    /// Unprotected legacy transactions carry no chain id and are accepted
    /// on any chain; a protected transaction for another chain is rejected.
    pub fn recover_sender(&self, chain_id: u64) -> Result<Address> {
        if let Some(tx_chain_id) = self.chain_id {
            if tx_chain_id != chain_id {
                anyhow::bail!(
                    "invalid chain id for signer: tx has {}, expected {}",
                    tx_chain_id,
                    chain_id
                );
            }
        }

        self.signature
            .recover_address_from_prehash(&self.signature_hash)
            .with_context(|| format!("Failed to recover sender of tx {:?}", self.hash))
    }
}

/// Transaction receipt.
#[derive(Debug, Clone)]
pub struct Receipt {
    /// Transaction status: 1 = success, 0 = failure
    pub status: u64,

    /// Gas used
    pub gas_used: U256,

    /// Effective gas price (post-London)
    pub effective_gas_price: Option<U256>,
}
