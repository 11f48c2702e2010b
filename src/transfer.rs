//! Token transfer call decoding
//!
//! Recognizes the standard `transfer(address,uint256)` call in transaction
//! input and extracts the transferred amount. Any other call shape falls
//! back to the transaction's native value.

use crate::types::Transaction;
use alloy::primitives::{Address, U256};

/// bytes4(keccak256("transfer(address,uint256)"))
pub const TRANSFER_SELECTOR: [u8; 4] = [0xa9, 0x05, 0x9c, 0xbb];

/// Selector plus two 32-byte argument slots.
const TRANSFER_CALL_LEN: usize = 68;

/// Arguments of a decoded `transfer(address,uint256)` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenTransfer {
    pub recipient: Address,
    pub amount: U256,
}

/// Decode `input` as a token transfer call.
///
/// Layout: selector [0:4), recipient slot [4:36), amount slot [36:68).
/// Trailing bytes beyond the second slot are ignored.
pub fn decode_token_transfer(input: &[u8]) -> Option<TokenTransfer> {
    if input.len() < TRANSFER_CALL_LEN || input[..4] != TRANSFER_SELECTOR {
        return None;
    }

    // Address is right-aligned in its slot
    let recipient = Address::from_slice(&input[16..36]);
    let amount = U256::from_be_slice(&input[36..68]);
    Some(TokenTransfer { recipient, amount })
}

/// Amount a transaction moves: the token amount for a transfer call,
/// otherwise the native value.
pub fn extract_amount(tx: &Transaction) -> U256 {
    if tx.input.is_empty() {
        return tx.value;
    }

    match decode_token_transfer(&tx.input) {
        Some(transfer) => {
            tracing::debug!(
                tx_hash = %tx.hash,
                recipient = %transfer.recipient,
                amount = %transfer.amount,
                "extracted token transfer amount"
            );
            transfer.amount
        }
        None => tx.value,
    }
}
