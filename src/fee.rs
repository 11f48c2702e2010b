//! Event fee figures
//!
//! Every published event reports the price the sender actually paid per unit
//! of gas and the total fee in wei. Both are derived from the receipt when
//! the node reports the paid price, otherwise from the transaction's own
//! pricing fields and the block base fee.

use crate::types::{Block, Receipt, Transaction};
use alloy::primitives::U256;
use anyhow::{Context, Result};

/// Price per gas paid by `tx`, as reported in the event's `gas_price`.
///
/// The receipt's `effective_gas_price` wins when present. Without it a
/// legacy transaction paid its fixed `gas_price`, and a dynamic-fee
/// transaction paid the base fee plus its tip, capped at `max_fee_per_gas`.
pub fn calculate_effective_gas_price(
    tx: &Transaction,
    receipt: &Receipt,
    block: &Block,
) -> Result<U256> {
    if let Some(paid) = receipt.effective_gas_price {
        return Ok(paid);
    }

    if tx.is_legacy() {
        return tx
            .gas_price
            .with_context(|| format!("Legacy tx {:?} has no gas price", tx.hash));
    }

    if !tx.is_eip1559() {
        anyhow::bail!("Tx {:?} carries no gas pricing fields", tx.hash);
    }

    let base_fee = block.base_fee_per_gas.with_context(|| {
        format!(
            "Block {} has no base fee for dynamic-fee tx {:?}",
            block.number, tx.hash
        )
    })?;
    let cap = tx
        .max_fee_per_gas
        .with_context(|| format!("Dynamic-fee tx {:?} has no fee cap", tx.hash))?;
    let tip = tx.max_priority_fee_per_gas.unwrap_or(U256::ZERO);

    Ok(base_fee.saturating_add(tip).min(cap))
}

/// Total fee in wei reported in the event's `fees` field.
pub fn calculate_fee(gas_used: U256, effective_gas_price: U256) -> U256 {
    gas_used.saturating_mul(effective_gas_price)
}
