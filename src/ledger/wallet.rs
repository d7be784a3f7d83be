//! Coin balance mutations
//!
//! Both helpers run inside the caller's transaction, so the balance check and
//! the write always belong to the same atomic unit.

use crate::error::{CoreResult, RoundError};
use crate::storage::Transaction;
use crate::types::Coins;
use tracing::debug;

/// Add coins to a wallet, returning the new balance
pub fn credit(tx: &mut Transaction<'_>, profile_id: &str, amount: Coins) -> CoreResult<Coins> {
    let profile = tx.profile_mut(profile_id)?;
    profile.balance = profile
        .balance
        .checked_add(amount)
        .ok_or_else(|| RoundError::storage("Balance overflow"))?;
    debug!(
        "Credited {} coins to {} (balance {})",
        amount, profile_id, profile.balance
    );
    Ok(profile.balance)
}

/// Remove coins from a wallet, refusing to go below zero
pub fn debit(tx: &mut Transaction<'_>, profile_id: &str, amount: Coins) -> CoreResult<Coins> {
    let profile = tx.profile_mut(profile_id)?;
    profile.balance =
        profile
            .balance
            .checked_sub(amount)
            .ok_or(RoundError::InsufficientBalance {
                required: amount,
                available: profile.balance,
            })?;
    debug!(
        "Debited {} coins from {} (balance {})",
        amount, profile_id, profile.balance
    );
    Ok(profile.balance)
}
