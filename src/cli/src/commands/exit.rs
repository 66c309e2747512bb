//! Exit commands for the Plasma Cash CLI: start, finalize and withdraw.

use super::confirm;
use ethers::types::TransactionReceipt;
use plasma_client::{ClientError, User};
use plasma_core::Slot;

/// Starts the exit of a coin.
pub async fn exit_coin(user: &User, slot: Slot) -> Result<TransactionReceipt, ClientError> {
    let pending = user.exit_coin(slot).await?;
    confirm(user, &pending).await
}

/// Finalizes the exit of a coin.
pub async fn finalize(user: &User, slot: Slot) -> Result<TransactionReceipt, ClientError> {
    user.finalize_exit(slot).await
}

/// Withdraws a coin whose exit was finalized.
pub async fn withdraw(user: &User, slot: Slot) -> Result<TransactionReceipt, ClientError> {
    let pending = user.withdraw(slot).await?;
    confirm(user, &pending).await
}

/// Withdraws every withdrawable bond.
pub async fn withdraw_bonds(user: &User) -> Result<TransactionReceipt, ClientError> {
    let pending = user.withdraw_bonds().await?;
    confirm(user, &pending).await
}
