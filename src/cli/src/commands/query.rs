//! Read-only commands for the Plasma Cash CLI.

use plasma_bridge::PlasmaCoin;
use plasma_client::{ClientError, User};
use plasma_core::{DepositEvent, Slot, Transition};

/// Reads a coin from the root-chain contract.
pub async fn coin(user: &User, slot: Slot) -> Result<PlasmaCoin, ClientError> {
    user.coin(slot).await
}

/// Lists our deposits.
pub async fn deposits(user: &User) -> Result<Vec<DepositEvent>, ClientError> {
    user.deposits().await
}

/// Lists the recorded history of a coin.
pub fn history(user: &User, slot: Slot) -> Result<Vec<Transition>, ClientError> {
    user.history(slot)
}

/// Syncs with the side chain and imports new deposits.
pub async fn refresh(user: &User) -> Result<usize, ClientError> {
    user.refresh().await
}
