//! Commands for the Plasma Cash CLI.

pub mod deposit;
pub mod exit;
pub mod query;
pub mod transfer;
pub mod watch;

use ethers::types::{TransactionReceipt, U256};
use plasma_bridge::PendingTx;
use plasma_client::{ClientError, User};
use tracing::debug;

/// Waits until a submitted transaction is mined.
pub(crate) async fn confirm(user: &User, pending: &PendingTx) -> Result<TransactionReceipt, ClientError> {
    debug!("Waiting for {:?}", pending.hash);
    Ok(user.context().root_chain.contract().wait(pending).await?)
}

/// Parses a decimal integer, or a hexadecimal one with a `0x` prefix.
pub fn parse_u256(s: &str) -> Result<U256, String> {
    let s = s.trim();
    match s.strip_prefix("0x") {
        Some(hex) => U256::from_str_radix(hex, 16).map_err(|e| format!("Invalid hex number {}: {:?}", s, e)),
        None => U256::from_dec_str(s).map_err(|e| format!("Invalid number {}: {:?}", s, e)),
    }
}
