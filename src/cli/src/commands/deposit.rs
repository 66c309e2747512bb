//! Deposit command for the Plasma Cash CLI.

use super::confirm;
use ethers::types::{TransactionReceipt, U256};
use plasma_client::{ClientError, User};
use tracing::info;

/// What to deposit.
#[derive(Debug, Clone, Copy)]
pub enum Deposit {
    /// An ERC-721 token id
    Token(U256),
    /// An amount of the ERC-20 token
    Amount(U256),
}

/// Runs the deposit command.
pub async fn run(user: &User, deposit: Deposit) -> Result<TransactionReceipt, ClientError> {
    let pending = match deposit {
        Deposit::Token(uid) => {
            info!("Depositing ERC-721 token {}", uid);
            user.deposit(uid).await?
        }
        Deposit::Amount(amount) => {
            info!("Depositing {} ERC-20 tokens", amount);
            user.deposit_erc20(amount).await?
        }
    };
    confirm(user, &pending).await
}
