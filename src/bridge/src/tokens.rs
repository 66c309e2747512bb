//! Typed wrappers over the token contracts coins are deposited from.

use crate::bindings::Outputs;
use crate::errors::BridgeError;
use crate::signed::{PendingTx, SignedContract};
use ethers::abi::Token;
use ethers::types::{Address, U256};

/// An ERC-721 contract bound to a signing account.
#[derive(Clone)]
pub struct Erc721 {
    contract: SignedContract,
}

impl Erc721 {
    /// Wraps a facade whose descriptor is the ERC-721 interface.
    pub fn new(contract: SignedContract) -> Self {
        Self { contract }
    }

    /// The token contract address.
    pub fn address(&self) -> Address {
        self.contract.address()
    }

    /// Transfers `token_id` from `from` to `to`, notifying contract receivers.
    pub async fn safe_transfer_from(
        &self,
        from: Address,
        to: Address,
        token_id: U256,
    ) -> Result<PendingTx, BridgeError> {
        self.contract
            .send(
                "safeTransferFrom",
                &[Token::Address(from), Token::Address(to), Token::Uint(token_id)],
            )
            .await
    }

    /// The owner of `token_id`.
    pub async fn owner_of(&self, token_id: U256) -> Result<Address, BridgeError> {
        let tokens = self.contract.call("ownerOf", &[Token::Uint(token_id)]).await?;
        Outputs::new("ownerOf", tokens).address()
    }

    /// The number of tokens `owner` holds.
    pub async fn balance_of(&self, owner: Address) -> Result<U256, BridgeError> {
        let tokens = self.contract.call("balanceOf", &[Token::Address(owner)]).await?;
        Outputs::new("balanceOf", tokens).uint()
    }
}

/// An ERC-20 contract bound to a signing account.
#[derive(Clone)]
pub struct Erc20 {
    contract: SignedContract,
}

impl Erc20 {
    /// Wraps a facade whose descriptor is the ERC-20 interface.
    pub fn new(contract: SignedContract) -> Self {
        Self { contract }
    }

    /// The token contract address.
    pub fn address(&self) -> Address {
        self.contract.address()
    }

    /// Allows `spender` to move up to `amount` tokens.
    pub async fn approve(&self, spender: Address, amount: U256) -> Result<PendingTx, BridgeError> {
        self.contract
            .send("approve", &[Token::Address(spender), Token::Uint(amount)])
            .await
    }

    /// The token balance of `owner`.
    pub async fn balance_of(&self, owner: Address) -> Result<U256, BridgeError> {
        let tokens = self.contract.call("balanceOf", &[Token::Address(owner)]).await?;
        Outputs::new("balanceOf", tokens).uint()
    }

    /// The amount `spender` may still move on behalf of `owner`.
    pub async fn allowance(&self, owner: Address, spender: Address) -> Result<U256, BridgeError> {
        let tokens = self
            .contract
            .call("allowance", &[Token::Address(owner), Token::Address(spender)])
            .await?;
        Outputs::new("allowance", tokens).uint()
    }
}
