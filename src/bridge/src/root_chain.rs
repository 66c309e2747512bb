//! Typed wrapper over the root-chain contract.

use crate::account::Account;
use crate::bindings::{ContractInterfaceDescriptor, Outputs};
use crate::client::RootChainClient;
use crate::errors::BridgeError;
use crate::signed::{PendingTx, SignedContract};
use ethers::abi::Token;
use ethers::types::{Address, U256};
use plasma_core::{BlockNumber, Slot, Transition};
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// State of a coin in the root-chain contract.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CoinState {
    /// Deposited and circulating on the side chain
    Deposited,
    /// Someone started an exit
    Exiting,
    /// The exit was finalized; the owner may withdraw
    Exited,
}

impl CoinState {
    fn from_u64(value: u64) -> Result<Self, BridgeError> {
        match value {
            0 => Ok(CoinState::Deposited),
            1 => Ok(CoinState::Exiting),
            2 => Ok(CoinState::Exited),
            other => Err(BridgeError::DecodeError(format!("Unknown coin state {}", other))),
        }
    }
}

impl fmt::Display for CoinState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoinState::Deposited => f.write_str("deposited"),
            CoinState::Exiting => f.write_str("exiting"),
            CoinState::Exited => f.write_str("exited"),
        }
    }
}

/// A coin as recorded by the root-chain contract.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlasmaCoin {
    /// The token id (ERC-721) or zero (ERC-20)
    pub uid: U256,
    /// The side-chain block the deposit was recorded in
    pub deposit_block: BlockNumber,
    /// The coin's denomination
    pub denomination: U256,
    /// The depositor
    pub owner: Address,
    /// The token contract
    pub contract_address: Address,
    /// Current state
    pub state: CoinState,
}

/// An exit as recorded by the root-chain contract.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExitInfo {
    /// The owner before the exiting transition
    pub prev_owner: Address,
    /// The exiter
    pub owner: Address,
    /// Root-chain timestamp the exit was started at
    pub created_at: u64,
    /// The bond attached to the exit
    pub bond: U256,
    /// The predecessor block the exit claims
    pub prev_block: BlockNumber,
    /// The block the exit claims as the coin's current state
    pub exit_block: BlockNumber,
    /// Raw exit state (0 = none)
    pub state: u8,
}

impl ExitInfo {
    /// An exit slot with no exit started.
    pub fn is_empty(&self) -> bool {
        self.owner == Address::zero()
    }
}

/// Bond balances of an account.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Balances {
    /// Bonds locked in open exits and challenges
    pub bonded: U256,
    /// Bonds that can be withdrawn
    pub withdrawable: U256,
}

/// The root-chain contract bound to a signing account.
#[derive(Clone)]
pub struct RootChain {
    contract: SignedContract,
}

impl RootChain {
    /// Wraps a facade whose descriptor is the root-chain interface.
    pub fn new(contract: SignedContract) -> Self {
        Self { contract }
    }

    /// Creates the facade from its parts.
    pub fn connect(
        client: Arc<dyn RootChainClient>,
        address: Address,
        account: Account,
    ) -> Result<Self, BridgeError> {
        let descriptor = ContractInterfaceDescriptor::root_chain()?;
        Ok(Self::new(SignedContract::new(client, descriptor, address, account)))
    }

    /// The underlying facade.
    pub fn contract(&self) -> &SignedContract {
        &self.contract
    }

    /// The contract address.
    pub fn address(&self) -> Address {
        self.contract.address()
    }

    /// Deposits ERC-20 tokens; the token allowance must already be in place.
    pub async fn deposit_erc20(&self, amount: U256, token: Address) -> Result<PendingTx, BridgeError> {
        self.contract
            .send("depositERC20", &[Token::Uint(amount), Token::Address(token)])
            .await
    }

    /// Starts an exit of `slot` from its `exiting` transition.
    ///
    /// `prev` is the transition `exiting` spends, absent for deposits.
    pub async fn start_exit(
        &self,
        slot: Slot,
        prev: Option<&Transition>,
        exiting: &Transition,
        bond: U256,
    ) -> Result<PendingTx, BridgeError> {
        let (prev_tx, prev_proof) = match prev {
            Some(prev) => (prev.tx_bytes.to_vec(), prev.proof.to_vec()),
            None => (Vec::new(), Vec::new()),
        };
        let args = [
            Token::Uint(slot.as_u256()),
            Token::Bytes(prev_tx),
            Token::Bytes(exiting.tx_bytes.to_vec()),
            Token::Bytes(prev_proof),
            Token::Bytes(exiting.proof.to_vec()),
            Token::Bytes(exiting.signature.to_vec()),
            Token::FixedArray(vec![
                Token::Uint(U256::from(exiting.prev_block_number)),
                Token::Uint(U256::from(exiting.block_number)),
            ]),
        ];
        info!(
            "Starting exit of {} at block {} (prev {})",
            slot, exiting.block_number, exiting.prev_block_number
        );
        self.contract.send_with_value("startExit", &args, Some(bond)).await
    }

    fn challenge_args(slot: Slot, challenging: &Transition) -> [Token; 5] {
        [
            Token::Uint(slot.as_u256()),
            Token::Uint(U256::from(challenging.block_number)),
            Token::Bytes(challenging.tx_bytes.to_vec()),
            Token::Bytes(challenging.proof.to_vec()),
            Token::Bytes(challenging.signature.to_vec()),
        ]
    }

    /// Challenges an exit with a transition that spends the exiting one.
    pub async fn challenge_after(&self, slot: Slot, challenging: &Transition) -> Result<PendingTx, BridgeError> {
        self.contract
            .send("challengeAfter", &Self::challenge_args(slot, challenging))
            .await
    }

    /// Challenges an exit with a transition that spends its parent, between parent and exit.
    pub async fn challenge_between(&self, slot: Slot, challenging: &Transition) -> Result<PendingTx, BridgeError> {
        self.contract
            .send("challengeBetween", &Self::challenge_args(slot, challenging))
            .await
    }

    /// Finalizes an exit whose challenge window has elapsed.
    pub async fn finalize_exit(&self, slot: Slot) -> Result<PendingTx, BridgeError> {
        self.contract.send("finalizeExit", &[Token::Uint(slot.as_u256())]).await
    }

    /// Withdraws a finalized coin.
    pub async fn withdraw(&self, slot: Slot) -> Result<PendingTx, BridgeError> {
        self.contract.send("withdraw", &[Token::Uint(slot.as_u256())]).await
    }

    /// Withdraws every withdrawable bond of the account.
    pub async fn withdraw_bonds(&self) -> Result<PendingTx, BridgeError> {
        self.contract.send("withdrawBonds", &[]).await
    }

    /// Reads the contract's record of a coin.
    pub async fn get_plasma_coin(&self, slot: Slot) -> Result<PlasmaCoin, BridgeError> {
        let tokens = self.contract.call("getPlasmaCoin", &[Token::Uint(slot.as_u256())]).await?;
        let mut out = Outputs::new("getPlasmaCoin", tokens);
        Ok(PlasmaCoin {
            uid: out.uint()?,
            deposit_block: out.u64()?,
            denomination: out.uint()?,
            owner: out.address()?,
            contract_address: out.address()?,
            state: CoinState::from_u64(out.u64()?)?,
        })
    }

    /// Reads the contract's record of an exit.
    pub async fn get_exit(&self, slot: Slot) -> Result<ExitInfo, BridgeError> {
        let tokens = self.contract.call("getExit", &[Token::Uint(slot.as_u256())]).await?;
        let mut out = Outputs::new("getExit", tokens);
        Ok(ExitInfo {
            prev_owner: out.address()?,
            owner: out.address()?,
            created_at: out.u64()?,
            bond: out.uint()?,
            prev_block: out.u64()?,
            exit_block: out.u64()?,
            state: u8::try_from(out.u64()?)
                .map_err(|_| BridgeError::DecodeError("getExit returned an exit state above 255".to_string()))?,
        })
    }

    /// Reads the bond balances of an account.
    pub async fn balances(&self, owner: Address) -> Result<Balances, BridgeError> {
        let tokens = self.contract.call("balances", &[Token::Address(owner)]).await?;
        let mut out = Outputs::new("balances", tokens);
        Ok(Balances {
            bonded: out.uint()?,
            withdrawable: out.uint()?,
        })
    }
}
