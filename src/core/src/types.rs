//! Core types for the Plasma Cash client.

use crate::errors::CoreError;
use ethers::types::{Address, Bytes, H256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Side-chain block number, assigned by the operator when a transaction is included.
pub type BlockNumber = u64;

/// Unique identifier of one coin, assigned by the root-chain contract at deposit time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Slot(pub U256);

impl Slot {
    /// Returns the 32-byte big-endian encoding used for storage keys.
    pub fn to_be_bytes(&self) -> [u8; 32] {
        let mut bytes = [0u8; 32];
        self.0.to_big_endian(&mut bytes);
        bytes
    }

    /// Decodes a slot from its big-endian encoding.
    pub fn from_be_bytes(bytes: &[u8]) -> Result<Self, CoreError> {
        if bytes.len() != 32 {
            return Err(CoreError::InvalidSlot(format!(
                "expected 32 bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Slot(U256::from_big_endian(bytes)))
    }

    /// Returns the slot as a `U256` for ABI encoding.
    pub fn as_u256(&self) -> U256 {
        self.0
    }
}

impl From<u64> for Slot {
    fn from(value: u64) -> Self {
        Slot(U256::from(value))
    }
}

impl From<U256> for Slot {
    fn from(value: U256) -> Self {
        Slot(value)
    }
}

/// Slots are written in hexadecimal, with or without a `0x` prefix.
impl FromStr for Slot {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.trim().trim_start_matches("0x");
        if digits.is_empty() {
            return Err(CoreError::InvalidSlot(s.to_string()));
        }
        U256::from_str_radix(digits, 16)
            .map(Slot)
            .map_err(|e| CoreError::InvalidSlot(format!("{}: {:?}", s, e)))
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// One recorded change of a coin's owner, anchored to a side-chain block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transition {
    /// The side-chain block that included this transition
    pub block_number: BlockNumber,
    /// The block in which the coin's previous state was included
    pub prev_block_number: BlockNumber,
    /// The owner after this transition
    pub owner: Address,
    /// The units the coin represents (1 for non-fungible coins)
    pub denomination: U256,
    /// The previous owner's signature over the transaction hash
    #[serde(default)]
    pub signature: Bytes,
    /// The RLP-encoded side-chain transaction
    #[serde(default)]
    pub tx_bytes: Bytes,
    /// The inclusion proof for `tx_bytes` in `block_number`
    #[serde(default)]
    pub proof: Bytes,
    /// The side-chain transaction hash
    #[serde(default)]
    pub tx_hash: H256,
}

impl Transition {
    /// Creates a transition without the signed transaction payload.
    pub fn new(
        block_number: BlockNumber,
        prev_block_number: BlockNumber,
        owner: Address,
        denomination: U256,
    ) -> Self {
        Self {
            block_number,
            prev_block_number,
            owner,
            denomination,
            signature: Bytes::default(),
            tx_bytes: Bytes::default(),
            proof: Bytes::default(),
            tx_hash: H256::zero(),
        }
    }

    /// Attaches the signed transaction and its inclusion proof.
    pub fn with_signed_tx(mut self, tx_bytes: Bytes, signature: Bytes, proof: Bytes, tx_hash: H256) -> Self {
        self.tx_bytes = tx_bytes;
        self.signature = signature;
        self.proof = proof;
        self.tx_hash = tx_hash;
        self
    }

    /// Deposits have no predecessor on the side chain.
    pub fn is_deposit(&self) -> bool {
        self.prev_block_number == 0
    }

    /// Whether both describe the same coin state, ignoring the signed payload.
    pub fn same_state(&self, other: &Transition) -> bool {
        self.block_number == other.block_number
            && self.prev_block_number == other.prev_block_number
            && self.owner == other.owner
            && self.denomination == other.denomination
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Transition {{ block: {}, prev_block: {}, owner: {:?}, denomination: {} }}",
            self.block_number, self.prev_block_number, self.owner, self.denomination
        )
    }
}

/// The two block numbers the exit game needs to start an exit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExitParams {
    /// The coin being exited
    pub slot: Slot,
    /// The block of the latest transition
    pub exit_block_num: BlockNumber,
    /// The latest transition's predecessor block
    pub prev_block_num: BlockNumber,
}

/// The parameters needed to build a transfer of a coin.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransferParams {
    /// The coin being transferred
    pub slot: Slot,
    /// The block of the latest transition, reused as the new transition's predecessor
    pub prev_block_num: BlockNumber,
    /// The coin's denomination
    pub denomination: U256,
}

/// State of a coin under exit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExitState {
    /// Waiting for the exit event
    Watching,
    /// Comparing an observed exit against local history
    Evaluating,
    /// A challenge was submitted, or the exit was challenged by someone else
    Challenged,
    /// The exit matches local history
    Unchallenged,
    /// The challenge window has elapsed
    Finalizable,
    /// The exit was finalized on the root chain
    Finalized,
}

impl ExitState {
    /// Terminal states never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, ExitState::Challenged | ExitState::Finalized)
    }

    /// Returns whether moving from `self` to `next` is allowed.
    pub fn can_advance_to(self, next: ExitState) -> bool {
        use ExitState::*;
        if self.is_terminal() {
            return false;
        }
        match next {
            Evaluating => self == Watching,
            Unchallenged => self == Evaluating,
            Finalizable => self == Unchallenged,
            // Challenges and finalization may be observed from any live state.
            Challenged | Finalized => true,
            Watching => false,
        }
    }
}

impl fmt::Display for ExitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExitState::Watching => "watching",
            ExitState::Evaluating => "evaluating",
            ExitState::Challenged => "challenged",
            ExitState::Unchallenged => "unchallenged",
            ExitState::Finalizable => "finalizable",
            ExitState::Finalized => "finalized",
        };
        f.write_str(name)
    }
}

/// Tracks one coin with an active exit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExitRecord {
    /// The coin under exit
    pub slot: Slot,
    /// The block the exit claims as the coin's current state
    pub exit_block_num: BlockNumber,
    /// The predecessor block the exit claims
    pub prev_block_num: BlockNumber,
    /// Unix time (seconds) the exit was started or first observed
    pub started_at: u64,
    /// Current state
    pub state: ExitState,
    /// The account that started the exit
    pub exiter: Address,
    /// The challenge transaction, once submitted
    pub challenge_tx: Option<H256>,
}

impl ExitRecord {
    /// Creates a record in the `Watching` state.
    pub fn new(params: ExitParams, exiter: Address, started_at: u64) -> Self {
        Self {
            slot: params.slot,
            exit_block_num: params.exit_block_num,
            prev_block_num: params.prev_block_num,
            started_at,
            state: ExitState::Watching,
            exiter,
            challenge_tx: None,
        }
    }

    /// Moves the record to `next`, rejecting transitions the state machine forbids.
    pub fn advance(&mut self, next: ExitState) -> Result<(), CoreError> {
        if !self.state.can_advance_to(next) {
            return Err(CoreError::InvalidExitState {
                slot: self.slot,
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }
}

/// A counterparty-supplied history for one coin.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryBundle {
    /// The coin the history belongs to
    pub slot: Slot,
    /// Every transition since deposit
    pub transitions: Vec<Transition>,
}

/// A deposit into the root-chain contract.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositEvent {
    /// The slot assigned to the deposited coin
    pub slot: Slot,
    /// The side-chain block the deposit was recorded in
    pub block_number: BlockNumber,
    /// The deposited amount (1 for non-fungible tokens)
    pub denomination: U256,
    /// The depositor
    pub from: Address,
    /// The token contract
    pub contract_address: Address,
}

impl DepositEvent {
    /// The first transition of a deposited coin.
    pub fn to_transition(&self) -> Transition {
        Transition::new(self.block_number, 0, self.from, self.denomination)
    }
}
