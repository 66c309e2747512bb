//! Root-chain access for the Plasma Cash client.
//!
//! This crate turns contract interface definitions into a signed contract
//! facade, serializes the nonces of one signing key, wraps the root-chain and
//! token contracts in typed calls, and decodes root-chain events.

pub mod account;
pub mod bindings;
pub mod client;
pub mod errors;
pub mod events;
pub mod root_chain;
pub mod signed;
pub mod tokens;

// Re-export commonly used types
pub use account::{Account, NonceQueue};
pub use bindings::{ContractInterfaceDescriptor, MethodKind};
pub use client::{connect, EthersRootChain, LogQuery, RootChainClient};
pub use errors::BridgeError;
pub use events::{
    decode_log, subscribe_events, EventFilter, EventSubscription, Observation, ObservedEvent, RootChainEvent,
};
pub use root_chain::{Balances, CoinState, ExitInfo, PlasmaCoin, RootChain};
pub use signed::{Invocation, PendingTx, SignedContract, DEFAULT_GAS_MULTIPLIER_PERCENT};
pub use tokens::{Erc20, Erc721};
