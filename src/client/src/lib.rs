//! The Plasma Cash client.
//!
//! This crate ties the coin history store and the root-chain facade together:
//! the `User` orchestrator runs the coin lifecycle, the `ExitWatcher` defends
//! owned coins against invalid exits, and `AppContext` carries what both share.

pub mod config;
pub mod context;
pub mod errors;
pub mod sidechain;
pub mod user;
pub mod verify;
pub mod watcher;

// Re-export commonly used types
pub use config::ClientConfig;
pub use context::AppContext;
pub use errors::ClientError;
pub use sidechain::{HttpSideChain, SideChainClient, TransferRequest};
pub use user::User;
pub use verify::{HistoryVerifier, LinkageVerifier};
pub use watcher::{ExitClaim, ExitOutcome, ExitWatcher, SlotEvent};
