//! Core primitives for the Plasma Cash client.
//!
//! This crate provides the coin identifiers and history transitions, the
//! append-only coin history store, the table of coins under exit, and the
//! key-value layout both are persisted with.

pub mod errors;
pub mod exits;
pub mod history;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use errors::CoreError;
pub use exits::ExitTable;
pub use history::CoinHistory;
pub use store::{KvStore, MemoryStore, RocksStore};
pub use types::{
    BlockNumber, DepositEvent, ExitParams, ExitRecord, ExitState, HistoryBundle, Slot, Transition,
    TransferParams,
};
