//! Command line client for Plasma Cash.

pub mod commands;
pub mod keystore;

// Re-export commonly used types and functions
pub use commands::{deposit, exit, query, transfer, watch};
pub use keystore::Keystore;
