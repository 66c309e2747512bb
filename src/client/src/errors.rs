//! Error types for the client crate.

use plasma_bridge::BridgeError;
use plasma_core::{CoreError, Slot};
use thiserror::Error;

/// Errors that can occur in the client crate.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Error from the core crate.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Error from the bridge crate.
    #[error(transparent)]
    Bridge(#[from] BridgeError),

    /// The side chain rejected a request or could not be reached.
    #[error("Side chain error: {0}")]
    SideChainError(String),

    /// The root-chain contract refused to finalize or withdraw yet.
    #[error("Not finalizable: {0}")]
    NotFinalizable(String),

    /// A received history failed verification; the coin was rejected.
    #[error("History of coin {0} is invalid")]
    HistoryInvalid(Slot),

    /// Error when the configuration is incomplete or malformed.
    #[error("Config error: {0}")]
    ConfigError(String),

    /// Error in the exit watcher.
    #[error("Watcher error: {0}")]
    WatcherError(String),

    /// Error when a file operation fails.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Error when JSON serialization or deserialization fails.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl ClientError {
    /// Failures the caller may retry later without changing anything.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Bridge(e) => e.is_transient(),
            ClientError::NotFinalizable(_) | ClientError::SideChainError(_) => true,
            _ => false,
        }
    }
}
