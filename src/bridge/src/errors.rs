//! Error types for the bridge crate.

use crate::bindings::MethodKind;
use plasma_core::CoreError;
use thiserror::Error;

/// Errors that can occur in the bridge crate.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// A network call failed. Safe to retry.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Gas estimation or signing failed. Not retried.
    #[error("Signing error: {0}")]
    SigningError(String),

    /// Gas estimation hit a contract revert.
    #[error("Execution reverted: {0}")]
    Reverted(String),

    /// Broadcasting a signed transaction failed (nonce, balance or gas).
    #[error("Submission error: {0}")]
    SubmissionError(String),

    /// Error when encoding or decoding ABI data.
    #[error("ABI error: {0}")]
    AbiError(String),

    /// The contract interface has no such method.
    #[error("Unknown method: {0}")]
    UnknownMethod(String),

    /// A read call was used on a mutating method or the other way around.
    #[error("Method {method} is not {expected}")]
    WrongMethodKind {
        /// The method name
        method: String,
        /// The kind the caller asked for
        expected: MethodKind,
    },

    /// Error when an address is invalid.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// A contract return value or log did not have the expected shape.
    #[error("Decode error: {0}")]
    DecodeError(String),

    /// Error from the core crate.
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl BridgeError {
    /// Gas estimation and signing failures, including reverts.
    pub fn is_signing(&self) -> bool {
        matches!(self, BridgeError::SigningError(_) | BridgeError::Reverted(_))
    }

    /// Failures that may succeed when retried later.
    pub fn is_transient(&self) -> bool {
        matches!(self, BridgeError::NetworkError(_))
    }
}

impl From<ethers::abi::Error> for BridgeError {
    fn from(error: ethers::abi::Error) -> Self {
        BridgeError::AbiError(error.to_string())
    }
}
