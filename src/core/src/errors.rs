//! Error types for the core crate.

use crate::types::{BlockNumber, ExitState, Slot};
use thiserror::Error;

/// Errors that can occur in the core crate.
#[derive(Error, Debug)]
pub enum CoreError {
    /// A transition with the same block number is already recorded for the slot.
    #[error("Invalid transition for coin {slot}: block {block_number} is already recorded")]
    InvalidTransition {
        /// The coin the transition was appended to
        slot: Slot,
        /// The duplicated block number
        block_number: BlockNumber,
    },

    /// The slot has no recorded history.
    #[error("Unknown slot: {0}")]
    UnknownSlot(Slot),

    /// The exit state machine does not allow the requested move.
    #[error("Invalid exit state change for coin {slot}: {from} -> {to}")]
    InvalidExitState {
        /// The coin under exit
        slot: Slot,
        /// The current state
        from: ExitState,
        /// The rejected target state
        to: ExitState,
    },

    /// A slot string could not be parsed.
    #[error("Invalid slot: {0}")]
    InvalidSlot(String),

    /// Error when the backing key-value store fails.
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Error when serialization or deserialization fails.
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<bincode::Error> for CoreError {
    fn from(error: bincode::Error) -> Self {
        CoreError::SerializationError(error.to_string())
    }
}

impl From<rocksdb::Error> for CoreError {
    fn from(error: rocksdb::Error) -> Self {
        CoreError::StorageError(error.to_string())
    }
}
