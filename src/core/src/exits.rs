//! Persistent table of coins under exit.

use crate::errors::CoreError;
use crate::store::{decode_block, decode_exit, encode_block, encode_exit, exit_key, KvStore, EXIT_PREFIX, LAST_BLOCK_KEY};
use crate::types::{ExitRecord, ExitState, Slot};
use std::sync::Arc;
use tracing::debug;

/// Exit records keyed by slot, plus the watch cursor.
#[derive(Clone)]
pub struct ExitTable {
    store: Arc<dyn KvStore>,
}

impl ExitTable {
    /// Creates a table over the given store.
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Returns the record for a slot.
    pub fn get(&self, slot: Slot) -> Result<Option<ExitRecord>, CoreError> {
        self.store
            .get(&exit_key(&slot))?
            .map(|bytes| decode_exit(&bytes))
            .transpose()
    }

    /// Inserts or replaces the record for its slot.
    pub fn put(&self, record: &ExitRecord) -> Result<(), CoreError> {
        debug!("Exit record for coin {} is {}", record.slot, record.state);
        self.store.put(&exit_key(&record.slot), &encode_exit(record)?)
    }

    /// Deletes the record for a slot.
    pub fn remove(&self, slot: Slot) -> Result<(), CoreError> {
        self.store.delete(&exit_key(&slot))
    }

    /// Moves the record for `slot` to `next` and persists it.
    pub fn advance(&self, slot: Slot, next: ExitState) -> Result<ExitRecord, CoreError> {
        let mut record = self.get(slot)?.ok_or(CoreError::UnknownSlot(slot))?;
        record.advance(next)?;
        self.put(&record)?;
        Ok(record)
    }

    /// Returns every record.
    pub fn all(&self) -> Result<Vec<ExitRecord>, CoreError> {
        self.store
            .scan_prefix(&[EXIT_PREFIX])?
            .into_iter()
            .map(|(_, value)| decode_exit(&value))
            .collect()
    }

    /// Returns every record not yet in a terminal state.
    pub fn pending(&self) -> Result<Vec<ExitRecord>, CoreError> {
        Ok(self
            .all()?
            .into_iter()
            .filter(|record| !record.state.is_terminal())
            .collect())
    }

    /// Returns the last root-chain block whose events were processed.
    pub fn last_processed_block(&self) -> Result<Option<u64>, CoreError> {
        self.store
            .get(LAST_BLOCK_KEY)?
            .map(|bytes| decode_block(&bytes))
            .transpose()
    }

    /// Records the last processed root-chain block. The cursor never moves backwards.
    pub fn set_last_processed_block(&self, block: u64) -> Result<(), CoreError> {
        if matches!(self.last_processed_block()?, Some(current) if current >= block) {
            return Ok(());
        }
        self.store.put(LAST_BLOCK_KEY, &encode_block(block))
    }
}
