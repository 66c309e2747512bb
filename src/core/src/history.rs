//! Append-only per-coin history of ownership transitions.

use crate::errors::CoreError;
use crate::store::{decode_history, encode_history, history_key, slot_from_key, KvStore, HISTORY_PREFIX};
use crate::types::{BlockNumber, ExitParams, Slot, Transition, TransferParams};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

type Histories = HashMap<Slot, Vec<Transition>>;

/// The coin history store.
///
/// Reads are served from memory; every write goes to the backing store first,
/// so a failed write leaves both untouched. The write lock serializes writers,
/// giving one writer per slot at a time while readers run concurrently.
#[derive(Clone)]
pub struct CoinHistory {
    store: Arc<dyn KvStore>,
    coins: Arc<RwLock<Histories>>,
}

impl CoinHistory {
    /// Loads every recorded history from the store.
    pub fn open(store: Arc<dyn KvStore>) -> Result<Self, CoreError> {
        let mut coins = HashMap::new();
        for (key, value) in store.scan_prefix(&[HISTORY_PREFIX])? {
            let slot = slot_from_key(&key)?;
            coins.insert(slot, decode_history(&value)?);
        }
        debug!("Loaded history for {} coins", coins.len());

        Ok(Self {
            store,
            coins: Arc::new(RwLock::new(coins)),
        })
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Histories>, CoreError> {
        self.coins
            .read()
            .map_err(|_| CoreError::StorageError("history lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Histories>, CoreError> {
        self.coins
            .write()
            .map_err(|_| CoreError::StorageError("history lock poisoned".to_string()))
    }

    /// Adds a transition, rejecting a block number already recorded for the slot.
    pub fn append(&self, slot: Slot, transition: Transition) -> Result<(), CoreError> {
        let mut coins = self.write()?;
        let existing = coins.get(&slot).map(Vec::as_slice).unwrap_or_default();

        if existing.iter().any(|t| t.block_number == transition.block_number) {
            return Err(CoreError::InvalidTransition {
                slot,
                block_number: transition.block_number,
            });
        }

        let mut updated = existing.to_vec();
        updated.push(transition);
        self.store.put(&history_key(&slot), &encode_history(&updated)?)?;

        info!(
            "Recorded block {} for coin {}",
            updated[updated.len() - 1].block_number,
            slot
        );
        coins.insert(slot, updated);
        Ok(())
    }

    /// Adds several transitions in one store write. Either all are recorded or
    /// none are.
    pub fn extend(&self, slot: Slot, transitions: Vec<Transition>) -> Result<(), CoreError> {
        if transitions.is_empty() {
            return Ok(());
        }
        let mut coins = self.write()?;
        let mut updated = coins.get(&slot).cloned().unwrap_or_default();

        for transition in &transitions {
            if updated.iter().any(|t| t.block_number == transition.block_number) {
                return Err(CoreError::InvalidTransition {
                    slot,
                    block_number: transition.block_number,
                });
            }
            updated.push(transition.clone());
        }
        self.store.put(&history_key(&slot), &encode_history(&updated)?)?;

        info!("Recorded {} blocks for coin {}", transitions.len(), slot);
        coins.insert(slot, updated);
        Ok(())
    }

    /// Returns the transition with the largest block number.
    pub fn latest(&self, slot: Slot) -> Result<Transition, CoreError> {
        let coins = self.read()?;
        let mut latest: Option<&Transition> = None;
        for transition in coins.get(&slot).into_iter().flatten() {
            if latest.map_or(true, |l| transition.block_number > l.block_number) {
                latest = Some(transition);
            }
        }
        latest.cloned().ok_or(CoreError::UnknownSlot(slot))
    }

    /// Purges every transition of a slot.
    pub fn remove(&self, slot: Slot) -> Result<(), CoreError> {
        let mut coins = self.write()?;
        self.store.delete(&history_key(&slot))?;
        if coins.remove(&slot).is_some() {
            info!("Removed history for coin {}", slot);
        }
        Ok(())
    }

    /// Returns the full history ordered by block number.
    pub fn all(&self, slot: Slot) -> Result<Vec<Transition>, CoreError> {
        let coins = self.read()?;
        let mut transitions = coins.get(&slot).cloned().ok_or(CoreError::UnknownSlot(slot))?;
        transitions.sort_by_key(|t| t.block_number);
        Ok(transitions)
    }

    /// Returns the transition recorded at `block_number`, if any.
    pub fn at(&self, slot: Slot, block_number: BlockNumber) -> Result<Option<Transition>, CoreError> {
        let coins = self.read()?;
        Ok(coins
            .get(&slot)
            .and_then(|history| history.iter().find(|t| t.block_number == block_number))
            .cloned())
    }

    /// Returns whether any history is recorded for the slot.
    pub fn contains(&self, slot: Slot) -> Result<bool, CoreError> {
        Ok(self.read()?.contains_key(&slot))
    }

    /// Returns every slot with recorded history.
    pub fn slots(&self) -> Result<Vec<Slot>, CoreError> {
        let mut slots: Vec<Slot> = self.read()?.keys().copied().collect();
        slots.sort();
        Ok(slots)
    }

    /// Resolves the block numbers needed to exit a coin.
    pub fn exit_params(&self, slot: Slot) -> Result<ExitParams, CoreError> {
        let latest = self.latest(slot)?;
        Ok(ExitParams {
            slot,
            exit_block_num: latest.block_number,
            prev_block_num: latest.prev_block_number,
        })
    }

    /// Resolves the parameters needed to transfer a coin.
    pub fn transfer_params(&self, slot: Slot) -> Result<TransferParams, CoreError> {
        let latest = self.latest(slot)?;
        Ok(TransferParams {
            slot,
            prev_block_num: latest.block_number,
            denomination: latest.denomination,
        })
    }
}
