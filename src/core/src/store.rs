//! Key-value persistence for coin histories and exit records.
//!
//! Layout:
//! - `b'h' ++ slot (32 bytes, big-endian)` -> transitions ordered by block number
//! - `b'x' ++ slot (32 bytes, big-endian)` -> exit record
//! - `b"m/last_block"` -> last processed root-chain block (big-endian `u64`)

use crate::errors::CoreError;
use crate::types::{BlockNumber, ExitRecord, ExitState, Slot, Transition};
use byteorder::{BigEndian, ByteOrder};
use ethers::types::{Address, Bytes, H256, U256};
use rocksdb::{Direction, IteratorMode, Options, DB};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

/// Prefix of coin history keys.
pub const HISTORY_PREFIX: u8 = b'h';
/// Prefix of exit record keys.
pub const EXIT_PREFIX: u8 = b'x';
/// Key of the last processed root-chain block.
pub const LAST_BLOCK_KEY: &[u8] = b"m/last_block";

/// Durable key-value storage.
pub trait KvStore: Send + Sync {
    /// Reads the value stored under `key`.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, CoreError>;
    /// Writes `value` under `key`.
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), CoreError>;
    /// Removes `key`.
    fn delete(&self, key: &[u8]) -> Result<(), CoreError>;
    /// Returns every entry whose key starts with `prefix`, in key order.
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, CoreError>;
}

/// A RocksDB-backed store.
#[derive(Clone)]
pub struct RocksStore {
    db: Arc<DB>,
}

impl RocksStore {
    /// Opens (or creates) a store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, CoreError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);

        let db = DB::open(&opts, path)?;

        Ok(Self { db: Arc::new(db) })
    }
}

impl KvStore for RocksStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, CoreError> {
        Ok(self.db.get(key)?)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), CoreError> {
        Ok(self.db.put(key, value)?)
    }

    fn delete(&self, key: &[u8]) -> Result<(), CoreError> {
        Ok(self.db.delete(key)?)
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, CoreError> {
        let mut entries = Vec::new();
        for item in self.db.iterator(IteratorMode::From(prefix, Direction::Forward)) {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            entries.push((key.to_vec(), value.to_vec()));
        }
        Ok(entries)
    }
}

/// An in-memory store, for tests and throwaway sessions.
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> CoreError {
    CoreError::StorageError("store lock poisoned".to_string())
}

impl KvStore for MemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, CoreError> {
        Ok(self.entries.read().map_err(poisoned)?.get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), CoreError> {
        self.entries
            .write()
            .map_err(poisoned)?
            .insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), CoreError> {
        self.entries.write().map_err(poisoned)?.remove(key);
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, CoreError> {
        let entries = self.entries.read().map_err(poisoned)?;
        Ok(entries
            .range(prefix.to_vec()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }
}

/// Builds the history key of a slot.
pub fn history_key(slot: &Slot) -> Vec<u8> {
    prefixed_key(HISTORY_PREFIX, slot)
}

/// Builds the exit record key of a slot.
pub fn exit_key(slot: &Slot) -> Vec<u8> {
    prefixed_key(EXIT_PREFIX, slot)
}

fn prefixed_key(prefix: u8, slot: &Slot) -> Vec<u8> {
    let mut key = Vec::with_capacity(33);
    key.push(prefix);
    key.extend_from_slice(&slot.to_be_bytes());
    key
}

/// Extracts the slot from a prefixed key.
pub fn slot_from_key(key: &[u8]) -> Result<Slot, CoreError> {
    match key.split_first() {
        Some((_, rest)) => Slot::from_be_bytes(rest),
        None => Err(CoreError::StorageError("empty key".to_string())),
    }
}

/// The persisted form of a transition.
#[derive(Serialize, Deserialize)]
struct StoredTransition {
    block_number: BlockNumber,
    prev_block_number: BlockNumber,
    owner: [u8; 20],
    denomination: [u8; 32],
    signature: Vec<u8>,
    tx_bytes: Vec<u8>,
    proof: Vec<u8>,
    tx_hash: [u8; 32],
}

impl From<&Transition> for StoredTransition {
    fn from(t: &Transition) -> Self {
        let mut denomination = [0u8; 32];
        t.denomination.to_big_endian(&mut denomination);
        Self {
            block_number: t.block_number,
            prev_block_number: t.prev_block_number,
            owner: t.owner.0,
            denomination,
            signature: t.signature.to_vec(),
            tx_bytes: t.tx_bytes.to_vec(),
            proof: t.proof.to_vec(),
            tx_hash: t.tx_hash.0,
        }
    }
}

impl From<StoredTransition> for Transition {
    fn from(s: StoredTransition) -> Self {
        Transition {
            block_number: s.block_number,
            prev_block_number: s.prev_block_number,
            owner: Address::from(s.owner),
            denomination: U256::from_big_endian(&s.denomination),
            signature: Bytes::from(s.signature),
            tx_bytes: Bytes::from(s.tx_bytes),
            proof: Bytes::from(s.proof),
            tx_hash: H256::from(s.tx_hash),
        }
    }
}

/// Encodes a history as the persisted list, ordered by block number.
pub fn encode_history(transitions: &[Transition]) -> Result<Vec<u8>, CoreError> {
    let mut stored: Vec<StoredTransition> = transitions.iter().map(StoredTransition::from).collect();
    stored.sort_by_key(|t| t.block_number);
    Ok(bincode::serialize(&stored)?)
}

/// Decodes a persisted history.
pub fn decode_history(bytes: &[u8]) -> Result<Vec<Transition>, CoreError> {
    let stored: Vec<StoredTransition> = bincode::deserialize(bytes)?;
    Ok(stored.into_iter().map(Transition::from).collect())
}

/// The persisted form of an exit record.
#[derive(Serialize, Deserialize)]
struct StoredExit {
    slot: [u8; 32],
    exit_block_num: BlockNumber,
    prev_block_num: BlockNumber,
    started_at: u64,
    state: ExitState,
    exiter: [u8; 20],
    challenge_tx: Option<[u8; 32]>,
}

/// Encodes an exit record.
pub fn encode_exit(record: &ExitRecord) -> Result<Vec<u8>, CoreError> {
    let stored = StoredExit {
        slot: record.slot.to_be_bytes(),
        exit_block_num: record.exit_block_num,
        prev_block_num: record.prev_block_num,
        started_at: record.started_at,
        state: record.state,
        exiter: record.exiter.0,
        challenge_tx: record.challenge_tx.map(|h| h.0),
    };
    Ok(bincode::serialize(&stored)?)
}

/// Decodes an exit record.
pub fn decode_exit(bytes: &[u8]) -> Result<ExitRecord, CoreError> {
    let stored: StoredExit = bincode::deserialize(bytes)?;
    Ok(ExitRecord {
        slot: Slot::from_be_bytes(&stored.slot)?,
        exit_block_num: stored.exit_block_num,
        prev_block_num: stored.prev_block_num,
        started_at: stored.started_at,
        state: stored.state,
        exiter: Address::from(stored.exiter),
        challenge_tx: stored.challenge_tx.map(H256::from),
    })
}

/// Encodes a root-chain block number.
pub fn encode_block(block: u64) -> [u8; 8] {
    let mut bytes = [0u8; 8];
    BigEndian::write_u64(&mut bytes, block);
    bytes
}

/// Decodes a root-chain block number.
pub fn decode_block(bytes: &[u8]) -> Result<u64, CoreError> {
    if bytes.len() != 8 {
        return Err(CoreError::SerializationError(format!(
            "invalid block length: {} (expected 8)",
            bytes.len()
        )));
    }
    Ok(BigEndian::read_u64(bytes))
}
