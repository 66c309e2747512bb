//! Tests for coin histories and exit records persisted in RocksDB.

use ethers::types::{Address, U256};
use plasma_core::{CoinHistory, ExitParams, ExitRecord, ExitState, ExitTable, KvStore, RocksStore, Slot, Transition};
use rand::seq::SliceRandom;
use serial_test::serial;
use std::sync::Arc;
use tempfile::tempdir;

fn open(path: &std::path::Path) -> Arc<dyn KvStore> {
    Arc::new(RocksStore::open(path).unwrap())
}

/// Tests that a history appended out of order reads back sorted after a reopen.
#[test]
#[serial]
fn test_history_survives_reopen() {
    // Create a temporary directory for the database
    let dir = tempdir().unwrap();
    let slot = Slot::from(0xfeed);
    let owner = Address::repeat_byte(0x11);

    // Create a chain of transitions and shuffle it
    let mut transitions: Vec<Transition> = (0..10u64)
        .map(|i| Transition::new(i * 1000 + 1, if i == 0 { 0 } else { (i - 1) * 1000 + 1 }, owner, U256::one()))
        .collect();
    let expected = transitions.clone();
    transitions.shuffle(&mut rand::thread_rng());

    {
        let history = CoinHistory::open(open(dir.path())).unwrap();
        for transition in transitions {
            history.append(slot, transition).unwrap();
        }
        assert_eq!(history.latest(slot).unwrap().block_number, 9001);
    }

    // Reopen the database
    let history = CoinHistory::open(open(dir.path())).unwrap();
    assert_eq!(history.all(slot).unwrap(), expected);
    assert_eq!(history.slots().unwrap(), vec![slot]);

    let params = history.exit_params(slot).unwrap();
    assert_eq!(params.exit_block_num, 9001);
    assert_eq!(params.prev_block_num, 8001);
}

/// Tests that exit records and the event checkpoint survive a reopen.
#[test]
#[serial]
fn test_exits_survive_reopen() {
    let dir = tempdir().unwrap();
    let slot = Slot::from(3);
    let params = ExitParams {
        slot,
        exit_block_num: 2000,
        prev_block_num: 1000,
    };

    {
        let exits = ExitTable::new(open(dir.path()));
        exits.put(&ExitRecord::new(params, Address::repeat_byte(0x22), 1_600_000_000)).unwrap();
        exits.advance(slot, ExitState::Evaluating).unwrap();
        exits.set_last_processed_block(77).unwrap();
    }

    let exits = ExitTable::new(open(dir.path()));
    let record = exits.get(slot).unwrap().unwrap();
    assert_eq!(record.state, ExitState::Evaluating);
    assert_eq!(record.exit_block_num, 2000);
    assert_eq!(exits.pending().unwrap(), vec![record]);
    assert_eq!(exits.last_processed_block().unwrap(), Some(77));
}
