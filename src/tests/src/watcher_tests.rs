//! Tests for the exit watch and challenge engine.

use crate::mocks::{plasma_address, root_selector, test_config, Harness};
use ethers::types::{Address, Log, H256, U256, U64};
use plasma_bridge::{ContractInterfaceDescriptor, ObservedEvent, RootChainEvent};
use plasma_client::{ClientConfig, ExitClaim, ExitOutcome, ExitWatcher, SlotEvent};
use plasma_core::{DepositEvent, ExitParams, ExitRecord, ExitState, Slot, Transition};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;

fn stranger() -> Address {
    Address::repeat_byte(0x77)
}

/// A user whose coin `slot` was deposited at block 1 and last moved at block 1000.
fn owned_coin(config: ClientConfig, slot: Slot) -> (Harness, ExitWatcher, mpsc::UnboundedReceiver<ExitOutcome>) {
    let h = Harness::with_config(config);
    h.deposit(slot, 1);
    h.context
        .history
        .append(slot, Transition::new(1000, 1, h.user.address(), U256::one()))
        .unwrap();
    let (watcher, outcomes) = ExitWatcher::new(h.context.clone());
    (h, watcher, outcomes)
}

fn now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs()
}

/// An exit started just now.
fn claim(exit_block: u64, prev_block: u64, owner: Address) -> ExitClaim {
    ExitClaim {
        exit_block,
        prev_block,
        owner,
        created_at: now(),
    }
}

async fn next_outcome(outcomes: &mut mpsc::UnboundedReceiver<ExitOutcome>) -> ExitOutcome {
    timeout(Duration::from_secs(5), outcomes.recv())
        .await
        .expect("no exit outcome in time")
        .expect("outcome channel closed")
}

async fn assert_quiet(outcomes: &mut mpsc::UnboundedReceiver<ExitOutcome>) {
    assert!(timeout(Duration::from_millis(100), outcomes.recv()).await.is_err());
}

/// Tests that an exit of an older state is challenged with the later transition.
#[tokio::test]
async fn test_challenge_after_spent_state() {
    let slot = Slot::from(1);
    let (h, watcher, mut outcomes) = owned_coin(test_config(), slot);

    assert!(watcher.deliver(slot, SlotEvent::Started(claim(1, 0, stranger()))).unwrap());

    match next_outcome(&mut outcomes).await {
        ExitOutcome::Challenged {
            slot: challenged,
            challenge_tx,
        } => {
            assert_eq!(challenged, slot);
            let sent = h.root.submitted_calls(root_selector("challengeAfter", 5));
            assert_eq!(sent.len(), 1);
            assert_eq!(challenge_tx, Some(sent[0].hash));
        }
        other => panic!("expected a challenge, got {:?}", other),
    }

    let record = h.context.exits.get(slot).unwrap().unwrap();
    assert_eq!(record.state, ExitState::Challenged);
    assert_eq!(record.exit_block_num, 1);
    assert_eq!(record.exiter, stranger());
    assert!(record.challenge_tx.is_some());
}

/// Tests that an exit claiming a state we never saw is challenged with our latest one.
#[tokio::test]
async fn test_challenge_between_unknown_state() {
    let slot = Slot::from(2);
    let (h, watcher, mut outcomes) = owned_coin(test_config(), slot);

    watcher
        .deliver(slot, SlotEvent::Started(claim(3000, 2000, stranger())))
        .unwrap();

    assert!(matches!(
        next_outcome(&mut outcomes).await,
        ExitOutcome::Challenged { challenge_tx: Some(_), .. }
    ));
    assert_eq!(h.root.submitted_calls(root_selector("challengeBetween", 5)).len(), 1);
    assert!(h.root.submitted_calls(root_selector("challengeAfter", 5)).is_empty());
}

/// Tests that a matching exit waits out the window and becomes finalizable.
#[tokio::test]
async fn test_matching_exit_becomes_finalizable() {
    let slot = Slot::from(3);
    let config = ClientConfig {
        challenge_period_secs: 0,
        ..test_config()
    };
    let (h, watcher, mut outcomes) = owned_coin(config, slot);

    watcher
        .deliver(slot, SlotEvent::Started(claim(1000, 1, h.user.address())))
        .unwrap();

    assert_eq!(next_outcome(&mut outcomes).await, ExitOutcome::Unchallenged { slot });
    assert_eq!(next_outcome(&mut outcomes).await, ExitOutcome::Finalizable { slot });
    assert_eq!(h.context.exits.get(slot).unwrap().unwrap().state, ExitState::Finalizable);
    assert!(h.root.submitted().is_empty());
}

/// Tests that an exit delivered twice is evaluated once.
#[tokio::test]
async fn test_duplicate_exit_is_ignored() {
    let slot = Slot::from(4);
    let (h, watcher, mut outcomes) = owned_coin(test_config(), slot);
    let started = SlotEvent::Started(claim(1000, 1, h.user.address()));

    watcher.deliver(slot, started.clone()).unwrap();
    watcher.deliver(slot, started).unwrap();

    assert_eq!(next_outcome(&mut outcomes).await, ExitOutcome::Unchallenged { slot });
    assert_quiet(&mut outcomes).await;
    assert_eq!(h.context.exits.get(slot).unwrap().unwrap().state, ExitState::Unchallenged);

    // A duplicate challenge is ignored as well
    let slot = Slot::from(5);
    h.deposit(slot, 1);
    h.context
        .history
        .append(slot, Transition::new(1000, 1, h.user.address(), U256::one()))
        .unwrap();
    let started = SlotEvent::Started(claim(1, 0, stranger()));
    watcher.deliver(slot, started.clone()).unwrap();
    watcher.deliver(slot, started).unwrap();

    assert!(matches!(next_outcome(&mut outcomes).await, ExitOutcome::Challenged { .. }));
    assert_quiet(&mut outcomes).await;
    assert_eq!(h.root.submitted_calls(root_selector("challengeAfter", 5)).len(), 1);
}

/// Tests that events about coins we do not hold are dropped.
#[tokio::test]
async fn test_unowned_coin_is_ignored() {
    let h = Harness::new();
    let (watcher, mut outcomes) = ExitWatcher::new(h.context.clone());
    let slot = Slot::from(6);

    assert!(!watcher.deliver(slot, SlotEvent::Started(claim(1, 0, stranger()))).unwrap());
    assert!(watcher.watched().unwrap().is_empty());
    assert!(h.context.exits.get(slot).unwrap().is_none());
    assert_quiet(&mut outcomes).await;
}

/// Tests that challenges, finalizations and resets seen on chain settle the record.
#[tokio::test]
async fn test_settled_by_root_chain() {
    let slot = Slot::from(7);
    let (h, watcher, mut outcomes) = owned_coin(test_config(), slot);

    watcher
        .deliver(slot, SlotEvent::Started(claim(1000, 1, h.user.address())))
        .unwrap();
    assert_eq!(next_outcome(&mut outcomes).await, ExitOutcome::Unchallenged { slot });

    watcher.deliver(slot, SlotEvent::Finalized).unwrap();
    assert_eq!(next_outcome(&mut outcomes).await, ExitOutcome::Finalized { slot });
    assert_eq!(h.context.exits.get(slot).unwrap().unwrap().state, ExitState::Finalized);

    // A challenge seen on chain, then the reset that answers it
    let slot = Slot::from(8);
    h.deposit(slot, 1);
    h.context
        .exits
        .put(&ExitRecord::new(
            ExitParams {
                slot,
                exit_block_num: 1,
                prev_block_num: 0,
            },
            h.user.address(),
            1,
        ))
        .unwrap();
    watcher
        .deliver(
            slot,
            SlotEvent::Challenged {
                tx_hash: Some(H256::repeat_byte(0x09)),
            },
        )
        .unwrap();
    assert_eq!(
        next_outcome(&mut outcomes).await,
        ExitOutcome::Challenged {
            slot,
            challenge_tx: None
        }
    );
    assert_eq!(h.context.exits.get(slot).unwrap().unwrap().state, ExitState::Challenged);

    watcher.deliver(slot, SlotEvent::Reset).unwrap();
    assert_eq!(next_outcome(&mut outcomes).await, ExitOutcome::Reset { slot });
    assert!(h.context.exits.get(slot).unwrap().is_none());
}

/// Tests routing of decoded root-chain events.
#[tokio::test]
async fn test_observe_reads_exit() {
    let slot = Slot::from(9);
    let (h, watcher, mut outcomes) = owned_coin(test_config(), slot);
    h.root.respond_exit(slot, stranger(), 0, 1);

    let observed = ObservedEvent {
        block_number: 10,
        log_index: 0,
        tx_hash: H256::repeat_byte(0x01),
        event: RootChainEvent::StartedExit { slot, owner: stranger() },
    };
    assert!(watcher.observe(&observed).await.unwrap());
    assert!(matches!(next_outcome(&mut outcomes).await, ExitOutcome::Challenged { .. }));

    // Deposits are not routed
    let deposit = ObservedEvent {
        event: RootChainEvent::Deposit(DepositEvent {
            slot,
            block_number: 1,
            denomination: U256::one(),
            from: h.user.address(),
            contract_address: Address::repeat_byte(0xbb),
        }),
        ..observed
    };
    assert!(!watcher.observe(&deposit).await.unwrap());
}

/// Tests that unfinished exits are picked up again after a restart.
#[tokio::test]
async fn test_resume_pending_exits() {
    let slot = Slot::from(10);
    let (h, watcher, mut outcomes) = owned_coin(test_config(), slot);
    let params = h.context.history.exit_params(slot).unwrap();
    h.context
        .exits
        .put(&ExitRecord::new(params, h.user.address(), 1))
        .unwrap();
    h.root.respond_exit(slot, h.user.address(), 1, 1000);

    assert_eq!(watcher.resume().await.unwrap(), 0);
    assert_eq!(next_outcome(&mut outcomes).await, ExitOutcome::Unchallenged { slot });
    assert_eq!(watcher.watched().unwrap(), vec![slot]);

    // Processing continues after the last checkpoint
    h.context.exits.set_last_processed_block(41).unwrap();
    let (restarted, _outcomes) = ExitWatcher::new(h.context.clone());
    assert_eq!(restarted.resume().await.unwrap(), 42);
    watcher.shutdown().await;
    restarted.shutdown().await;
}

/// Tests that cancelling stops the watch of a coin.
#[tokio::test]
async fn test_cancel_watch() {
    let slot = Slot::from(11);
    let (_h, watcher, _outcomes) = owned_coin(test_config(), slot);

    watcher.track(slot).unwrap();
    assert_eq!(watcher.watched().unwrap(), vec![slot]);

    watcher.cancel(slot).unwrap();
    assert!(watcher.watched().unwrap().is_empty());
}

/// Tests that a challenge being submitted when the watch is cancelled still completes.
#[tokio::test]
async fn test_cancel_during_challenge() {
    let slot = Slot::from(13);
    let (h, watcher, mut outcomes) = owned_coin(test_config(), slot);
    let gate = h.root.hold_next_estimate();

    watcher.deliver(slot, SlotEvent::Started(claim(1, 0, stranger()))).unwrap();
    timeout(Duration::from_secs(5), gate.entered()).await.unwrap();

    watcher.cancel(slot).unwrap();
    assert!(watcher.watched().unwrap().is_empty());
    assert!(h.root.submitted().is_empty());
    gate.release();

    assert!(matches!(
        next_outcome(&mut outcomes).await,
        ExitOutcome::Challenged { challenge_tx: Some(_), .. }
    ));
    assert_eq!(h.root.submitted_calls(root_selector("challengeAfter", 5)).len(), 1);
    assert_eq!(h.context.exits.get(slot).unwrap().unwrap().state, ExitState::Challenged);
}

/// Tests that a settlement queued when the watcher shuts down is not lost.
#[tokio::test]
async fn test_shutdown_handles_queued_settlement() {
    let slot = Slot::from(14);
    let (h, watcher, mut outcomes) = owned_coin(test_config(), slot);
    watcher
        .deliver(slot, SlotEvent::Started(claim(1000, 1, h.user.address())))
        .unwrap();
    assert_eq!(next_outcome(&mut outcomes).await, ExitOutcome::Unchallenged { slot });

    watcher.deliver(slot, SlotEvent::Finalized).unwrap();
    watcher.shutdown().await;

    assert_eq!(h.context.exits.get(slot).unwrap().unwrap().state, ExitState::Finalized);
    assert_eq!(next_outcome(&mut outcomes).await, ExitOutcome::Finalized { slot });
}

/// Tests that exits settled while the watcher was down are settled on resume.
#[tokio::test]
async fn test_resume_reconciles_settled_exits() {
    let finalized = Slot::from(15);
    let (h, watcher, mut outcomes) = owned_coin(test_config(), finalized);
    let reset = Slot::from(16);
    h.deposit(reset, 1);

    // One exit ran out its window, the other was challenged
    for (slot, states) in [
        (finalized, vec![ExitState::Evaluating, ExitState::Unchallenged, ExitState::Finalizable]),
        (reset, vec![ExitState::Challenged]),
    ] {
        let params = h.context.history.exit_params(slot).unwrap();
        h.context
            .exits
            .put(&ExitRecord::new(params, h.user.address(), 1))
            .unwrap();
        for state in states {
            h.context.exits.advance(slot, state).unwrap();
        }
        h.root.respond_exit(slot, Address::zero(), 0, 0);
    }
    h.root.respond_coin(finalized, 2);
    h.root.respond_coin(reset, 0);

    watcher.resume().await.unwrap();

    let seen = vec![next_outcome(&mut outcomes).await, next_outcome(&mut outcomes).await];
    assert!(seen.contains(&ExitOutcome::Finalized { slot: finalized }));
    assert!(seen.contains(&ExitOutcome::Reset { slot: reset }));
    assert_eq!(h.context.exits.get(finalized).unwrap().unwrap().state, ExitState::Finalized);
    assert!(h.context.exits.get(reset).unwrap().is_none());
    watcher.shutdown().await;
}

/// Tests the event feed end to end: logs in, outcome out, checkpoint persisted.
#[tokio::test]
async fn test_run_follows_root_chain() {
    let slot = Slot::from(12);
    let config = ClientConfig {
        poll_interval_ms: 10,
        ..test_config()
    };
    let (h, watcher, mut outcomes) = owned_coin(config, slot);
    h.root.respond_exit(slot, stranger(), 0, 1);

    let descriptor = ContractInterfaceDescriptor::root_chain().unwrap();
    let mut slot_topic = [0u8; 32];
    slot.as_u256().to_big_endian(&mut slot_topic);
    h.root.push_log(Log {
        address: plasma_address(),
        topics: vec![
            descriptor.event("StartedExit").unwrap().signature(),
            H256::from(slot_topic),
            H256::from(stranger()),
        ],
        block_number: Some(U64::from(5)),
        ..Default::default()
    });

    let (stop, stopped) = watch::channel(false);
    let running = {
        let watcher = watcher.clone();
        tokio::spawn(async move { watcher.run(stopped).await })
    };

    assert!(matches!(next_outcome(&mut outcomes).await, ExitOutcome::Challenged { .. }));
    for _ in 0..100 {
        if h.context.exits.last_processed_block().unwrap() == Some(5) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(h.context.exits.last_processed_block().unwrap(), Some(5));

    stop.send(true).unwrap();
    timeout(Duration::from_secs(5), running).await.unwrap().unwrap().unwrap();
    assert!(watcher.watched().unwrap().is_empty());
}
