//! Verification of histories received from counterparties.

use ethers::types::Address;
use plasma_core::HistoryBundle;
use tracing::debug;

/// Decides whether a received coin history can be accepted.
pub trait HistoryVerifier: Send + Sync {
    /// Returns whether the bundle proves the coin's current state.
    fn verify(&self, bundle: &HistoryBundle) -> bool;
}

/// Checks that a history is one unbroken chain ending at the expected owner.
///
/// Inclusion proofs are not checked.
#[derive(Clone, Copy, Debug)]
pub struct LinkageVerifier {
    expected_owner: Address,
}

impl LinkageVerifier {
    /// Accepts histories that end with `expected_owner` holding the coin.
    pub fn new(expected_owner: Address) -> Self {
        Self { expected_owner }
    }
}

impl HistoryVerifier for LinkageVerifier {
    fn verify(&self, bundle: &HistoryBundle) -> bool {
        let mut transitions: Vec<_> = bundle.transitions.iter().collect();
        transitions.sort_by_key(|t| t.block_number);

        let Some(first) = transitions.first() else {
            debug!("Empty history for {}", bundle.slot);
            return false;
        };
        if !first.is_deposit() {
            debug!("History of {} does not start at a deposit", bundle.slot);
            return false;
        }

        for pair in transitions.windows(2) {
            let (prev, next) = (pair[0], pair[1]);
            if next.block_number == prev.block_number {
                debug!("History of {} repeats block {}", bundle.slot, next.block_number);
                return false;
            }
            if next.prev_block_number != prev.block_number {
                debug!(
                    "History of {} is broken at block {}: points at {}, expected {}",
                    bundle.slot, next.block_number, next.prev_block_number, prev.block_number
                );
                return false;
            }
            if next.denomination != prev.denomination {
                debug!("Denomination of {} changes at block {}", bundle.slot, next.block_number);
                return false;
            }
        }

        transitions
            .last()
            .map_or(false, |latest| latest.owner == self.expected_owner)
    }
}
