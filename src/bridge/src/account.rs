//! The signing account and its nonce queue.

use crate::errors::BridgeError;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, Signature, H256, U256};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

/// Serializes nonce-consuming calls for one key.
///
/// A caller holds the queue from nonce lookup until the node accepts the
/// transaction, so two in-flight calls never read the same nonce.
#[derive(Debug, Default)]
pub struct NonceQueue {
    last_assigned: Mutex<Option<U256>>,
}

/// Exclusive access to the next nonce of a key.
#[derive(Debug)]
pub struct NonceTicket<'a> {
    last_assigned: MutexGuard<'a, Option<U256>>,
}

impl NonceQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for the previous nonce-consuming call to finish.
    pub async fn acquire(&self) -> NonceTicket<'_> {
        NonceTicket {
            last_assigned: self.last_assigned.lock().await,
        }
    }
}

impl NonceTicket<'_> {
    /// Picks the nonce for the next transaction given the node's pending count.
    ///
    /// A node that has not yet indexed our last submission reports a stale count;
    /// the queue then continues from its own record instead.
    pub fn next(&self, network_nonce: U256) -> U256 {
        match *self.last_assigned {
            Some(last) if last >= network_nonce => last + 1,
            _ => network_nonce,
        }
    }

    /// Records a nonce the node accepted.
    pub fn consume(&mut self, nonce: U256) {
        *self.last_assigned = Some(nonce);
    }
}

/// A private key plus the nonce queue shared by every contract it signs for.
#[derive(Clone, Debug)]
pub struct Account {
    wallet: LocalWallet,
    queue: Arc<NonceQueue>,
}

impl Account {
    /// Creates an account around a wallet.
    pub fn new(wallet: LocalWallet) -> Self {
        Self {
            wallet,
            queue: Arc::new(NonceQueue::new()),
        }
    }

    /// Parses a hex private key, with or without `0x`.
    pub fn from_private_key(key: &str) -> Result<Self, BridgeError> {
        let wallet = key
            .trim()
            .parse::<LocalWallet>()
            .map_err(|e| BridgeError::SigningError(format!("Invalid private key: {}", e)))?;
        Ok(Self::new(wallet))
    }

    /// The account address.
    pub fn address(&self) -> Address {
        self.wallet.address()
    }

    /// The wallet used to sign transactions.
    pub fn wallet(&self) -> &LocalWallet {
        &self.wallet
    }

    /// The queue all nonce-consuming calls of this account go through.
    pub fn queue(&self) -> &NonceQueue {
        &self.queue
    }

    /// Signs a 32-byte digest.
    pub fn sign_hash(&self, hash: H256) -> Result<Signature, BridgeError> {
        self.wallet
            .sign_hash(hash)
            .map_err(|e| BridgeError::SigningError(e.to_string()))
    }
}
