//! Root-chain event decoding and the polling subscription.

use crate::bindings::ContractInterfaceDescriptor;
use crate::client::{LogQuery, RootChainClient};
use crate::errors::BridgeError;
use ethers::abi::{self, RawLog, Token};
use ethers::types::{Address, Log, H256, U256};
use plasma_core::{DepositEvent, Slot};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Every event the client understands.
pub const EVENT_NAMES: [&str; 5] = ["Deposit", "StartedExit", "ChallengedExit", "FinalizedExit", "CoinReset"];

/// A decoded root-chain event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RootChainEvent {
    /// A coin was deposited
    Deposit(DepositEvent),
    /// An exit was started
    StartedExit {
        /// The coin
        slot: Slot,
        /// The exiter
        owner: Address,
    },
    /// An exit was challenged
    ChallengedExit {
        /// The coin
        slot: Slot,
        /// Hash of the challenging side-chain transaction
        tx_hash: H256,
        /// Block of the challenging transaction
        challenging_block: u64,
    },
    /// An exit was finalized
    FinalizedExit {
        /// The coin
        slot: Slot,
        /// The new root-chain owner
        owner: Address,
    },
    /// A challenged exit was cancelled and the coin returned to the side chain
    CoinReset {
        /// The coin
        slot: Slot,
        /// The owner whose exit was reset
        owner: Address,
    },
}

impl RootChainEvent {
    /// The coin the event is about.
    pub fn slot(&self) -> Slot {
        match self {
            RootChainEvent::Deposit(deposit) => deposit.slot,
            RootChainEvent::StartedExit { slot, .. }
            | RootChainEvent::ChallengedExit { slot, .. }
            | RootChainEvent::FinalizedExit { slot, .. }
            | RootChainEvent::CoinReset { slot, .. } => *slot,
        }
    }

    /// The event name as declared in the contract interface.
    pub fn name(&self) -> &'static str {
        match self {
            RootChainEvent::Deposit(_) => "Deposit",
            RootChainEvent::StartedExit { .. } => "StartedExit",
            RootChainEvent::ChallengedExit { .. } => "ChallengedExit",
            RootChainEvent::FinalizedExit { .. } => "FinalizedExit",
            RootChainEvent::CoinReset { .. } => "CoinReset",
        }
    }
}

/// An event together with where it was emitted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObservedEvent {
    /// The root-chain block
    pub block_number: u64,
    /// Position in the block
    pub log_index: u64,
    /// The emitting transaction
    pub tx_hash: H256,
    /// The decoded event
    pub event: RootChainEvent,
}

/// What a subscription delivers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Observation {
    /// A matching event
    Event(ObservedEvent),
    /// Every event up to and including this block has been delivered
    Checkpoint(u64),
}

/// Selects events by name and coin.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EventFilter {
    /// Accepted event names; empty accepts all
    pub names: Vec<String>,
    /// Accepted coin; `None` accepts all
    pub slot: Option<Slot>,
}

impl EventFilter {
    /// Accepts the named events of every coin.
    pub fn named(names: &[&str]) -> Self {
        Self {
            names: names.iter().map(|name| name.to_string()).collect(),
            slot: None,
        }
    }

    /// Restricts the filter to one coin.
    pub fn for_slot(mut self, slot: Slot) -> Self {
        self.slot = Some(slot);
        self
    }

    /// Returns whether an event passes the filter.
    pub fn matches(&self, event: &RootChainEvent) -> bool {
        let name_ok = self.names.is_empty() || self.names.iter().any(|name| name == event.name());
        let slot_ok = self.slot.map_or(true, |slot| slot == event.slot());
        name_ok && slot_ok
    }

    fn names(&self) -> Vec<&str> {
        if self.names.is_empty() {
            EVENT_NAMES.to_vec()
        } else {
            self.names.iter().map(String::as_str).collect()
        }
    }
}

struct Params(Vec<abi::LogParam>);

impl Params {
    fn token(&self, name: &str) -> Result<&Token, BridgeError> {
        self.0
            .iter()
            .find(|param| param.name == name)
            .map(|param| &param.value)
            .ok_or_else(|| BridgeError::DecodeError(format!("Missing event parameter {}", name)))
    }

    fn uint(&self, name: &str) -> Result<U256, BridgeError> {
        self.token(name)?
            .clone()
            .into_uint()
            .ok_or_else(|| BridgeError::DecodeError(format!("{} is not an integer", name)))
    }

    fn u64(&self, name: &str) -> Result<u64, BridgeError> {
        let value = self.uint(name)?;
        if value > U256::from(u64::MAX) {
            return Err(BridgeError::DecodeError(format!("{} does not fit in 64 bits", name)));
        }
        Ok(value.low_u64())
    }

    fn slot(&self) -> Result<Slot, BridgeError> {
        self.uint("slot").map(Slot::from)
    }

    fn address(&self, name: &str) -> Result<Address, BridgeError> {
        self.token(name)?
            .clone()
            .into_address()
            .ok_or_else(|| BridgeError::DecodeError(format!("{} is not an address", name)))
    }

    fn hash(&self, name: &str) -> Result<H256, BridgeError> {
        match self.token(name)? {
            Token::FixedBytes(bytes) if bytes.len() == 32 => Ok(H256::from_slice(bytes)),
            _ => Err(BridgeError::DecodeError(format!("{} is not a 32-byte hash", name))),
        }
    }
}

/// Decodes a root-chain log; logs of unknown events yield `None`.
pub fn decode_log(
    descriptor: &ContractInterfaceDescriptor,
    log: &Log,
) -> Result<Option<ObservedEvent>, BridgeError> {
    let Some(topic0) = log.topics.first() else {
        return Ok(None);
    };
    let Some(event) = descriptor.abi().events().find(|event| event.signature() == *topic0) else {
        return Ok(None);
    };

    let raw = RawLog {
        topics: log.topics.clone(),
        data: log.data.to_vec(),
    };
    let params = Params(event.parse_log(raw)?.params);

    let decoded = match event.name.as_str() {
        "Deposit" => RootChainEvent::Deposit(DepositEvent {
            slot: params.slot()?,
            block_number: params.u64("blockNumber")?,
            denomination: params.uint("denomination")?,
            from: params.address("from")?,
            contract_address: params.address("contractAddress")?,
        }),
        "StartedExit" => RootChainEvent::StartedExit {
            slot: params.slot()?,
            owner: params.address("owner")?,
        },
        "ChallengedExit" => RootChainEvent::ChallengedExit {
            slot: params.slot()?,
            tx_hash: params.hash("txHash")?,
            challenging_block: params.u64("challengingBlockNumber")?,
        },
        "FinalizedExit" => RootChainEvent::FinalizedExit {
            slot: params.slot()?,
            owner: params.address("owner")?,
        },
        "CoinReset" => RootChainEvent::CoinReset {
            slot: params.slot()?,
            owner: params.address("owner")?,
        },
        _ => return Ok(None),
    };

    Ok(Some(ObservedEvent {
        block_number: log.block_number.map(|n| n.as_u64()).unwrap_or_default(),
        log_index: log.log_index.map(|i| i.low_u64()).unwrap_or_default(),
        tx_hash: log.transaction_hash.unwrap_or_default(),
        event: decoded,
    }))
}

/// A running event subscription. Dropping it stops the poll loop.
#[derive(Debug)]
pub struct EventSubscription {
    receiver: mpsc::Receiver<Observation>,
    task: JoinHandle<()>,
}

impl EventSubscription {
    /// Waits for the next observation; `None` once the poll loop stopped.
    pub async fn next(&mut self) -> Option<Observation> {
        self.receiver.recv().await
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Polls the root chain for events from `from_block` onwards.
///
/// Each poll covers the blocks since the previous one and ends with a
/// checkpoint. A failed poll is retried over the same range, so consumers
/// may see an event twice.
pub fn subscribe_events(
    client: Arc<dyn RootChainClient>,
    descriptor: Arc<ContractInterfaceDescriptor>,
    address: Address,
    filter: EventFilter,
    from_block: u64,
    poll_interval: Duration,
) -> Result<EventSubscription, BridgeError> {
    let topics = filter
        .names()
        .into_iter()
        .map(|name| descriptor.event(name).map(|event| event.signature()))
        .collect::<Result<Vec<_>, _>>()?;

    let (sender, receiver) = mpsc::channel(256);
    let task = tokio::spawn(async move {
        let mut next_block = from_block;
        loop {
            match poll(&*client, &descriptor, address, &filter, &topics, next_block).await {
                Ok(Some((observations, head))) => {
                    for observation in observations {
                        if sender.send(observation).await.is_err() {
                            return;
                        }
                    }
                    if sender.send(Observation::Checkpoint(head)).await.is_err() {
                        return;
                    }
                    next_block = head + 1;
                }
                Ok(None) => {}
                Err(e) => warn!("Event poll from block {} failed: {}", next_block, e),
            }
            if sender.is_closed() {
                return;
            }
            tokio::time::sleep(poll_interval).await;
        }
    });

    Ok(EventSubscription { receiver, task })
}

async fn poll(
    client: &dyn RootChainClient,
    descriptor: &ContractInterfaceDescriptor,
    address: Address,
    filter: &EventFilter,
    topics: &[H256],
    from_block: u64,
) -> Result<Option<(Vec<Observation>, u64)>, BridgeError> {
    let head = client.block_number().await?;
    if head < from_block {
        return Ok(None);
    }

    let query = LogQuery {
        address,
        from_block,
        to_block: head,
        topics: topics.to_vec(),
    };
    let mut observations = Vec::new();
    for log in client.logs(&query).await? {
        match decode_log(descriptor, &log) {
            Ok(Some(observed)) if filter.matches(&observed.event) => {
                observations.push(Observation::Event(observed))
            }
            Ok(_) => {}
            Err(e) => warn!("Skipping undecodable log in block {:?}: {}", log.block_number, e),
        }
    }
    debug!("Polled blocks {}..={}: {} events", from_block, head, observations.len());
    Ok(Some((observations, head)))
}
