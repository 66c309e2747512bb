//! The exit watch and challenge engine.
//!
//! Every watched coin gets its own task fed through a channel. Root-chain
//! events are routed to the task of their coin; a task compares an observed
//! exit with local history, challenges it on mismatch, and otherwise waits out
//! the challenge window. Other writers of an exit record only move it forward
//! through the exit state machine, and tasks re-read the record after every
//! await before writing it back.

use crate::context::AppContext;
use crate::errors::ClientError;
use ethers::types::{Address, H256};
use plasma_bridge::{subscribe_events, CoinState, EventFilter, ExitInfo, Observation, ObservedEvent, RootChainEvent};
use plasma_core::{BlockNumber, ExitParams, ExitRecord, ExitState, Slot};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Events the watcher subscribes to.
const WATCHED_EVENTS: [&str; 4] = ["StartedExit", "ChallengedExit", "FinalizedExit", "CoinReset"];

/// Seconds since the Unix epoch.
pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// An exit as the root-chain contract records it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExitClaim {
    /// The block the exit claims as the coin's current state
    pub exit_block: BlockNumber,
    /// The predecessor block the exit claims
    pub prev_block: BlockNumber,
    /// The exiter
    pub owner: Address,
    /// Root-chain timestamp the exit was started at
    pub created_at: u64,
}

impl ExitClaim {
    fn params(&self, slot: Slot) -> ExitParams {
        ExitParams {
            slot,
            exit_block_num: self.exit_block,
            prev_block_num: self.prev_block,
        }
    }

    /// The contract's view of the exit replaces what we recorded when submitting it.
    fn apply(&self, record: &mut ExitRecord) {
        record.exit_block_num = self.exit_block;
        record.prev_block_num = self.prev_block;
        record.exiter = self.owner;
        if self.created_at > 0 {
            record.started_at = self.created_at;
        }
    }
}

impl From<&ExitInfo> for ExitClaim {
    fn from(info: &ExitInfo) -> Self {
        Self {
            exit_block: info.exit_block,
            prev_block: info.prev_block,
            owner: info.owner,
            created_at: info.created_at,
        }
    }
}

/// Root-chain activity concerning one coin.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlotEvent {
    /// An exit was started
    Started(ExitClaim),
    /// The exit was challenged, by us or someone else
    Challenged {
        /// The challenging side-chain transaction, when known
        tx_hash: Option<H256>,
    },
    /// The exit was finalized
    Finalized,
    /// The exit was cancelled and the coin returned to the side chain
    Reset,
}

/// What the watcher reports to its owner.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExitOutcome {
    /// The exit was challenged
    Challenged {
        /// The coin
        slot: Slot,
        /// Our challenge transaction, when we submitted it
        challenge_tx: Option<H256>,
    },
    /// The exit matches local history
    Unchallenged {
        /// The coin
        slot: Slot,
    },
    /// The challenge window elapsed; the exit can be finalized
    Finalizable {
        /// The coin
        slot: Slot,
    },
    /// The exit was finalized
    Finalized {
        /// The coin
        slot: Slot,
    },
    /// The exit was reset
    Reset {
        /// The coin
        slot: Slot,
    },
}

struct SlotWatch {
    events: mpsc::UnboundedSender<SlotEvent>,
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

struct Shared {
    context: Arc<AppContext>,
    outcomes: mpsc::UnboundedSender<ExitOutcome>,
}

/// Watches exits of owned coins and challenges invalid ones.
#[derive(Clone)]
pub struct ExitWatcher {
    shared: Arc<Shared>,
    watches: Arc<Mutex<HashMap<Slot, SlotWatch>>>,
}

impl ExitWatcher {
    /// Creates a watcher and the channel its outcomes are reported on.
    pub fn new(context: Arc<AppContext>) -> (Self, mpsc::UnboundedReceiver<ExitOutcome>) {
        let (outcomes, receiver) = mpsc::unbounded_channel();
        let watcher = Self {
            shared: Arc::new(Shared { context, outcomes }),
            watches: Arc::new(Mutex::new(HashMap::new())),
        };
        (watcher, receiver)
    }

    fn watches(&self) -> Result<MutexGuard<'_, HashMap<Slot, SlotWatch>>, ClientError> {
        self.watches
            .lock()
            .map_err(|_| ClientError::WatcherError("watch table lock poisoned".to_string()))
    }

    /// Returns the task channel of a coin, starting its task if none is running.
    fn ensure(&self, slot: Slot) -> Result<mpsc::UnboundedSender<SlotEvent>, ClientError> {
        let mut watches = self.watches()?;
        if let Some(existing) = watches.get(&slot) {
            if !existing.task.is_finished() {
                return Ok(existing.events.clone());
            }
        }

        let (events, receiver) = mpsc::unbounded_channel();
        let (cancel, cancelled) = watch::channel(false);
        let task = tokio::spawn(run_slot(self.shared.clone(), slot, receiver, cancelled));
        watches.insert(
            slot,
            SlotWatch {
                events: events.clone(),
                cancel,
                task,
            },
        );
        Ok(events)
    }

    /// Starts watching an exit we submitted.
    pub fn watch(&self, record: ExitRecord) -> Result<(), ClientError> {
        self.shared.context.exits.put(&record)?;
        self.ensure(record.slot)?;
        info!("Watching exit of coin {}", record.slot);
        Ok(())
    }

    /// Starts a task for a coin even before any exit is seen.
    pub fn track(&self, slot: Slot) -> Result<(), ClientError> {
        self.ensure(slot).map(|_| ())
    }

    /// Stops watching a coin. An evaluation in progress still runs to completion.
    pub fn cancel(&self, slot: Slot) -> Result<(), ClientError> {
        if let Some(watch) = self.watches()?.remove(&slot) {
            let _ = watch.cancel.send(true);
            debug!("Cancelled watch of coin {}", slot);
        }
        Ok(())
    }

    /// Coins with a running task.
    pub fn watched(&self) -> Result<Vec<Slot>, ClientError> {
        let mut slots: Vec<Slot> = self
            .watches()?
            .iter()
            .filter(|(_, watch)| !watch.task.is_finished())
            .map(|(slot, _)| *slot)
            .collect();
        slots.sort();
        Ok(slots)
    }

    fn is_relevant(&self, slot: Slot) -> Result<bool, ClientError> {
        let context = &self.shared.context;
        Ok(context.exits.get(slot)?.is_some() || context.history.contains(slot)?)
    }

    /// Hands an event to the task of its coin. Events about coins we neither
    /// own nor exit are dropped; returns whether the event was routed.
    pub fn deliver(&self, slot: Slot, event: SlotEvent) -> Result<bool, ClientError> {
        if !self.is_relevant(slot)? {
            return Ok(false);
        }

        // Persist before routing so a restart finds the exit
        if let SlotEvent::Started(claim) = &event {
            let exits = &self.shared.context.exits;
            if exits.get(slot)?.is_none() {
                exits.put(&ExitRecord::new(claim.params(slot), claim.owner, claim.created_at))?;
            }
        }

        self.ensure(slot)?
            .send(event)
            .map_err(|_| ClientError::WatcherError(format!("Watch of coin {} stopped", slot)))?;
        Ok(true)
    }

    /// Routes one decoded root-chain event, reading the exit it refers to.
    pub async fn observe(&self, observed: &ObservedEvent) -> Result<bool, ClientError> {
        let slot = observed.event.slot();
        if !self.is_relevant(slot)? {
            return Ok(false);
        }

        let event = match &observed.event {
            RootChainEvent::StartedExit { .. } => {
                let info = self.shared.context.root_chain.get_exit(slot).await?;
                if info.is_empty() {
                    debug!("Exit of coin {} is already gone", slot);
                    return Ok(false);
                }
                SlotEvent::Started(ExitClaim::from(&info))
            }
            RootChainEvent::ChallengedExit { tx_hash, .. } => SlotEvent::Challenged {
                tx_hash: Some(*tx_hash),
            },
            RootChainEvent::FinalizedExit { .. } => SlotEvent::Finalized,
            RootChainEvent::CoinReset { .. } => SlotEvent::Reset,
            RootChainEvent::Deposit(_) => return Ok(false),
        };
        self.deliver(slot, event)
    }

    /// Restarts the watch of every unfinished exit record and returns the
    /// root-chain block event processing resumes from.
    pub async fn resume(&self) -> Result<u64, ClientError> {
        let context = &self.shared.context;
        // Challenged exits can still be reset, so they are watched too
        for record in context.exits.all()? {
            match record.state {
                ExitState::Finalized => {}
                ExitState::Watching | ExitState::Evaluating => {
                    match context.root_chain.get_exit(record.slot).await {
                        Ok(info) if !info.is_empty() => {
                            self.deliver(record.slot, SlotEvent::Started(ExitClaim::from(&info)))?;
                        }
                        Ok(_) => self.track(record.slot)?,
                        Err(e) => {
                            warn!("Failed to read exit of coin {}: {}", record.slot, e);
                            self.track(record.slot)?;
                        }
                    }
                }
                _ => {
                    self.track(record.slot)?;
                    // Settlement events may have been missed while we were down
                    match self.settlement(record.slot).await {
                        Ok(Some(event)) => {
                            self.deliver(record.slot, event)?;
                        }
                        Ok(None) => {}
                        Err(e) => warn!("Failed to reconcile exit of coin {}: {}", record.slot, e),
                    }
                }
            }
        }

        let from_block = match context.exits.last_processed_block()? {
            Some(block) => block + 1,
            None => context.config.start_block,
        };
        info!("Resumed {} watches from block {}", self.watched()?.len(), from_block);
        Ok(from_block)
    }

    /// How the root chain settled an exit that is no longer open, if it was.
    async fn settlement(&self, slot: Slot) -> Result<Option<SlotEvent>, ClientError> {
        let root_chain = &self.shared.context.root_chain;
        if !root_chain.get_exit(slot).await?.is_empty() {
            return Ok(None);
        }
        let event = match root_chain.get_plasma_coin(slot).await?.state {
            CoinState::Exited => Some(SlotEvent::Finalized),
            CoinState::Deposited => Some(SlotEvent::Reset),
            CoinState::Exiting => None,
        };
        Ok(event)
    }

    /// Follows root-chain events until `shutdown` flips.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), ClientError> {
        let from_block = self.resume().await?;
        let context = &self.shared.context;
        let mut subscription = subscribe_events(
            context.root_client.clone(),
            Arc::new(context.root_chain.contract().descriptor().clone()),
            context.root_chain.address(),
            EventFilter::named(&WATCHED_EVENTS),
            from_block,
            context.config.poll_interval(),
        )?;

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                observation = subscription.next() => match observation {
                    Some(Observation::Event(observed)) => {
                        if let Err(e) = self.observe(&observed).await {
                            warn!("Failed to process {} for coin {}: {}", observed.event.name(), observed.event.slot(), e);
                        }
                    }
                    Some(Observation::Checkpoint(block)) => context.exits.set_last_processed_block(block)?,
                    None => {
                        self.shutdown().await;
                        return Err(ClientError::WatcherError("Event subscription ended".to_string()));
                    }
                },
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// Cancels every watch and waits for the tasks to stop.
    pub async fn shutdown(&self) {
        let drained: Vec<(Slot, SlotWatch)> = match self.watches() {
            Ok(mut watches) => watches.drain().collect(),
            Err(e) => {
                warn!("{}", e);
                return;
            }
        };
        for (slot, watch) in drained {
            let _ = watch.cancel.send(true);
            if let Err(e) = watch.task.await {
                warn!("Watch of coin {} ended abnormally: {}", slot, e);
            }
        }
    }
}

async fn run_slot(
    shared: Arc<Shared>,
    slot: Slot,
    mut events: mpsc::UnboundedReceiver<SlotEvent>,
    mut cancelled: watch::Receiver<bool>,
) {
    debug!("Watch of coin {} started", slot);
    loop {
        let window = match shared.window_remaining(slot) {
            Ok(window) => window,
            Err(e) => {
                warn!("Failed to read exit of coin {}: {}", slot, e);
                None
            }
        };

        // Queued events are handled before a cancellation is seen, and
        // cancellation is only checked between events, so a challenge being
        // submitted is never interrupted.
        tokio::select! {
            biased;
            event = events.recv() => match event {
                Some(event) => {
                    if let Err(e) = shared.handle(slot, event).await {
                        warn!("Failed to handle exit event for coin {}: {}", slot, e);
                    }
                }
                None => break,
            },
            changed = cancelled.changed() => {
                if changed.is_err() || *cancelled.borrow() {
                    break;
                }
                continue;
            }
            _ = tokio::time::sleep(window.unwrap_or_default()), if window.is_some() => {
                if let Err(e) = shared.window_elapsed(slot) {
                    warn!("Failed to mark exit of coin {} finalizable: {}", slot, e);
                }
            }
        }

        // A challenged exit may still be reset, so only finalization ends the watch
        match shared.context.exits.get(slot) {
            Ok(Some(record)) if record.state == ExitState::Finalized => break,
            Ok(_) => {}
            Err(e) => warn!("Failed to read exit of coin {}: {}", slot, e),
        }
    }
    debug!("Watch of coin {} stopped", slot);
}

impl Shared {
    fn emit(&self, outcome: ExitOutcome) {
        if self.outcomes.send(outcome).is_err() {
            debug!("Exit outcome receiver is gone");
        }
    }

    async fn handle(&self, slot: Slot, event: SlotEvent) -> Result<(), ClientError> {
        match event {
            SlotEvent::Started(claim) => self.evaluate(slot, claim).await,
            SlotEvent::Challenged { tx_hash } => {
                debug!("Exit of coin {} challenged with side-chain transaction {:?}", slot, tx_hash);
                self.settle(
                    slot,
                    ExitState::Challenged,
                    ExitOutcome::Challenged {
                        slot,
                        challenge_tx: None,
                    },
                )
            }
            SlotEvent::Finalized => self.settle(slot, ExitState::Finalized, ExitOutcome::Finalized { slot }),
            SlotEvent::Reset => {
                let exits = &self.context.exits;
                if exits.get(slot)?.is_some() {
                    exits.remove(slot)?;
                    info!("Exit of coin {} was reset", slot);
                    self.emit(ExitOutcome::Reset { slot });
                }
                Ok(())
            }
        }
    }

    /// Moves a record into a terminal state reported by the root chain.
    fn settle(&self, slot: Slot, next: ExitState, outcome: ExitOutcome) -> Result<(), ClientError> {
        let exits = &self.context.exits;
        let Some(mut record) = exits.get(slot)? else {
            return Ok(());
        };
        if record.state.is_terminal() {
            debug!("Exit of coin {} is already {}", slot, record.state);
            return Ok(());
        }

        record.advance(next)?;
        exits.put(&record)?;
        info!("Exit of coin {} is {}", slot, next);
        self.emit(outcome);
        Ok(())
    }

    /// Compares an observed exit with local history and challenges a mismatch.
    async fn evaluate(&self, slot: Slot, claim: ExitClaim) -> Result<(), ClientError> {
        let exits = &self.context.exits;
        let mut record = match exits.get(slot)? {
            Some(record) => record,
            None => ExitRecord::new(claim.params(slot), claim.owner, claim.created_at),
        };

        match record.state {
            ExitState::Watching => {
                record.advance(ExitState::Evaluating)?;
                exits.put(&record)?;
            }
            ExitState::Evaluating => {}
            state => {
                debug!("Exit of coin {} is already {}, ignoring", slot, state);
                return Ok(());
            }
        }

        claim.apply(&mut record);

        let latest = self.context.history.latest(slot)?;
        if claim.exit_block == latest.block_number {
            record.advance(ExitState::Unchallenged)?;
            exits.put(&record)?;
            info!("Exit of coin {} at block {} matches local history", slot, claim.exit_block);
            self.emit(ExitOutcome::Unchallenged { slot });
            return Ok(());
        }

        warn!(
            "Exit of coin {} by {:?} claims block {}, latest known block is {}",
            slot, claim.owner, claim.exit_block, latest.block_number
        );
        let root_chain = &self.context.root_chain;
        let pending = if claim.exit_block < latest.block_number {
            root_chain.challenge_after(slot, &latest).await?
        } else {
            root_chain.challenge_between(slot, &latest).await?
        };

        // The record may have been settled while the challenge was in flight
        let mut record = match exits.get(slot)? {
            Some(current) if current.state.can_advance_to(ExitState::Challenged) => current,
            current => {
                info!(
                    "Exit of coin {} settled as {:?} while challenging with {:?}",
                    slot,
                    current.map(|r| r.state),
                    pending.hash
                );
                return Ok(());
            }
        };
        claim.apply(&mut record);
        record.challenge_tx = Some(pending.hash);
        record.advance(ExitState::Challenged)?;
        exits.put(&record)?;
        info!("Challenged exit of coin {} with {:?}", slot, pending.hash);
        self.emit(ExitOutcome::Challenged {
            slot,
            challenge_tx: Some(pending.hash),
        });
        Ok(())
    }

    /// Time left in the challenge window of an unchallenged exit.
    fn window_remaining(&self, slot: Slot) -> Result<Option<Duration>, ClientError> {
        let Some(record) = self.context.exits.get(slot)? else {
            return Ok(None);
        };
        if record.state != ExitState::Unchallenged {
            return Ok(None);
        }
        let ends_at = record
            .started_at
            .saturating_add(self.context.config.challenge_period_secs);
        Ok(Some(Duration::from_secs(ends_at.saturating_sub(unix_now()))))
    }

    fn window_elapsed(&self, slot: Slot) -> Result<(), ClientError> {
        let exits = &self.context.exits;
        match exits.get(slot)? {
            Some(record) if record.state == ExitState::Unchallenged => {
                exits.advance(slot, ExitState::Finalizable)?;
                info!("Challenge window of coin {} elapsed", slot);
                self.emit(ExitOutcome::Finalizable { slot });
                Ok(())
            }
            _ => Ok(()),
        }
    }
}
