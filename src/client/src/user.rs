//! The coin lifecycle operations of one user.

use crate::context::AppContext;
use crate::errors::ClientError;
use crate::sidechain::TransferRequest;
use crate::watcher::{unix_now, ExitWatcher};
use ethers::types::{Address, TransactionReceipt, U256, U64};
use plasma_bridge::{BridgeError, PendingTx, PlasmaCoin};
use plasma_core::{CoreError, DepositEvent, ExitRecord, ExitState, HistoryBundle, Slot, Transition};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Maps a contract revert to `NotFinalizable`.
fn not_finalizable(what: String) -> impl FnOnce(BridgeError) -> ClientError {
    move |error| match error {
        BridgeError::Reverted(reason) => ClientError::NotFinalizable(format!("{}: {}", what, reason)),
        other => ClientError::Bridge(other),
    }
}

/// Deposits, transfers, exits and withdraws coins on behalf of one account.
#[derive(Clone)]
pub struct User {
    context: Arc<AppContext>,
    watcher: Option<ExitWatcher>,
}

impl User {
    /// Creates a user without an exit watcher.
    pub fn new(context: Arc<AppContext>) -> Self {
        Self { context, watcher: None }
    }

    /// Hands new exits and received coins to a watcher.
    pub fn with_watcher(mut self, watcher: ExitWatcher) -> Self {
        self.watcher = Some(watcher);
        self
    }

    /// The shared context.
    pub fn context(&self) -> &Arc<AppContext> {
        &self.context
    }

    /// The user's root-chain address.
    pub fn address(&self) -> Address {
        self.context.address()
    }

    /// Deposits an ERC-721 token by sending it to the root-chain contract.
    ///
    /// The contract assigns the slot; the first transition arrives through `refresh`.
    pub async fn deposit(&self, uid: U256) -> Result<PendingTx, ClientError> {
        let token = self
            .context
            .erc721
            .as_ref()
            .ok_or_else(|| ClientError::ConfigError("No ERC-721 token configured".to_string()))?;
        info!("Depositing token {} from {:?}", uid, token.address());
        Ok(token
            .safe_transfer_from(self.address(), self.context.root_chain.address(), uid)
            .await?)
    }

    /// Deposits ERC-20 tokens: approves the root-chain contract, then deposits.
    pub async fn deposit_erc20(&self, amount: U256) -> Result<PendingTx, ClientError> {
        let token = self
            .context
            .erc20
            .as_ref()
            .ok_or_else(|| ClientError::ConfigError("No ERC-20 token configured".to_string()))?;
        let root_chain = &self.context.root_chain;

        let approval = token.approve(root_chain.address(), amount).await?;
        // The deposit's gas estimate fails until the allowance is mined
        root_chain.contract().wait(&approval).await?;
        info!("Depositing {} of {:?}", amount, token.address());
        Ok(root_chain.deposit_erc20(amount, token.address()).await?)
    }

    /// Transfers a coin on the side chain and records the new transition.
    pub async fn transfer(&self, slot: Slot, new_owner: Address) -> Result<Transition, ClientError> {
        let params = self.context.history.transfer_params(slot)?;
        let request = TransferRequest::new(params, new_owner).sign(&self.context.account)?;
        debug!("Transferring coin {} from block {} to {:?}", slot, params.prev_block_num, new_owner);

        let included = self.context.side_chain.submit_transfer(&request).await?;
        if included.block_number <= params.prev_block_num {
            return Err(CoreError::InvalidTransition {
                slot,
                block_number: included.block_number,
            }
            .into());
        }

        let transition = Transition::new(
            included.block_number,
            params.prev_block_num,
            new_owner,
            params.denomination,
        )
        .with_signed_tx(request.tx_bytes, request.signature, included.proof, request.hash);
        self.context.history.append(slot, transition.clone())?;
        info!("Transferred coin {} to {:?} in block {}", slot, new_owner, transition.block_number);
        Ok(transition)
    }

    /// Starts an exit of a coin from its latest transition.
    pub async fn exit_coin(&self, slot: Slot) -> Result<PendingTx, ClientError> {
        let history = &self.context.history;
        let params = history.exit_params(slot)?;
        let latest = history.latest(slot)?;
        let prev = if latest.is_deposit() {
            None
        } else {
            let prev = history.at(slot, params.prev_block_num)?;
            if prev.is_none() {
                warn!("Coin {} has no transition at block {}", slot, params.prev_block_num);
            }
            prev
        };

        let pending = self
            .context
            .root_chain
            .start_exit(slot, prev.as_ref(), &latest, self.context.config.exit_bond())
            .await?;

        let record = ExitRecord::new(params, self.address(), unix_now());
        match &self.watcher {
            Some(watcher) => watcher.watch(record)?,
            None => self.context.exits.put(&record)?,
        }
        info!(
            "Started exit of coin {} at block {} (prev {})",
            slot, params.exit_block_num, params.prev_block_num
        );
        Ok(pending)
    }

    /// Finalizes an exit and waits for it to be mined.
    pub async fn finalize_exit(&self, slot: Slot) -> Result<TransactionReceipt, ClientError> {
        let root_chain = &self.context.root_chain;
        let pending = root_chain
            .finalize_exit(slot)
            .await
            .map_err(not_finalizable(format!("finalize coin {}", slot)))?;
        let receipt = root_chain.contract().wait(&pending).await?;
        if receipt.status == Some(U64::zero()) {
            return Err(ClientError::NotFinalizable(format!(
                "finalize coin {} reverted in {:?}",
                slot, pending.hash
            )));
        }

        let exits = &self.context.exits;
        if let Some(record) = exits.get(slot)? {
            if record.state.can_advance_to(ExitState::Finalized) {
                exits.advance(slot, ExitState::Finalized)?;
            }
        }
        info!("Finalized exit of coin {}", slot);
        Ok(receipt)
    }

    /// Withdraws a coin whose exit was finalized.
    pub async fn withdraw(&self, slot: Slot) -> Result<PendingTx, ClientError> {
        let pending = self
            .context
            .root_chain
            .withdraw(slot)
            .await
            .map_err(not_finalizable(format!("withdraw coin {}", slot)))?;
        if let Some(watcher) = &self.watcher {
            watcher.cancel(slot)?;
        }
        info!("Withdrew coin {}", slot);
        Ok(pending)
    }

    /// Withdraws every withdrawable exit and challenge bond.
    pub async fn withdraw_bonds(&self) -> Result<PendingTx, ClientError> {
        let pending = self
            .context
            .root_chain
            .withdraw_bonds()
            .await
            .map_err(not_finalizable("withdraw bonds".to_string()))?;
        info!("Withdrew bonds of {:?}", self.address());
        Ok(pending)
    }

    /// Accepts a coin from a counterparty after verifying its history.
    ///
    /// A rejected history is purged and the coin is reported invalid.
    pub async fn receive_coin(&self, bundle: HistoryBundle) -> Result<(), ClientError> {
        let slot = bundle.slot;
        let history = &self.context.history;

        if !self.context.verifier.verify(&bundle) {
            history.remove(slot)?;
            if let Some(watcher) = &self.watcher {
                watcher.cancel(slot)?;
            }
            warn!("Rejected coin {}: history failed verification", slot);
            return Err(ClientError::HistoryInvalid(slot));
        }

        // Check the whole bundle against local history before writing any of it
        let mut fresh: Vec<Transition> = Vec::new();
        for transition in bundle.transitions {
            let known = match history.at(slot, transition.block_number)? {
                Some(existing) => Some(existing),
                None => fresh
                    .iter()
                    .find(|t| t.block_number == transition.block_number)
                    .cloned(),
            };
            match known {
                Some(existing) if existing.same_state(&transition) => {}
                Some(existing) => {
                    warn!("Rejected coin {}: block {} conflicts with {}", slot, transition.block_number, existing);
                    return Err(CoreError::InvalidTransition {
                        slot,
                        block_number: transition.block_number,
                    }
                    .into());
                }
                None => fresh.push(transition),
            }
        }

        let appended = fresh.len();
        history.extend(slot, fresh)?;

        if let Some(watcher) = &self.watcher {
            watcher.track(slot)?;
        }
        info!("Received coin {} ({} new transitions)", slot, appended);
        Ok(())
    }

    /// Syncs the side chain and imports our deposits. Returns the number imported.
    pub async fn refresh(&self) -> Result<usize, ClientError> {
        self.context.side_chain.sync().await?;

        let history = &self.context.history;
        let mut imported = 0;
        for deposit in self.deposits().await? {
            if history.at(deposit.slot, deposit.block_number)?.is_some() {
                continue;
            }
            history.append(deposit.slot, deposit.to_transition())?;
            imported += 1;
        }
        if imported > 0 {
            info!("Imported {} deposits", imported);
        }
        Ok(imported)
    }

    /// Reads a coin from the root-chain contract.
    pub async fn coin(&self, slot: Slot) -> Result<PlasmaCoin, ClientError> {
        Ok(self.context.root_chain.get_plasma_coin(slot).await?)
    }

    /// Our deposits since the configured start block.
    pub async fn deposits(&self) -> Result<Vec<DepositEvent>, ClientError> {
        let address = self.address();
        Ok(self
            .context
            .side_chain
            .get_deposit_events(self.context.config.start_block)
            .await?
            .into_iter()
            .filter(|deposit| deposit.from == address)
            .collect())
    }

    /// The recorded history of a coin.
    pub fn history(&self, slot: Slot) -> Result<Vec<Transition>, ClientError> {
        Ok(self.context.history.all(slot)?)
    }
}
