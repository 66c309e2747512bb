//! The signed contract facade.
//!
//! Wraps one contract interface and one account. Read-only methods are plain
//! calls; mutating methods are encoded, given a nonce and a gas limit, signed
//! locally and broadcast. Mutating calls of one account go through its nonce
//! queue one at a time.

use crate::account::Account;
use crate::bindings::{ContractInterfaceDescriptor, MethodKind};
use crate::client::RootChainClient;
use crate::errors::BridgeError;
use ethers::abi::Token;
use ethers::signers::Signer;
use ethers::types::{
    transaction::eip2718::TypedTransaction, Address, TransactionReceipt, TransactionRequest, TxHash, U256,
};
use std::sync::Arc;
use tracing::{debug, info};

/// Safety margin applied to gas estimates, in percent.
pub const DEFAULT_GAS_MULTIPLIER_PERCENT: u64 = 200;

/// A transaction the node accepted but that may not be mined yet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PendingTx {
    /// The transaction hash
    pub hash: TxHash,
    /// The nonce it consumed
    pub nonce: U256,
    /// The gas limit it was sent with
    pub gas: U256,
}

/// The result of invoking a method by name.
#[derive(Clone, Debug, PartialEq)]
pub enum Invocation {
    /// Decoded return values of a read-only method
    Read(Vec<Token>),
    /// The submitted transaction of a mutating method
    Sent(PendingTx),
}

/// A contract bound to a signing account.
#[derive(Clone)]
pub struct SignedContract {
    client: Arc<dyn RootChainClient>,
    descriptor: Arc<ContractInterfaceDescriptor>,
    address: Address,
    account: Account,
    gas_multiplier_percent: u64,
    confirmations: usize,
}

impl SignedContract {
    /// Binds a contract interface at `address` to an account.
    pub fn new(
        client: Arc<dyn RootChainClient>,
        descriptor: ContractInterfaceDescriptor,
        address: Address,
        account: Account,
    ) -> Self {
        Self {
            client,
            descriptor: Arc::new(descriptor),
            address,
            account,
            gas_multiplier_percent: DEFAULT_GAS_MULTIPLIER_PERCENT,
            confirmations: 1,
        }
    }

    /// Sets the safety margin applied to gas estimates.
    pub fn with_gas_multiplier(mut self, percent: u64) -> Self {
        self.gas_multiplier_percent = percent;
        self
    }

    /// Sets how many confirmations `wait` requires.
    pub fn with_confirmations(mut self, confirmations: usize) -> Self {
        self.confirmations = confirmations;
        self
    }

    /// The contract address.
    pub fn address(&self) -> Address {
        self.address
    }

    /// The contract interface.
    pub fn descriptor(&self) -> &ContractInterfaceDescriptor {
        &self.descriptor
    }

    /// The signing account.
    pub fn account(&self) -> &Account {
        &self.account
    }

    /// The network client.
    pub fn client(&self) -> Arc<dyn RootChainClient> {
        self.client.clone()
    }

    fn expect_kind(&self, method: &str, expected: MethodKind) -> Result<(), BridgeError> {
        if self.descriptor.kind(method)? != expected {
            return Err(BridgeError::WrongMethodKind {
                method: method.to_string(),
                expected,
            });
        }
        Ok(())
    }

    /// Invokes any method by name, signing it if it mutates state.
    pub async fn invoke(&self, method: &str, args: &[Token]) -> Result<Invocation, BridgeError> {
        match self.descriptor.kind(method)? {
            MethodKind::ReadOnly => self.call(method, args).await.map(Invocation::Read),
            MethodKind::Mutating => self.send(method, args).await.map(Invocation::Sent),
        }
    }

    /// Calls a read-only method and decodes its return values.
    pub async fn call(&self, method: &str, args: &[Token]) -> Result<Vec<Token>, BridgeError> {
        self.expect_kind(method, MethodKind::ReadOnly)?;
        let function = self.descriptor.function(method, args.len())?;
        let data = function.encode_input(args)?;

        let tx: TypedTransaction = TransactionRequest::new()
            .from(self.account.address())
            .to(self.address)
            .data(data)
            .into();

        let output = self.client.call(&tx).await.map_err(|e| match e {
            BridgeError::Reverted(reason) => {
                BridgeError::NetworkError(format!("{} reverted: {}", method, reason))
            }
            other => other,
        })?;

        Ok(function.decode_output(&output)?)
    }

    /// Signs and submits a mutating method.
    pub async fn send(&self, method: &str, args: &[Token]) -> Result<PendingTx, BridgeError> {
        self.send_with_value(method, args, None).await
    }

    /// Signs and submits a mutating method, attaching `value` wei.
    pub async fn send_with_value(
        &self,
        method: &str,
        args: &[Token],
        value: Option<U256>,
    ) -> Result<PendingTx, BridgeError> {
        self.expect_kind(method, MethodKind::Mutating)?;
        let data = self.descriptor.encode(method, args)?;
        let from = self.account.address();

        let mut request = TransactionRequest::new().from(from).to(self.address).data(data);
        if let Some(value) = value {
            request = request.value(value);
        }

        // Held until the node accepts the transaction
        let mut ticket = self.account.queue().acquire().await;

        let network_nonce = self.client.get_nonce(from).await?;
        let nonce = ticket.next(network_nonce);
        debug!("Using nonce {} for {} from {:?}", nonce, method, from);

        let estimate = self
            .client
            .estimate_gas(&request.clone().into())
            .await
            .map_err(|e| match e {
                BridgeError::Reverted(reason) => BridgeError::Reverted(format!("{}: {}", method, reason)),
                other => BridgeError::SigningError(format!("Gas estimation for {} failed: {}", method, other)),
            })?;
        let gas = estimate * self.gas_multiplier_percent / 100;

        let chain_id = self.client.chain_id().await?;
        let gas_price = self.client.gas_price().await?;

        let tx: TypedTransaction = request
            .nonce(nonce)
            .gas(gas)
            .gas_price(gas_price)
            .chain_id(chain_id)
            .into();

        let signature = self
            .account
            .wallet()
            .sign_transaction(&tx)
            .await
            .map_err(|e| BridgeError::SigningError(format!("Failed to sign {}: {}", method, e)))?;

        let hash = self.client.submit_signed(tx.rlp_signed(&signature)).await?;
        ticket.consume(nonce);

        info!("Sent {} as {:?} (nonce {}, gas {})", method, hash, nonce, gas);
        Ok(PendingTx { hash, nonce, gas })
    }

    /// Waits for a submitted transaction to be mined.
    pub async fn wait(&self, pending: &PendingTx) -> Result<TransactionReceipt, BridgeError> {
        self.client
            .wait_for_receipt(pending.hash, self.confirmations)
            .await?
            .ok_or_else(|| {
                BridgeError::NetworkError(format!("Transaction {:?} was dropped", pending.hash))
            })
    }
}
