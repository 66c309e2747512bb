//! Root-chain network access.

use crate::errors::BridgeError;
use async_trait::async_trait;
use ethers::{
    middleware::Middleware,
    providers::{Http, PendingTransaction, Provider, Ws},
    types::{
        transaction::eip2718::TypedTransaction, Address, BlockNumber, Bytes, Filter, Log,
        TransactionReceipt, TxHash, ValueOrArray, H256, U256,
    },
};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// A log query over a block range.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LogQuery {
    /// The emitting contract
    pub address: Address,
    /// First block, inclusive
    pub from_block: u64,
    /// Last block, inclusive
    pub to_block: u64,
    /// Accepted event signatures (topic 0)
    pub topics: Vec<H256>,
}

/// The operations the client needs from a root-chain node.
#[async_trait]
pub trait RootChainClient: Send + Sync {
    /// Returns the chain id used for replay protection.
    async fn chain_id(&self) -> Result<u64, BridgeError>;

    /// Returns the account's transaction count, including pending transactions.
    async fn get_nonce(&self, address: Address) -> Result<U256, BridgeError>;

    /// Returns the current gas price.
    async fn gas_price(&self) -> Result<U256, BridgeError>;

    /// Estimates the gas a transaction will use.
    async fn estimate_gas(&self, tx: &TypedTransaction) -> Result<U256, BridgeError>;

    /// Executes a call without creating a transaction.
    async fn call(&self, tx: &TypedTransaction) -> Result<Bytes, BridgeError>;

    /// Broadcasts a signed transaction.
    async fn submit_signed(&self, raw: Bytes) -> Result<TxHash, BridgeError>;

    /// Waits until a transaction has the given number of confirmations.
    async fn wait_for_receipt(
        &self,
        hash: TxHash,
        confirmations: usize,
    ) -> Result<Option<TransactionReceipt>, BridgeError>;

    /// Returns the latest block number.
    async fn block_number(&self) -> Result<u64, BridgeError>;

    /// Returns logs matching a query.
    async fn logs(&self, query: &LogQuery) -> Result<Vec<Log>, BridgeError>;
}

/// Classifies a node error: reverts are reported separately from transport failures.
fn classify<E: Display>(error: E) -> BridgeError {
    let message = error.to_string();
    if message.to_lowercase().contains("revert") {
        BridgeError::Reverted(message)
    } else {
        BridgeError::NetworkError(message)
    }
}

/// A root-chain client backed by an ethers middleware.
#[derive(Debug)]
pub struct EthersRootChain<M: Middleware> {
    provider: Arc<M>,
}

impl<M: Middleware> EthersRootChain<M> {
    /// Wraps a middleware.
    pub fn new(provider: Arc<M>) -> Self {
        Self { provider }
    }
}

/// Connects to a node over HTTP, or over a websocket for `ws://` and `wss://` URLs.
pub async fn connect(url: &str, poll_interval: Duration) -> Result<Arc<dyn RootChainClient>, BridgeError> {
    if url.starts_with("ws://") || url.starts_with("wss://") {
        let provider = Provider::<Ws>::connect(url)
            .await
            .map_err(|e| BridgeError::NetworkError(format!("Failed to connect to {}: {}", url, e)))?
            .interval(poll_interval);
        Ok(Arc::new(EthersRootChain::new(Arc::new(provider))))
    } else {
        let provider = Provider::<Http>::try_from(url)
            .map_err(|e| BridgeError::NetworkError(format!("Failed to create provider: {}", e)))?
            .interval(poll_interval);
        Ok(Arc::new(EthersRootChain::new(Arc::new(provider))))
    }
}

#[async_trait]
impl<M: Middleware + 'static> RootChainClient for EthersRootChain<M> {
    async fn chain_id(&self) -> Result<u64, BridgeError> {
        let id = self
            .provider
            .get_chainid()
            .await
            .map_err(|e| BridgeError::NetworkError(format!("Failed to get chain id: {}", e)))?;
        Ok(id.low_u64())
    }

    async fn get_nonce(&self, address: Address) -> Result<U256, BridgeError> {
        self.provider
            .get_transaction_count(address, Some(BlockNumber::Pending.into()))
            .await
            .map_err(|e| BridgeError::NetworkError(format!("Failed to get nonce: {}", e)))
    }

    async fn gas_price(&self) -> Result<U256, BridgeError> {
        self.provider
            .get_gas_price()
            .await
            .map_err(|e| BridgeError::NetworkError(format!("Failed to get gas price: {}", e)))
    }

    async fn estimate_gas(&self, tx: &TypedTransaction) -> Result<U256, BridgeError> {
        self.provider.estimate_gas(tx, None).await.map_err(classify)
    }

    async fn call(&self, tx: &TypedTransaction) -> Result<Bytes, BridgeError> {
        self.provider.call(tx, None).await.map_err(classify)
    }

    async fn submit_signed(&self, raw: Bytes) -> Result<TxHash, BridgeError> {
        let pending = self
            .provider
            .send_raw_transaction(raw)
            .await
            .map_err(|e| BridgeError::SubmissionError(e.to_string()))?;
        let hash = pending.tx_hash();
        debug!("Broadcast transaction {:?}", hash);
        Ok(hash)
    }

    async fn wait_for_receipt(
        &self,
        hash: TxHash,
        confirmations: usize,
    ) -> Result<Option<TransactionReceipt>, BridgeError> {
        PendingTransaction::new(hash, self.provider.provider())
            .confirmations(confirmations)
            .await
            .map_err(|e| BridgeError::NetworkError(format!("Failed waiting for {:?}: {}", hash, e)))
    }

    async fn block_number(&self) -> Result<u64, BridgeError> {
        let number = self
            .provider
            .get_block_number()
            .await
            .map_err(|e| BridgeError::NetworkError(format!("Failed to get block number: {}", e)))?;
        Ok(number.as_u64())
    }

    async fn logs(&self, query: &LogQuery) -> Result<Vec<Log>, BridgeError> {
        let filter = Filter::new()
            .address(query.address)
            .from_block(query.from_block)
            .to_block(query.to_block)
            .topic0(ValueOrArray::Array(query.topics.iter().copied().map(Some).collect()));
        self.provider
            .get_logs(&filter)
            .await
            .map_err(|e| BridgeError::NetworkError(format!("Failed to get logs: {}", e)))
    }
}
