//! Side-chain access: signed transfer requests and the JSON-RPC client.

use crate::errors::ClientError;
use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::{keccak256, rlp::RlpStream};
use plasma_bridge::{Account, BridgeError};
use plasma_core::{BlockNumber, DepositEvent, Slot, TransferParams, Transition};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A transfer of one coin, signed by its current owner.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    /// The coin
    pub slot: Slot,
    /// The block of the coin's latest transition
    pub prev_block_num: BlockNumber,
    /// The coin's denomination
    pub denomination: U256,
    /// The recipient
    pub new_owner: Address,
    /// RLP encoding of `[slot, prevBlock, denomination, newOwner]`
    pub tx_bytes: Bytes,
    /// keccak256 of `tx_bytes`
    pub hash: H256,
    /// The owner's signature over `hash`
    pub signature: Bytes,
}

impl TransferRequest {
    /// Builds an unsigned request.
    pub fn new(params: TransferParams, new_owner: Address) -> Self {
        let mut stream = RlpStream::new_list(4);
        stream.append(&params.slot.as_u256());
        stream.append(&params.prev_block_num);
        stream.append(&params.denomination);
        stream.append(&new_owner);
        let tx_bytes = Bytes::from(stream.out().to_vec());
        let hash = H256::from(keccak256(&tx_bytes));

        Self {
            slot: params.slot,
            prev_block_num: params.prev_block_num,
            denomination: params.denomination,
            new_owner,
            tx_bytes,
            hash,
            signature: Bytes::default(),
        }
    }

    /// Signs the request hash with the owner's key.
    pub fn sign(mut self, account: &Account) -> Result<Self, BridgeError> {
        let signature = account.sign_hash(self.hash)?;
        self.signature = Bytes::from(signature.to_vec());
        Ok(self)
    }

    /// Whether the request carries a signature.
    pub fn is_signed(&self) -> bool {
        !self.signature.is_empty()
    }
}

/// The operations the client needs from the side chain.
#[async_trait]
pub trait SideChainClient: Send + Sync {
    /// Submits a signed transfer and returns the transition once it is included.
    async fn submit_transfer(&self, request: &TransferRequest) -> Result<Transition, ClientError>;

    /// Returns deposits recorded from `from_block` onwards.
    async fn get_deposit_events(&self, from_block: u64) -> Result<Vec<DepositEvent>, ClientError>;

    /// Brings the side chain's view of the root chain up to date.
    async fn sync(&self) -> Result<(), ClientError>;
}

/// A side-chain client speaking JSON-RPC over HTTP.
///
/// Writes go to `<url>/rpc`, queries to `<url>/query`.
#[derive(Clone, Debug)]
pub struct HttpSideChain {
    writer: String,
    reader: String,
    http: reqwest::Client,
}

impl HttpSideChain {
    /// Creates a client for the node at `url`.
    pub fn new(url: &str) -> Self {
        let base = url.trim_end_matches('/');
        Self {
            writer: format!("{}/rpc", base),
            reader: format!("{}/query", base),
            http: reqwest::Client::new(),
        }
    }

    async fn request<T: DeserializeOwned>(
        &self,
        url: &str,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T, ClientError> {
        let response = self
            .http
            .post(url)
            .json(&serde_json::json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": method,
                "params": params
            }))
            .send()
            .await
            .map_err(|e| ClientError::SideChainError(format!("Failed to connect to {}: {}", url, e)))?;

        let response_text = response
            .text()
            .await
            .map_err(|e| ClientError::SideChainError(format!("Failed to get response text: {}", e)))?;
        debug!("Side chain {} response: {}", method, response_text);

        if response_text.is_empty() {
            return Err(ClientError::SideChainError("Empty response from node".to_string()));
        }

        let response: serde_json::Value = serde_json::from_str(&response_text)
            .map_err(|e| ClientError::SideChainError(format!("Failed to parse response: {}", e)))?;

        if let Some(error) = response.get("error") {
            if !error.is_null() {
                return Err(ClientError::SideChainError(format!("{} failed: {}", method, error)));
            }
        }

        let result = response
            .get("result")
            .cloned()
            .ok_or_else(|| ClientError::SideChainError(format!("No result in response: {}", response_text)))?;
        serde_json::from_value(result)
            .map_err(|e| ClientError::SideChainError(format!("Invalid {} result: {}", method, e)))
    }
}

#[async_trait]
impl SideChainClient for HttpSideChain {
    async fn submit_transfer(&self, request: &TransferRequest) -> Result<Transition, ClientError> {
        self.request(&self.writer, "submitTransfer", serde_json::json!([request]))
            .await
    }

    async fn get_deposit_events(&self, from_block: u64) -> Result<Vec<DepositEvent>, ClientError> {
        self.request(&self.reader, "getDepositEvents", serde_json::json!([from_block]))
            .await
    }

    async fn sync(&self) -> Result<(), ClientError> {
        let _: serde_json::Value = self.request(&self.writer, "sync", serde_json::json!([])).await?;
        Ok(())
    }
}
