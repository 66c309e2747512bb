//! In-memory root-chain and side-chain doubles.

use async_trait::async_trait;
use ethers::abi::Token;
use ethers::types::{
    transaction::eip2718::TypedTransaction, Address, Bytes, Log, Transaction, TransactionReceipt, TxHash, H256,
    U256, U64,
};
use ethers::utils::rlp;
use plasma_bridge::{BridgeError, ContractInterfaceDescriptor, LogQuery, RootChainClient};
use plasma_client::{AppContext, ClientConfig, ClientError, SideChainClient, TransferRequest, User};
use plasma_core::{DepositEvent, MemoryStore, Slot, Transition};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Notify;

/// The signing key of the user under test.
pub const KEY: &str = "0x0123456789012345678901234567890123456789012345678901234567890123";

/// The root-chain contract address.
pub fn plasma_address() -> Address {
    Address::repeat_byte(0xaa)
}

/// The ERC-721 token address.
pub fn erc721_address() -> Address {
    Address::repeat_byte(0xbb)
}

/// The ERC-20 token address.
pub fn erc20_address() -> Address {
    Address::repeat_byte(0xcc)
}

/// The 4-byte selector of a root-chain method.
pub fn root_selector(method: &str, arity: usize) -> [u8; 4] {
    ContractInterfaceDescriptor::root_chain()
        .unwrap()
        .function(method, arity)
        .unwrap()
        .short_signature()
}

#[derive(Default)]
struct RootState {
    nonces: HashMap<Address, U256>,
    lagging: bool,
    estimate: U256,
    estimate_error: Option<String>,
    reverts: HashMap<[u8; 4], String>,
    calls: HashMap<Vec<u8>, Bytes>,
    reject_submissions: bool,
    failed_receipts: bool,
    submitted: Vec<Transaction>,
    block_number: u64,
    logs: Vec<Log>,
    gate: Option<EstimateGate>,
}

/// Holds the next gas estimate until released.
#[derive(Clone, Default)]
pub struct EstimateGate {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

impl EstimateGate {
    /// Waits until an estimate is being held.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    /// Lets the held estimate finish.
    pub fn release(&self) {
        self.release.notify_one();
    }
}

/// A root-chain node that accepts signed transactions in nonce order.
pub struct MockRootChain {
    state: Mutex<RootState>,
}

impl MockRootChain {
    /// Creates a node with a 50k gas estimate and nothing submitted.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(RootState {
                estimate: U256::from(50_000),
                ..Default::default()
            }),
        })
    }

    fn state(&self) -> MutexGuard<'_, RootState> {
        self.state.lock().unwrap()
    }

    /// Makes the node report a pending count of zero whatever was submitted.
    pub fn set_lagging(&self, lagging: bool) {
        self.state().lagging = lagging;
    }

    /// Sets the gas estimate.
    pub fn set_estimate(&self, estimate: u64) {
        self.state().estimate = U256::from(estimate);
    }

    /// Holds the next gas estimate until the returned gate is released.
    pub fn hold_next_estimate(&self) -> EstimateGate {
        let gate = EstimateGate::default();
        self.state().gate = Some(gate.clone());
        gate
    }

    /// Makes gas estimation fail with a transport error.
    pub fn fail_estimates(&self, message: &str) {
        self.state().estimate_error = Some(message.to_string());
    }

    /// Makes gas estimation of a method revert.
    pub fn revert_on(&self, selector: [u8; 4], reason: &str) {
        self.state().reverts.insert(selector, reason.to_string());
    }

    /// Makes broadcasts fail.
    pub fn reject_submissions(&self, reject: bool) {
        self.state().reject_submissions = reject;
    }

    /// Makes mined transactions report failure.
    pub fn fail_receipts(&self, fail: bool) {
        self.state().failed_receipts = fail;
    }

    /// Answers a read call with `calldata` by returning `output`.
    pub fn respond(&self, calldata: Bytes, output: Vec<u8>) {
        self.state().calls.insert(calldata.to_vec(), output.into());
    }

    /// Answers `getExit(slot)` with an exit started now.
    pub fn respond_exit(&self, slot: Slot, owner: Address, prev_block: u64, exit_block: u64) {
        let calldata = ContractInterfaceDescriptor::root_chain()
            .unwrap()
            .encode("getExit", &[Token::Uint(slot.as_u256())])
            .unwrap();
        let output = ethers::abi::encode(&[
            Token::Address(Address::repeat_byte(0x01)),
            Token::Address(owner),
            Token::Uint(U256::from(
                SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs(),
            )),
            Token::Uint(U256::exp10(17)),
            Token::Uint(U256::from(prev_block)),
            Token::Uint(U256::from(exit_block)),
            Token::Uint(U256::one()),
        ]);
        self.respond(calldata, output);
    }

    /// Answers `getPlasmaCoin(slot)` with a coin in `state`.
    pub fn respond_coin(&self, slot: Slot, state: u8) {
        let calldata = ContractInterfaceDescriptor::root_chain()
            .unwrap()
            .encode("getPlasmaCoin", &[Token::Uint(slot.as_u256())])
            .unwrap();
        let output = ethers::abi::encode(&[
            Token::Uint(U256::from(7)),
            Token::Uint(U256::one()),
            Token::Uint(U256::one()),
            Token::Address(Address::repeat_byte(0x01)),
            Token::Address(erc721_address()),
            Token::Uint(U256::from(state)),
        ]);
        self.respond(calldata, output);
    }

    /// Every transaction accepted so far, in submission order.
    pub fn submitted(&self) -> Vec<Transaction> {
        self.state().submitted.clone()
    }

    /// Transactions accepted so far that call `selector`.
    pub fn submitted_calls(&self, selector: [u8; 4]) -> Vec<Transaction> {
        self.submitted()
            .into_iter()
            .filter(|tx| tx.input.len() >= 4 && tx.input[..4] == selector)
            .collect()
    }

    /// Adds a log and moves the head to its block.
    pub fn push_log(&self, log: Log) {
        let mut state = self.state();
        if let Some(block) = log.block_number {
            state.block_number = state.block_number.max(block.as_u64());
        }
        state.logs.push(log);
    }

    /// Sets the head block.
    pub fn set_block_number(&self, block: u64) {
        self.state().block_number = block;
    }
}

#[async_trait]
impl RootChainClient for MockRootChain {
    async fn chain_id(&self) -> Result<u64, BridgeError> {
        Ok(1337)
    }

    async fn get_nonce(&self, address: Address) -> Result<U256, BridgeError> {
        let state = self.state();
        if state.lagging {
            return Ok(U256::zero());
        }
        Ok(state.nonces.get(&address).copied().unwrap_or_default())
    }

    async fn gas_price(&self) -> Result<U256, BridgeError> {
        Ok(U256::exp10(9))
    }

    async fn estimate_gas(&self, tx: &TypedTransaction) -> Result<U256, BridgeError> {
        // Give a concurrent caller the chance to run between nonce lookup and submission
        tokio::time::sleep(Duration::from_millis(5)).await;

        let gate = self.state().gate.take();
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }

        let state = self.state();
        if let Some(message) = &state.estimate_error {
            return Err(BridgeError::NetworkError(message.clone()));
        }
        if let Some(data) = tx.data() {
            if data.len() >= 4 {
                let mut selector = [0u8; 4];
                selector.copy_from_slice(&data[..4]);
                if let Some(reason) = state.reverts.get(&selector) {
                    return Err(BridgeError::Reverted(format!("execution reverted: {}", reason)));
                }
            }
        }
        Ok(state.estimate)
    }

    async fn call(&self, tx: &TypedTransaction) -> Result<Bytes, BridgeError> {
        let data = tx.data().cloned().unwrap_or_default();
        self.state()
            .calls
            .get(&data[..])
            .cloned()
            .ok_or_else(|| BridgeError::NetworkError(format!("no response for call {}", data)))
    }

    async fn submit_signed(&self, raw: Bytes) -> Result<TxHash, BridgeError> {
        let mut state = self.state();
        if state.reject_submissions {
            return Err(BridgeError::SubmissionError("insufficient funds for gas".to_string()));
        }

        let tx: Transaction = rlp::decode(&raw).map_err(|e| BridgeError::SubmissionError(e.to_string()))?;
        let from = tx
            .recover_from()
            .map_err(|e| BridgeError::SubmissionError(e.to_string()))?;

        let expected = state.nonces.get(&from).copied().unwrap_or_default();
        if tx.nonce != expected {
            return Err(BridgeError::SubmissionError(format!(
                "nonce {} does not match expected {}",
                tx.nonce, expected
            )));
        }
        state.nonces.insert(from, expected + 1);

        let hash = tx.hash;
        state.submitted.push(tx);
        Ok(hash)
    }

    async fn wait_for_receipt(
        &self,
        hash: TxHash,
        _confirmations: usize,
    ) -> Result<Option<TransactionReceipt>, BridgeError> {
        let state = self.state();
        if !state.submitted.iter().any(|tx| tx.hash == hash) {
            return Ok(None);
        }
        Ok(Some(TransactionReceipt {
            transaction_hash: hash,
            status: Some(if state.failed_receipts { U64::zero() } else { U64::one() }),
            ..Default::default()
        }))
    }

    async fn block_number(&self) -> Result<u64, BridgeError> {
        Ok(self.state().block_number)
    }

    async fn logs(&self, query: &LogQuery) -> Result<Vec<Log>, BridgeError> {
        Ok(self
            .state()
            .logs
            .iter()
            .filter(|log| {
                let block = log.block_number.map(|b| b.as_u64()).unwrap_or_default();
                let topic_ok = log.topics.first().map_or(false, |t| query.topics.contains(t));
                log.address == query.address && block >= query.from_block && block <= query.to_block && topic_ok
            })
            .cloned()
            .collect())
    }
}

#[derive(Default)]
struct SideState {
    next_block: u64,
    transfers: Vec<TransferRequest>,
    deposits: Vec<DepositEvent>,
    syncs: usize,
    failing: bool,
}

/// A side chain that includes every transfer in the next block.
pub struct MockSideChain {
    state: Mutex<SideState>,
}

/// Side-chain blocks are numbered in steps of this interval.
pub const CHILD_BLOCK_INTERVAL: u64 = 1000;

impl MockSideChain {
    /// Creates a side chain whose next block is 1000.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SideState {
                next_block: CHILD_BLOCK_INTERVAL,
                ..Default::default()
            }),
        })
    }

    fn state(&self) -> MutexGuard<'_, SideState> {
        self.state.lock().unwrap()
    }

    /// Sets the block the next transfer is included in.
    pub fn set_next_block(&self, block: u64) {
        self.state().next_block = block;
    }

    /// Makes every request fail.
    pub fn set_failing(&self, failing: bool) {
        self.state().failing = failing;
    }

    /// Records a deposit the side chain has seen.
    pub fn add_deposit(&self, deposit: DepositEvent) {
        self.state().deposits.push(deposit);
    }

    /// Transfers submitted so far.
    pub fn transfers(&self) -> Vec<TransferRequest> {
        self.state().transfers.clone()
    }

    /// Number of sync requests.
    pub fn syncs(&self) -> usize {
        self.state().syncs
    }
}

#[async_trait]
impl SideChainClient for MockSideChain {
    async fn submit_transfer(&self, request: &TransferRequest) -> Result<Transition, ClientError> {
        let mut state = self.state();
        if state.failing {
            return Err(ClientError::SideChainError("operator unavailable".to_string()));
        }
        if !request.is_signed() {
            return Err(ClientError::SideChainError("unsigned transfer".to_string()));
        }

        let block = state.next_block;
        state.next_block += CHILD_BLOCK_INTERVAL;
        state.transfers.push(request.clone());
        Ok(
            Transition::new(block, request.prev_block_num, request.new_owner, request.denomination).with_signed_tx(
                request.tx_bytes.clone(),
                request.signature.clone(),
                Bytes::from(vec![0xaa; 8]),
                request.hash,
            ),
        )
    }

    async fn get_deposit_events(&self, from_block: u64) -> Result<Vec<DepositEvent>, ClientError> {
        let state = self.state();
        if state.failing {
            return Err(ClientError::SideChainError("operator unavailable".to_string()));
        }
        Ok(state
            .deposits
            .iter()
            .filter(|deposit| deposit.block_number >= from_block)
            .cloned()
            .collect())
    }

    async fn sync(&self) -> Result<(), ClientError> {
        let mut state = self.state();
        if state.failing {
            return Err(ClientError::SideChainError("operator unavailable".to_string()));
        }
        state.syncs += 1;
        Ok(())
    }
}

/// Configuration pointing at the doubles' contract addresses.
pub fn test_config() -> ClientConfig {
    ClientConfig {
        plasma_address: Some(plasma_address()),
        erc721: Some(erc721_address()),
        erc20: Some(erc20_address()),
        ..Default::default()
    }
}

/// A user wired to fresh doubles and an in-memory store.
pub struct Harness {
    /// The root-chain double
    pub root: Arc<MockRootChain>,
    /// The side-chain double
    pub side: Arc<MockSideChain>,
    /// The shared context
    pub context: Arc<AppContext>,
    /// The user under test
    pub user: User,
}

impl Harness {
    /// Builds a harness with the default test configuration.
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    /// Builds a harness with a custom configuration.
    pub fn with_config(config: ClientConfig) -> Self {
        let root = MockRootChain::new();
        let side = MockSideChain::new();
        let account = plasma_bridge::Account::from_private_key(KEY).unwrap();
        let context = Arc::new(
            AppContext::new(config, account, root.clone(), side.clone(), Arc::new(MemoryStore::new())).unwrap(),
        );
        let user = User::new(context.clone());
        Self {
            root,
            side,
            context,
            user,
        }
    }

    /// Records a deposit of `slot` owned by the user.
    pub fn deposit(&self, slot: Slot, block: u64) -> Transition {
        let transition = Transition::new(block, 0, self.user.address(), U256::one()).with_signed_tx(
            Bytes::from(vec![0x01]),
            Bytes::default(),
            Bytes::from(vec![0xaa; 8]),
            H256::repeat_byte(0x01),
        );
        self.context.history.append(slot, transition.clone()).unwrap();
        transition
    }
}
