//! The application context handed to every operation.

use crate::config::ClientConfig;
use crate::errors::ClientError;
use crate::sidechain::{HttpSideChain, SideChainClient};
use crate::verify::{HistoryVerifier, LinkageVerifier};
use ethers::types::Address;
use plasma_bridge::{
    connect, Account, ContractInterfaceDescriptor, Erc20, Erc721, RootChain, RootChainClient, SignedContract,
};
use plasma_core::{CoinHistory, ExitTable, KvStore, RocksStore};
use std::sync::Arc;
use tracing::info;

/// Everything the orchestrator and the exit watcher share, built once at startup.
#[derive(Clone)]
pub struct AppContext {
    /// Client configuration
    pub config: ClientConfig,
    /// The signing account
    pub account: Account,
    /// The root-chain node
    pub root_client: Arc<dyn RootChainClient>,
    /// The root-chain contract
    pub root_chain: RootChain,
    /// The ERC-721 token, when configured
    pub erc721: Option<Erc721>,
    /// The ERC-20 token, when configured
    pub erc20: Option<Erc20>,
    /// The side-chain node
    pub side_chain: Arc<dyn SideChainClient>,
    /// Local coin histories
    pub history: CoinHistory,
    /// Coins under exit
    pub exits: ExitTable,
    /// Checks histories received from counterparties
    pub verifier: Arc<dyn HistoryVerifier>,
}

impl AppContext {
    /// Assembles a context from already connected parts.
    pub fn new(
        config: ClientConfig,
        account: Account,
        root_client: Arc<dyn RootChainClient>,
        side_chain: Arc<dyn SideChainClient>,
        store: Arc<dyn KvStore>,
    ) -> Result<Self, ClientError> {
        let signed = |descriptor: ContractInterfaceDescriptor, address: Address| {
            SignedContract::new(root_client.clone(), descriptor, address, account.clone())
                .with_gas_multiplier(config.gas_multiplier_percent)
                .with_confirmations(config.confirmations)
        };

        let root_chain = RootChain::new(signed(
            ContractInterfaceDescriptor::root_chain()?,
            config.plasma_address()?,
        ));
        let erc721 = match config.erc721 {
            Some(address) => Some(Erc721::new(signed(ContractInterfaceDescriptor::erc721()?, address))),
            None => None,
        };
        let erc20 = match config.erc20 {
            Some(address) => Some(Erc20::new(signed(ContractInterfaceDescriptor::erc20()?, address))),
            None => None,
        };

        let history = CoinHistory::open(store.clone())?;
        let exits = ExitTable::new(store);
        let verifier = Arc::new(LinkageVerifier::new(account.address()));

        Ok(Self {
            config,
            account,
            root_client,
            root_chain,
            erc721,
            erc20,
            side_chain,
            history,
            exits,
            verifier,
        })
    }

    /// Connects to the configured nodes and opens the local store.
    pub async fn connect(config: ClientConfig, account: Account) -> Result<Self, ClientError> {
        let root_client = connect(&config.ethereum, config.poll_interval()).await?;
        let side_chain = Arc::new(HttpSideChain::new(&config.dappchain));

        std::fs::create_dir_all(&config.data_dir)?;
        let store = Arc::new(RocksStore::open(&config.data_dir)?);
        info!(
            "Connected to {} and {} as {:?}",
            config.ethereum,
            config.dappchain,
            account.address()
        );

        Self::new(config, account, root_client, side_chain, store)
    }

    /// Replaces the history verifier.
    pub fn with_verifier(mut self, verifier: Arc<dyn HistoryVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    /// The address of the signing account.
    pub fn address(&self) -> Address {
        self.account.address()
    }
}
