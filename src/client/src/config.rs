//! Configuration for the Plasma Cash client.

use crate::errors::ClientError;
use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for the Plasma Cash client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClientConfig {
    /// The root-chain node
    pub ethereum: String,
    /// The side-chain node
    pub dappchain: String,
    /// The root-chain contract
    #[serde(rename = "plasma")]
    pub plasma_address: Option<Address>,
    /// The ERC-721 token deposits are made from
    pub erc721: Option<Address>,
    /// The ERC-20 token deposits are made from
    pub erc20: Option<Address>,
    /// The root-chain block deposit queries start from
    #[serde(rename = "block")]
    pub start_block: u64,
    /// Where coin histories are stored
    pub data_dir: PathBuf,
    /// Safety margin applied to gas estimates, in percent
    pub gas_multiplier_percent: u64,
    /// The bond attached to `startExit`, in wei
    pub exit_bond_wei: u128,
    /// How long exits can be challenged
    pub challenge_period_secs: u64,
    /// How often the root chain is polled for events
    pub poll_interval_ms: u64,
    /// Confirmations to wait for before a transaction counts as mined
    pub confirmations: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ethereum: "http://localhost:8545".to_string(),
            dappchain: "http://localhost:46658".to_string(),
            plasma_address: None,
            erc721: None,
            erc20: None,
            start_block: 0,
            data_dir: PathBuf::from("./plasma-data"),
            gas_multiplier_percent: 200,
            exit_bond_wei: 100_000_000_000_000_000,
            challenge_period_secs: 7 * 24 * 3600,
            poll_interval_ms: 1000,
            confirmations: 1,
        }
    }
}

impl ClientConfig {
    /// Loads configuration from a file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ClientError> {
        let mut file = File::open(path)?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;

        let config = serde_json::from_str(&contents)?;
        Ok(config)
    }

    /// Saves configuration to a file.
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ClientError> {
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// The root-chain contract, which every operation needs.
    pub fn plasma_address(&self) -> Result<Address, ClientError> {
        self.plasma_address
            .ok_or_else(|| ClientError::ConfigError("No plasma contract address configured".to_string()))
    }

    /// The exit bond as a transaction value.
    pub fn exit_bond(&self) -> U256 {
        U256::from(self.exit_bond_wei)
    }

    /// The event poll interval.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// The challenge window.
    pub fn challenge_period(&self) -> Duration {
        Duration::from_secs(self.challenge_period_secs)
    }
}
