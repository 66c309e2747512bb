//! Private key files.

use plasma_bridge::Account;
use plasma_client::ClientError;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;

/// A JSON file holding the signing key, as `{"privateKey": "0x..."}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Keystore {
    private_key: String,
}

impl Keystore {
    /// Wraps a hex private key.
    pub fn new(private_key: &str) -> Self {
        Self {
            private_key: private_key.to_string(),
        }
    }

    /// Loads a keystore from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ClientError> {
        let mut file = File::open(path)?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;

        let keystore = serde_json::from_str(&contents)?;
        Ok(keystore)
    }

    /// Saves a keystore to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ClientError> {
        let contents = serde_json::to_string_pretty(self)?;

        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = File::create(path)?;
        file.write_all(contents.as_bytes())?;

        Ok(())
    }

    /// The signing account.
    pub fn account(&self) -> Result<Account, ClientError> {
        Ok(Account::from_private_key(&self.private_key)?)
    }
}
