//! Transfer and receive commands for the Plasma Cash CLI.

use ethers::types::Address;
use plasma_client::{ClientError, User};
use plasma_core::{HistoryBundle, Slot, Transition};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::info;

/// Runs the transfer command.
pub async fn transfer(user: &User, slot: Slot, new_owner: Address) -> Result<Transition, ClientError> {
    info!("Transferring coin {} to {:?}", slot, new_owner);
    user.transfer(slot, new_owner).await
}

/// Loads a history bundle from a JSON file.
pub fn load_bundle<P: AsRef<Path>>(path: P) -> Result<HistoryBundle, ClientError> {
    let mut file = File::open(path)?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;

    let bundle = serde_json::from_str(&contents)?;
    Ok(bundle)
}

/// Runs the receive command.
pub async fn receive<P: AsRef<Path>>(user: &User, bundle_path: P) -> Result<Slot, ClientError> {
    let bundle = load_bundle(bundle_path)?;
    let slot = bundle.slot;
    user.receive_coin(bundle).await?;
    Ok(slot)
}
