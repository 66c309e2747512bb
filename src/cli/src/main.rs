//! Command line client for Plasma Cash.

use anyhow::{bail, Result};
use colored::Colorize;
use ethers::types::{Address, TransactionReceipt, U256};
use plasma_cli::commands::{deposit, exit, parse_u256, query, transfer, watch};
use plasma_cli::Keystore;
use plasma_bridge::Account;
use plasma_client::{AppContext, ClientConfig, ExitWatcher, User};
use plasma_core::Slot;
use std::path::PathBuf;
use std::sync::Arc;
use structopt::StructOpt;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Command line arguments for the Plasma Cash client.
#[derive(Debug, StructOpt)]
#[structopt(name = "plasma-cash", about = "Plasma Cash client")]
struct Opt {
    /// Path to the configuration file
    #[structopt(short, long, parse(from_os_str))]
    config: Option<PathBuf>,

    /// The web3 Ethereum endpoint
    #[structopt(short, long)]
    ethereum: Option<String>,

    /// The DAppChain's endpoint
    #[structopt(short, long)]
    dappchain: Option<String>,

    /// The Plasma contract's address
    #[structopt(short = "a", long = "address")]
    plasma_address: Option<Address>,

    /// Your private key
    #[structopt(long)]
    key: Option<String>,

    /// A JSON file holding your private key
    #[structopt(long, parse(from_os_str))]
    keystore: Option<PathBuf>,

    /// Where coin histories are stored
    #[structopt(long, parse(from_os_str))]
    data_dir: Option<PathBuf>,

    /// Subcommand to run
    #[structopt(subcommand)]
    cmd: Command,
}

/// Subcommands for the Plasma Cash client.
#[derive(Debug, StructOpt)]
enum Command {
    /// Deposit a coin to the Plasma chain
    #[structopt(name = "deposit")]
    Deposit {
        /// ERC-721 token id
        #[structopt(parse(try_from_str = parse_u256))]
        uid: Option<U256>,

        /// Deposit this amount of the ERC-20 token instead
        #[structopt(long, parse(try_from_str = parse_u256), conflicts_with = "uid")]
        amount: Option<U256>,
    },

    /// Start the exit of a coin from the Plasma chain
    #[structopt(name = "exit-coin")]
    ExitCoin {
        /// Coin slot (hex)
        slot: Slot,
    },

    /// Send a coin to a new owner
    #[structopt(name = "transfer")]
    Transfer {
        /// Coin slot (hex)
        slot: Slot,

        /// The new owner
        new_owner: Address,
    },

    /// Finalize the exit of a coin
    #[structopt(name = "finalize")]
    Finalize {
        /// Coin slot (hex)
        slot: Slot,
    },

    /// Sync with the side chain and import deposits
    #[structopt(name = "refresh")]
    Refresh,

    /// Withdraw a coin whose exit was finalized
    #[structopt(name = "withdraw")]
    Withdraw {
        /// Coin slot (hex)
        slot: Slot,
    },

    /// Withdraw exit and challenge bonds
    #[structopt(name = "withdraw-bonds")]
    WithdrawBonds,

    /// Show a coin's root-chain record
    #[structopt(name = "coin")]
    Coin {
        /// Coin slot (hex)
        slot: Slot,
    },

    /// List your deposits
    #[structopt(name = "deposits")]
    Deposits,

    /// Show the recorded history of a coin
    #[structopt(name = "history")]
    History {
        /// Coin slot (hex)
        slot: Slot,
    },

    /// Accept a coin from a history bundle file
    #[structopt(name = "receive")]
    Receive {
        /// JSON file with the coin's history
        #[structopt(parse(from_os_str))]
        bundle: PathBuf,
    },

    /// Watch exits of your coins and challenge invalid ones
    #[structopt(name = "watch")]
    Watch,
}

fn load_config(opt: &Opt) -> Result<ClientConfig> {
    let default_path = dirs::config_dir().map(|dir| dir.join("plasma-cash").join("config.json"));
    let mut config = match (&opt.config, default_path) {
        (Some(path), _) => ClientConfig::from_file(path)?,
        (None, Some(path)) if path.exists() => ClientConfig::from_file(path)?,
        _ => ClientConfig::default(),
    };

    if let Some(ethereum) = &opt.ethereum {
        config.ethereum = ethereum.clone();
    }
    if let Some(dappchain) = &opt.dappchain {
        config.dappchain = dappchain.clone();
    }
    if let Some(address) = opt.plasma_address {
        config.plasma_address = Some(address);
    }
    if let Some(data_dir) = &opt.data_dir {
        config.data_dir = data_dir.clone();
    }
    Ok(config)
}

fn load_account(opt: &Opt) -> Result<Account> {
    match (&opt.keystore, &opt.key) {
        (Some(path), _) => Ok(Keystore::load(path)?.account()?),
        (None, Some(key)) => Ok(Account::from_private_key(key)?),
        (None, None) => bail!("Either --keystore or --key must be given"),
    }
}

fn print_receipt(label: &str, receipt: &TransactionReceipt) {
    println!("{} {:?}", label.green(), receipt.transaction_hash);
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Parse command line arguments
    let opt = Opt::from_args();
    let config = load_config(&opt)?;
    let account = load_account(&opt)?;
    if config.plasma_address.is_none() {
        bail!("The Plasma contract address must be given with --address or in the config file");
    }

    let context = Arc::new(AppContext::connect(config, account).await?);
    let user = User::new(context.clone());
    info!("Running as {:?}", user.address());

    // Run the appropriate command
    match opt.cmd {
        Command::Deposit { uid, amount } => {
            let request = match (uid, amount) {
                (Some(uid), None) => deposit::Deposit::Token(uid),
                (None, Some(amount)) => deposit::Deposit::Amount(amount),
                _ => bail!("Give either a token id or --amount"),
            };
            let receipt = deposit::run(&user, request).await?;
            print_receipt("Deposited:", &receipt);
            println!("Run {} once the side chain has seen the deposit", "refresh".bold());
        }
        Command::ExitCoin { slot } => {
            let receipt = exit::exit_coin(&user, slot).await?;
            print_receipt("Exit started:", &receipt);
            println!(
                "Wait {} seconds for the challenge period, then run {}",
                context.config.challenge_period_secs,
                "finalize".bold()
            );
        }
        Command::Transfer { slot, new_owner } => {
            let transition = transfer::transfer(&user, slot, new_owner).await?;
            println!("{} {}", "Transferred:".green(), transition);
        }
        Command::Finalize { slot } => {
            let receipt = exit::finalize(&user, slot).await?;
            print_receipt("Exit finalized:", &receipt);
        }
        Command::Refresh => {
            let imported = query::refresh(&user).await?;
            println!("{} {} new deposits", "Updated!".green(), imported);
        }
        Command::Withdraw { slot } => {
            let receipt = exit::withdraw(&user, slot).await?;
            print_receipt("Withdrawn:", &receipt);
        }
        Command::WithdrawBonds => {
            let receipt = exit::withdraw_bonds(&user).await?;
            print_receipt("Bonds withdrawn:", &receipt);
        }
        Command::Coin { slot } => {
            let coin = query::coin(&user, slot).await?;
            println!("{} {}", "Coin:".green(), slot);
            println!("  uid:           {}", coin.uid);
            println!("  deposit block: {}", coin.deposit_block);
            println!("  denomination:  {}", coin.denomination);
            println!("  owner:         {:?}", coin.owner);
            println!("  contract:      {:?}", coin.contract_address);
            println!("  state:         {}", coin.state);
        }
        Command::Deposits => {
            let deposits = query::deposits(&user).await?;
            println!("{} {}", "Deposits:".green(), deposits.len());
            for deposit in deposits {
                println!(
                    "  {} at block {} ({} of {:?})",
                    deposit.slot, deposit.block_number, deposit.denomination, deposit.contract_address
                );
            }
        }
        Command::History { slot } => {
            let history = query::history(&user, slot)?;
            println!("{} {}", "History of".green(), slot);
            for transition in history {
                println!("  {}", transition);
            }
        }
        Command::Receive { bundle } => {
            match transfer::receive(&user, &bundle).await {
                Ok(slot) => println!("{} {}", "Received coin:".green(), slot),
                Err(e) => {
                    println!("{} {}", "Rejected:".red(), e);
                    return Err(e.into());
                }
            }
        }
        Command::Watch => {
            let (watcher, outcomes) = ExitWatcher::new(context.clone());
            let user = user.with_watcher(watcher.clone());
            watch::run(&user, watcher, outcomes).await?;
        }
    }

    Ok(())
}
