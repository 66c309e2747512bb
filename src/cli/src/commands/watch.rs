//! Watch command for the Plasma Cash CLI.

use colored::Colorize;
use plasma_client::{ClientError, ExitOutcome, ExitWatcher, User};
use tokio::sync::{mpsc, watch};
use tracing::{error, info};

fn describe(outcome: &ExitOutcome) -> String {
    match outcome {
        ExitOutcome::Challenged { slot, challenge_tx: Some(tx) } => {
            format!("{} {} with {:?}", "Challenged exit of".red(), slot, tx)
        }
        ExitOutcome::Challenged { slot, challenge_tx: None } => format!("{} {}", "Exit challenged:".red(), slot),
        ExitOutcome::Unchallenged { slot } => format!("{} {}", "Exit matches history:".green(), slot),
        ExitOutcome::Finalizable { slot } => format!("{} {}", "Exit can be finalized:".green(), slot),
        ExitOutcome::Finalized { slot } => format!("{} {}", "Exit finalized:".green(), slot),
        ExitOutcome::Reset { slot } => format!("{} {}", "Exit reset:".yellow(), slot),
    }
}

/// Watches exits of owned coins until interrupted.
pub async fn run(
    user: &User,
    watcher: ExitWatcher,
    mut outcomes: mpsc::UnboundedReceiver<ExitOutcome>,
) -> Result<(), ClientError> {
    let (shutdown, shutdown_rx) = watch::channel(false);
    let runner = watcher.clone();
    let mut task = tokio::spawn(async move { runner.run(shutdown_rx).await });
    info!("Watching exits for {:?}", user.address());

    loop {
        tokio::select! {
            outcome = outcomes.recv() => match outcome {
                Some(outcome) => println!("{}", describe(&outcome)),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Stopping watcher");
                let _ = shutdown.send(true);
                break;
            }
            result = &mut task => {
                return match result {
                    Ok(result) => result,
                    Err(e) => Err(ClientError::WatcherError(format!("Watcher task failed: {}", e))),
                };
            }
        }
    }

    match task.await {
        Ok(result) => result,
        Err(e) => {
            error!("Watcher task failed: {}", e);
            Err(ClientError::WatcherError(e.to_string()))
        }
    }
}
