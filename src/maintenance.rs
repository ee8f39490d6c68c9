use serde::{Deserialize, Serialize};
use tokio::{select, sync::mpsc::Receiver, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    error::Result,
    ledger::ReconciliationError,
    monitor, renewal,
    renter::{Cycle, Renter},
    repair,
    transport::HostTransport,
    types::BlockHeight,
    wallet::Wallet,
};

/// Chain notifications consumed by the maintenance task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChainEvent {
    BlockConnected { height: BlockHeight },
    Rollback { height: BlockHeight },
}

/// One maintenance pass at the current height. Cycles never overlap.
///
/// With an allowance set: advance the period, refresh host liveness, renew,
/// retire ended contracts and form missing ones. Without one, retire every
/// Active contract. In both cases matured contracts expire; files are then
/// scanned and repaired while an allowance is set.
pub async fn run_cycle<T: HostTransport, W: Wallet>(renter: &Renter<T, W>) -> Result<Cycle> {
    let _cycle = renter.cycle_lock.lock().await;
    let height = renter.height();

    let active = renter.settings().allowance.is_active();
    if active {
        if let Some(period_start) = renter.settings.advance_period(height) {
            info!("Period advanced to {} at height {}", period_start, height);
            renter.save_settings(&renter.settings()).await?;
        }
        let settings = renter.settings();
        renewal::refresh_hosts(renter).await?;
        renewal::renew_contracts(renter, height, &settings).await?;
        renewal::retire_contracts(renter, height).await?;
        renewal::form_contracts(renter, height, &settings).await?;
    } else {
        renewal::wind_down(renter).await?;
    }
    renewal::expire_matured(renter, height).await?;

    let mut ledger = Ok(());
    if active {
        let index = renter.contract_index().await;
        let jobs = monitor::scan(
            &renter.files.all(),
            &index,
            renter.policy.remote_repair_download_threshold,
        );
        if !jobs.is_empty() {
            repair::run(renter, jobs).await;
        }
        ledger = check_ledger(renter).await;
    }

    renter.save_contracts().await?;
    let cycle = renter.publish_cycle(height);
    debug!("Maintenance cycle {} settled at height {}", cycle.seq, height);
    ledger.map(|_| cycle)
}

/// An allowance identity violation fails the cycle once it has settled.
/// Overspending is only logged.
async fn check_ledger<T: HostTransport, W: Wallet>(renter: &Renter<T, W>) -> Result<()> {
    let funds = renter.settings().allowance.funds;
    let metrics = renter.financial_metrics().await;
    match metrics.reconcile(funds) {
        Ok(()) => Ok(()),
        Err(e @ ReconciliationError::AllowanceMismatch { .. }) => {
            error!("Ledger out of balance: {}", e);
            debug_assert!(false, "ledger out of balance: {}", e);
            Err(e.into())
        }
        Err(e) => {
            error!("Ledger: {}", e);
            Ok(())
        }
    }
}

/// Applies a connected block. Returns false when the block does not extend
/// the current height.
fn connect_block<T: HostTransport, W: Wallet>(renter: &Renter<T, W>, height: BlockHeight) -> bool {
    let current = renter.height();
    if height <= current && current != 0 {
        warn!("Block {} does not extend height {}, ignoring", height, current);
        return false;
    }
    if current != 0 && height > current + 1 {
        info!("Catching up from {} to {}", current, height);
    }
    renter.set_height(height);
    true
}

async fn cycle<T: HostTransport, W: Wallet>(renter: &Renter<T, W>, reason: &str) {
    if let Err(e) = run_cycle(renter).await {
        error!("Maintenance cycle ({}) failed: {}", reason, e);
    }
}

pub fn run<T: HostTransport, W: Wallet>(
    renter: Renter<T, W>,
    cancel_token: CancellationToken,
    mut rx: Receiver<ChainEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Maintenance started at height {}", renter.height());
        loop {
            select! {
                _ = cancel_token.cancelled() => {
                    info!("Maintenance cancelled");
                    break;
                }
                _ = renter.trigger.notified() => {
                    cycle(&renter, "trigger").await;
                }
                option_event = rx.recv() => {
                    match option_event {
                        Some(ChainEvent::BlockConnected { height }) => {
                            if connect_block(&renter, height) {
                                cycle(&renter, "block").await;
                            }
                        }
                        Some(ChainEvent::Rollback { height }) => {
                            if height < renter.height() {
                                warn!("Rollback from {} to {}", renter.height(), height);
                                renter.set_height(height);
                                cycle(&renter, "rollback").await;
                            }
                        }
                        None => {
                            info!("Received None event, exiting");
                            break;
                        }
                    }
                }
            }
        }

        rx.close();
        while rx.recv().await.is_some() {}

        info!("Exited");
    })
}
