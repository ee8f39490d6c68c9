use std::{panic, time::Duration};

use anyhow::Result;
use clap::Parser;
use renter::{
    api::{self, Env},
    config::Config,
    hostdb::HostDb,
    logging, maintenance,
    renter::Renter,
    stopper,
    transport::tcp::TcpTransport,
    types::Currency,
    wallet::LocalWallet,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::try_parse()?;
    logging::setup(config.log_format);
    info!("Renter");
    info!("{:#?}", config);

    let cancel_token = CancellationToken::new();
    let panic_token = cancel_token.clone();
    panic::set_hook(Box::new(move |info| {
        logging::log_panic(info);
        panic_token.cancel();
    }));
    let mut handles = vec![];
    handles.push(stopper::run(cancel_token.clone())?);

    let hostdb = HostDb::new();
    if let Some(path) = &config.hosts_file {
        hostdb.load_file(path).await?;
    }
    let transport = TcpTransport::new(Duration::from_secs(config.session_timeout_secs));
    let wallet = LocalWallet::new(
        Currency::new(config.wallet_balance),
        Currency::new(config.wallet_tx_fee),
    );
    let renter = Renter::open(&config, hostdb, transport, wallet, cancel_token.clone()).await?;

    let (chain_tx, chain_rx) = mpsc::channel(64);
    handles.push(maintenance::run(
        renter.clone(),
        cancel_token.clone(),
        chain_rx,
    ));
    handles.push(
        api::run(Env {
            config: config.clone(),
            cancel_token: cancel_token.clone(),
            renter,
            chain: chain_tx,
        })
        .await?,
    );

    for handle in handles {
        let _ = handle.await;
    }
    info!("Exited");
    Ok(())
}
