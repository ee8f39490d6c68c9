use tokio::sync::mpsc::Sender;
use tokio_util::sync::CancellationToken;

use crate::{
    config::Config, maintenance::ChainEvent, renter::Renter, transport::HostTransport,
    wallet::Wallet,
};

#[derive(Clone)]
pub struct Env<T: HostTransport, W: Wallet> {
    pub config: Config,
    pub cancel_token: CancellationToken,
    pub renter: Renter<T, W>,
    pub chain: Sender<ChainEvent>,
}
