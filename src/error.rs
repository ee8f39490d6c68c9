use thiserror::Error as ThisError;

use crate::{
    contracts::StoreError, erasure::ErasureError, ledger::ReconciliationError,
    settings::SettingsError, transport::TransportError, wallet::WalletError,
};

#[derive(ThisError, Debug)]
pub enum Error {
    #[error("Invalid settings: {0}")]
    Settings(#[from] SettingsError),
    #[error("No allowance set")]
    NoAllowance,
    #[error("File already tracked: {0}")]
    FileExists(String),
    #[error("File not tracked: {0}")]
    FileNotFound(String),
    #[error("Range {offset}+{length} is outside of file of {size} bytes")]
    InvalidRange { offset: u64, length: u64, size: u64 },
    #[error("Invalid history range: after is later than before")]
    InvalidHistoryRange,
    #[error("{path} chunk {chunk} unrecoverable: {available} of {required} pieces reachable")]
    Unrecoverable {
        path: String,
        chunk: usize,
        available: usize,
        required: usize,
    },
    #[error("No contracts available for upload")]
    NoContracts,
    #[error("Funding failure: {0}")]
    Funding(String),
    #[error(transparent)]
    Erasure(#[from] ErasureError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Wallet(#[from] WalletError),
    #[error(transparent)]
    Reconciliation(#[from] ReconciliationError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Persistence(#[from] anyhow::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
