pub mod tcp;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

use crate::{
    hostdb::HostSettings,
    types::{BlockHeight, ContractId, Currency, PieceRoot},
};

pub use tcp::TcpTransport;

#[derive(ThisError, Debug)]
pub enum TransportError {
    #[error("Host {0} unreachable")]
    Unreachable(String),
    #[error("Request to {0} timed out")]
    Timeout(String),
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Host refused: {0}")]
    Refused(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Failures worth retrying within one foreground operation.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransportError::Unreachable(_) | TransportError::Timeout(_) | TransportError::Io(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractTerms {
    pub renter_funds: Currency,
    pub start_height: BlockHeight,
    pub end_height: BlockHeight,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    Settings,
    FormContract(ContractTerms),
    RenewContract {
        previous: ContractId,
        terms: ContractTerms,
    },
    Upload {
        contract: ContractId,
        data: Bytes,
    },
    Download {
        contract: ContractId,
        root: PieceRoot,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    Settings(HostSettings),
    Accepted,
    Stored(PieceRoot),
    Piece(Bytes),
    Refused(String),
}

/// One request/response exchange with the host at `address`.
pub trait HostTransport: Send + Sync + Clone + 'static {
    fn call(
        &self,
        address: &str,
        request: Request,
    ) -> impl Future<Output = Result<Response, TransportError>> + Send;
}

fn unexpected(response: Response) -> TransportError {
    match response {
        Response::Refused(reason) => TransportError::Refused(reason),
        other => TransportError::Protocol(format!("unexpected response {:?}", other)),
    }
}

pub async fn fetch_settings<T: HostTransport>(
    transport: &T,
    address: &str,
) -> Result<HostSettings, TransportError> {
    match transport.call(address, Request::Settings).await? {
        Response::Settings(settings) => Ok(settings),
        other => Err(unexpected(other)),
    }
}

/// Sends a formation or renewal request and expects the host's signature.
pub async fn negotiate<T: HostTransport>(
    transport: &T,
    address: &str,
    request: Request,
) -> Result<(), TransportError> {
    match transport.call(address, request).await? {
        Response::Accepted => Ok(()),
        other => Err(unexpected(other)),
    }
}

pub async fn upload_piece<T: HostTransport>(
    transport: &T,
    address: &str,
    contract: ContractId,
    data: Bytes,
) -> Result<PieceRoot, TransportError> {
    let expected = PieceRoot::hash(&data);
    match transport
        .call(address, Request::Upload { contract, data })
        .await?
    {
        Response::Stored(root) if root == expected => Ok(root),
        Response::Stored(root) => Err(TransportError::Protocol(format!(
            "host stored root {}, expected {}",
            root, expected
        ))),
        other => Err(unexpected(other)),
    }
}

/// Fetches a piece and checks it against its root.
pub async fn download_piece<T: HostTransport>(
    transport: &T,
    address: &str,
    contract: ContractId,
    root: PieceRoot,
) -> Result<Bytes, TransportError> {
    match transport
        .call(address, Request::Download { contract, root })
        .await?
    {
        Response::Piece(data) if PieceRoot::hash(&data) == root => Ok(data),
        Response::Piece(_) => Err(TransportError::Protocol(format!(
            "piece {} failed verification",
            root
        ))),
        other => Err(unexpected(other)),
    }
}
