use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde::{Serialize, de::DeserializeOwned};
use tokio::{net::TcpStream, time::timeout};
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::debug;

use super::{HostTransport, Request, Response, TransportError};

pub const MAX_FRAME_LENGTH: usize = 64 << 20;

/// Length-delimited frames carrying CBOR encoded messages.
pub fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_LENGTH)
        .new_codec()
}

pub fn encode<T: Serialize>(value: &T) -> Result<Bytes, TransportError> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf)
        .map_err(|e| TransportError::Protocol(format!("encode: {}", e)))?;
    Ok(buf.into())
}

pub fn decode<T: DeserializeOwned>(frame: &[u8]) -> Result<T, TransportError> {
    ciborium::from_reader(frame).map_err(|e| TransportError::Protocol(format!("decode: {}", e)))
}

/// Opens one TCP connection per request.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    timeout: Duration,
}

impl TcpTransport {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn exchange(&self, address: &str, request: Request) -> Result<Response, TransportError> {
        let stream = TcpStream::connect(address)
            .await
            .map_err(|e| TransportError::Unreachable(format!("{}: {}", address, e)))?;
        let mut framed = Framed::new(stream, codec());
        framed.send(encode(&request)?).await?;
        let frame = framed
            .next()
            .await
            .ok_or_else(|| TransportError::Protocol(format!("{} closed the connection", address)))??;
        debug!("{} answered with {} bytes", address, frame.len());
        decode(&frame)
    }
}

impl HostTransport for TcpTransport {
    async fn call(&self, address: &str, request: Request) -> Result<Response, TransportError> {
        timeout(self.timeout, self.exchange(address, request))
            .await
            .map_err(|_| TransportError::Timeout(address.to_string()))?
    }
}
