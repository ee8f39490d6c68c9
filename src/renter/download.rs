use bytes::Bytes;
use chrono::Utc;
use futures_util::{Stream, stream};
use tracing::{debug, warn};

use crate::{
    contracts::{SpendingKind, StoreError},
    erasure::ErasureCoder,
    error::{Error, Result},
    files::{PieceLocation, TrackedFile},
    history::{DownloadOutcome, DownloadRecord},
    monitor::{ContractIndex, Usability},
    retry::{new_backoff_session, retry},
    transport::{self, HostTransport, TransportError},
    wallet::Wallet,
};

use super::Renter;

impl<T: HostTransport, W: Wallet> Renter<T, W> {
    /// Downloads a whole file.
    pub async fn download(&self, path: &str) -> Result<Vec<u8>> {
        let size = self
            .files
            .get(path)
            .ok_or_else(|| Error::FileNotFound(path.to_string()))?
            .file_size;
        self.download_range(path, 0, size).await
    }

    /// Downloads `length` bytes at `offset` and records the attempt in the
    /// download history.
    pub async fn download_range(&self, path: &str, offset: u64, length: u64) -> Result<Vec<u8>> {
        let start_time = Utc::now();
        let result = self.read_range(path, offset, length).await;
        let outcome = match &result {
            Ok(_) => DownloadOutcome::Completed,
            Err(e) => DownloadOutcome::Failed(e.to_string()),
        };
        self.history.push(DownloadRecord {
            path: path.to_string(),
            start_time,
            offset,
            length,
            outcome,
        });
        result
    }

    /// Streams a file chunk by chunk through the stream cache.
    pub fn stream(&self, path: &str) -> Result<impl Stream<Item = Result<Bytes>> + Send + 'static> {
        let file = self
            .files
            .get(path)
            .ok_or_else(|| Error::FileNotFound(path.to_string()))?;
        let renter = self.clone();
        Ok(stream::unfold(
            (renter, file, 0usize),
            |(renter, file, chunk)| async move {
                if chunk >= file.chunks.len() || file.file_size == 0 {
                    return None;
                }
                let item = renter.fetch_chunk(&file, chunk).await;
                Some((item, (renter, file, chunk + 1)))
            },
        ))
    }

    async fn read_range(&self, path: &str, offset: u64, length: u64) -> Result<Vec<u8>> {
        let file = self
            .files
            .get(path)
            .ok_or_else(|| Error::FileNotFound(path.to_string()))?;
        let end = offset
            .checked_add(length)
            .filter(|end| *end <= file.file_size)
            .ok_or(Error::InvalidRange {
                offset,
                length,
                size: file.file_size,
            })?;
        if length == 0 {
            return Ok(Vec::new());
        }
        let chunk_size = file.chunk_size();
        let first = (offset / chunk_size) as usize;
        let last = ((end - 1) / chunk_size) as usize;

        let mut out = Vec::with_capacity(length as usize);
        for chunk in first..=last {
            let data = self.fetch_chunk(&file, chunk).await?;
            let (chunk_offset, _) = file.chunk_bounds(chunk);
            let from = offset.saturating_sub(chunk_offset) as usize;
            let to = ((end - chunk_offset) as usize).min(data.len());
            out.extend_from_slice(&data[from..to]);
        }
        Ok(out)
    }

    /// Returns a decoded chunk, from the cache when present.
    pub(crate) async fn fetch_chunk(&self, file: &TrackedFile, chunk: usize) -> Result<Bytes> {
        if let Some(data) = self.cache.get(&file.path, chunk) {
            debug!("{} chunk {} served from cache", file.path, chunk);
            return Ok(data);
        }
        let coder = ErasureCoder::new(file.data_pieces, file.parity_pieces)?;
        let index = self.contract_index().await;
        let candidates = file
            .chunks
            .get(chunk)
            .map(|p| p.sources(|l| index.usable(l, Usability::Download)))
            .unwrap_or_default();
        let mut pieces = self.collect_pieces(&index, file, chunk, candidates).await?;
        coder.reconstruct(&mut pieces)?;
        let (_, len) = file.chunk_bounds(chunk);
        let data = Bytes::from(coder.join(&pieces, len as usize)?);
        self.cache.put(&file.path, chunk, data.clone());
        Ok(data)
    }

    /// Fetches pieces one source at a time until `data_pieces` of them are
    /// in hand. Later sources of a piece already fetched are skipped.
    pub(crate) async fn collect_pieces(
        &self,
        index: &ContractIndex,
        file: &TrackedFile,
        chunk: usize,
        candidates: Vec<(usize, PieceLocation)>,
    ) -> Result<Vec<Option<Vec<u8>>>> {
        let mut pieces: Vec<Option<Vec<u8>>> = vec![None; file.total_pieces()];
        let mut collected = 0;
        for (piece, location) in candidates {
            if collected == file.data_pieces {
                break;
            }
            if pieces[piece].is_some() {
                continue;
            }
            match self.download_piece(index, &location, file.piece_size).await {
                Ok(data) => {
                    pieces[piece] = Some(data.to_vec());
                    collected += 1;
                }
                Err(e) => warn!(
                    "{} chunk {} piece {} from {}: {}",
                    file.path, chunk, piece, location.host_key, e
                ),
            }
        }
        if collected < file.data_pieces {
            return Err(Error::Unrecoverable {
                path: file.path.clone(),
                chunk,
                available: collected,
                required: file.data_pieces,
            });
        }
        Ok(pieces)
    }

    /// Fetches one piece. The contract is charged only for a piece that
    /// actually arrived.
    async fn download_piece(
        &self,
        index: &ContractIndex,
        location: &PieceLocation,
        piece_size: u64,
    ) -> Result<Bytes> {
        let view = index
            .get(&location.contract_id)
            .ok_or(StoreError::NotFound(location.contract_id))?;
        let price = self
            .hostdb
            .get(&location.host_key)
            .map(|h| h.settings.download_price)
            .unwrap_or_default();
        let cost = price.mul(piece_size);
        let available = self
            .contracts
            .get(&location.contract_id)
            .await
            .map(|v| v.contract.renter_funds)
            .unwrap_or_default();
        if available < cost {
            return Err(StoreError::InsufficientFunds {
                id: location.contract_id,
                needed: cost,
                available,
            }
            .into());
        }

        self.limits.download.acquire(piece_size).await;
        let address = &view.contract.host_address;
        let data = retry(
            || transport::download_piece(&self.transport, address, location.contract_id, location.root),
            "piece download",
            new_backoff_session(&self.policy),
            self.cancel_token.clone(),
            TransportError::is_transient,
        )
        .await?;
        self.contracts
            .record_spending(&location.contract_id, SpendingKind::Download, cost)
            .await?;
        Ok(data)
    }
}
