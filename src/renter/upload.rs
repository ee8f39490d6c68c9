use std::{collections::HashSet, path::PathBuf};

use bytes::Bytes;
use futures_util::{StreamExt, stream};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    contracts::{ContractFilter, ContractView, SpendingKind, StoreError},
    erasure::ErasureCoder,
    error::{Error, Result},
    files::{FileInfo, PieceLocation, TrackedFile},
    monitor::Usability,
    retry::{new_backoff_session, retry},
    transport::{self, HostTransport, TransportError},
    types::HostKey,
    wallet::Wallet,
};

use super::{Renter, read_chunk};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRequest {
    /// Path the file is tracked under.
    pub path: String,
    /// Local file to read from.
    pub source: PathBuf,
    pub data_pieces: usize,
    pub parity_pieces: usize,
}

impl<T: HostTransport, W: Wallet> Renter<T, W> {
    /// Erasure-codes a local file and spreads its pieces over distinct
    /// hosts. Pieces that fail to upload are left for repair.
    pub async fn upload(&self, request: UploadRequest) -> Result<FileInfo> {
        if !self.settings().allowance.is_active() {
            return Err(Error::NoAllowance);
        }
        let coder = ErasureCoder::new(request.data_pieces, request.parity_pieces)?;
        let file_size = tokio::fs::metadata(&request.source).await?.len();
        let file = TrackedFile::new(
            request.path.clone(),
            request.data_pieces,
            request.parity_pieces,
            file_size,
            self.policy.piece_size,
            Some(request.source.clone()),
        );
        if !self.files.insert(file.clone()) {
            return Err(Error::FileExists(request.path));
        }
        info!(
            "Uploading {} ({} bytes, {}+{} pieces, {} chunks)",
            file.path,
            file_size,
            file.data_pieces,
            file.parity_pieces,
            file.chunks.len()
        );

        let all: Vec<usize> = (0..coder.total_pieces()).collect();
        for chunk in 0..file.chunks.len() {
            let (offset, len) = file.chunk_bounds(chunk);
            let data = read_chunk(&request.source, offset, len).await?;
            let pieces = coder.encode(&data, self.policy.piece_size as usize)?;
            let placed = self.place_pieces(&file.path, chunk, &pieces, &all).await;
            debug!(
                "{} chunk {}: {} of {} pieces placed",
                file.path,
                chunk,
                placed,
                all.len()
            );
        }
        self.save_file(&file.path).await?;
        self.file_info(&file.path).await
    }

    /// Active, good-for-upload contracts on distinct hosts outside `exclude`.
    pub(crate) async fn upload_targets(&self, exclude: &HashSet<HostKey>) -> Vec<ContractView> {
        let mut hosts = exclude.clone();
        self.contracts
            .list(ContractFilter::Active)
            .await
            .into_iter()
            .filter(|v| v.contract.good_for_upload)
            .filter(|v| hosts.insert(v.contract.host_key.clone()))
            .collect()
    }

    /// Uploads the `wanted` piece indices of a chunk to hosts that hold no
    /// piece of it yet. Returns how many pieces were placed.
    pub(crate) async fn place_pieces(
        &self,
        path: &str,
        chunk: usize,
        pieces: &[Vec<u8>],
        wanted: &[usize],
    ) -> usize {
        let Some(file) = self.files.get(path) else {
            return 0;
        };
        let Some(placement) = file.chunks.get(chunk) else {
            return 0;
        };
        // Hosts whose copy sits in a retired contract take the piece again
        // under their current contract.
        let index = self.contract_index().await;
        let holders = placement.hosts(|l| index.usable(l, Usability::Health));
        let targets = self.upload_targets(&holders).await;
        if targets.len() < wanted.len() {
            warn!(
                "{} chunk {}: {} pieces to place but only {} hosts available",
                path,
                chunk,
                wanted.len(),
                targets.len()
            );
        }
        let hosts = self.settings().allowance.hosts as usize;
        let limit = hosts.min(file.total_pieces()).max(1);

        let assignments: Vec<(usize, ContractView)> = wanted
            .iter()
            .copied()
            .filter(|i| *i < pieces.len())
            .zip(targets)
            .collect();
        let results: Vec<(usize, Result<()>)> = stream::iter(assignments)
            .map(|(index, view)| {
                let data = Bytes::from(pieces[index].clone());
                async move { (index, self.upload_piece(path, chunk, index, &view, data).await) }
            })
            .buffer_unordered(limit)
            .collect()
            .await;

        let mut placed = 0;
        for (index, result) in results {
            match result {
                Ok(()) => placed += 1,
                Err(e) => warn!("{} chunk {} piece {} not placed: {}", path, chunk, index, e),
            }
        }
        placed
    }

    /// Uploads one piece under `view`'s contract and records its location.
    /// The contract is charged only once the host has stored the piece.
    async fn upload_piece(
        &self,
        path: &str,
        chunk: usize,
        piece: usize,
        view: &ContractView,
        data: Bytes,
    ) -> Result<()> {
        let contract = &view.contract;
        let _lease = self.contracts.lease_for_upload(&contract.id).await?;
        let prices = self
            .hostdb
            .get(&contract.host_key)
            .map(|h| h.settings)
            .unwrap_or_default();
        let bytes = data.len() as u64;
        let duration = contract.end_height.saturating_sub(self.height());
        let upload_cost = prices.upload_price.mul(bytes);
        let storage_cost = prices.storage_price.mul(bytes).mul(duration);

        let available = self
            .contracts
            .get(&contract.id)
            .await
            .map(|v| v.contract.renter_funds)
            .unwrap_or_default();
        if available < upload_cost + storage_cost {
            self.contracts
                .set_flags(&contract.id, false, contract.good_for_renew)
                .await?;
            return Err(StoreError::InsufficientFunds {
                id: contract.id,
                needed: upload_cost + storage_cost,
                available,
            }
            .into());
        }

        self.limits.upload.acquire(bytes).await;
        let root = retry(
            || transport::upload_piece(&self.transport, &contract.host_address, contract.id, data.clone()),
            "piece upload",
            new_backoff_session(&self.policy),
            self.cancel_token.clone(),
            TransportError::is_transient,
        )
        .await?;
        self.contracts
            .record_spending(&contract.id, SpendingKind::Upload, upload_cost)
            .await?;
        self.contracts
            .record_spending(&contract.id, SpendingKind::Storage, storage_cost)
            .await?;

        let location = PieceLocation {
            contract_id: contract.id,
            host_key: contract.host_key.clone(),
            root,
        };
        self.files
            .update(path, |f| f.add_location(chunk, piece, location));
        Ok(())
    }
}
