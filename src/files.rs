use std::{
    collections::HashSet,
    path::PathBuf,
    sync::{Arc, PoisonError, RwLock},
};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::types::{ContractId, HostKey, PieceRoot};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PieceLocation {
    pub contract_id: ContractId,
    pub host_key: HostKey,
    pub root: PieceRoot,
}

/// Where each piece of one chunk lives. A piece may be held by several
/// hosts after repairs; locations are only ever added.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkPlacement {
    pub pieces: Vec<Vec<PieceLocation>>,
}

impl ChunkPlacement {
    fn new(total_pieces: usize) -> Self {
        Self {
            pieces: vec![Vec::new(); total_pieces],
        }
    }

    /// Hosts holding at least one location accepted by `usable`.
    pub fn hosts(&self, usable: impl Fn(&PieceLocation) -> bool) -> HashSet<HostKey> {
        self.pieces
            .iter()
            .flatten()
            .filter(|l| usable(l))
            .map(|l| l.host_key.clone())
            .collect()
    }

    /// Greedy assignment of piece indices to distinct hosts, considering only
    /// locations accepted by `usable`. Returns `(piece index, location)`.
    pub fn distinct_pieces(
        &self,
        usable: impl Fn(&PieceLocation) -> bool,
    ) -> Vec<(usize, PieceLocation)> {
        let mut seen_hosts = HashSet::new();
        let mut out = Vec::new();
        for (index, locations) in self.pieces.iter().enumerate() {
            if let Some(location) = locations
                .iter()
                .find(|l| usable(*l) && !seen_hosts.contains(&l.host_key))
            {
                seen_hosts.insert(location.host_key.clone());
                out.push((index, location.clone()));
            }
        }
        out
    }

    /// Every location accepted by `usable`, ordered by piece index.
    pub fn sources(&self, usable: impl Fn(&PieceLocation) -> bool) -> Vec<(usize, PieceLocation)> {
        self.pieces
            .iter()
            .enumerate()
            .flat_map(|(index, locations)| locations.iter().map(move |l| (index, l)))
            .filter(|(_, l)| usable(l))
            .map(|(index, l)| (index, l.clone()))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedFile {
    pub path: String,
    pub data_pieces: usize,
    pub parity_pieces: usize,
    pub file_size: u64,
    pub piece_size: u64,
    pub local_path: Option<PathBuf>,
    pub chunks: Vec<ChunkPlacement>,
}

impl TrackedFile {
    pub fn new(
        path: String,
        data_pieces: usize,
        parity_pieces: usize,
        file_size: u64,
        piece_size: u64,
        local_path: Option<PathBuf>,
    ) -> Self {
        let chunk_size = piece_size * data_pieces as u64;
        let num_chunks = file_size.div_ceil(chunk_size).max(1);
        let total = data_pieces + parity_pieces;
        Self {
            path,
            data_pieces,
            parity_pieces,
            file_size,
            piece_size,
            local_path,
            chunks: (0..num_chunks).map(|_| ChunkPlacement::new(total)).collect(),
        }
    }

    pub fn total_pieces(&self) -> usize {
        self.data_pieces + self.parity_pieces
    }

    pub fn chunk_size(&self) -> u64 {
        self.piece_size * self.data_pieces as u64
    }

    /// Byte offset and length of chunk `index` within the file.
    pub fn chunk_bounds(&self, index: usize) -> (u64, u64) {
        let offset = index as u64 * self.chunk_size();
        let len = self.chunk_size().min(self.file_size.saturating_sub(offset));
        (offset, len)
    }

    pub fn add_location(&mut self, chunk: usize, piece: usize, location: PieceLocation) {
        if let Some(slot) = self
            .chunks
            .get_mut(chunk)
            .and_then(|c| c.pieces.get_mut(piece))
        {
            if !slot.contains(&location) {
                slot.push(location);
            }
        }
    }

    /// Points pieces held under `old` at its renewal `new`.
    pub fn remap_contract(&mut self, old: &ContractId, new: &ContractId) -> usize {
        let mut n = 0;
        for location in self
            .chunks
            .iter_mut()
            .flat_map(|c| c.pieces.iter_mut())
            .flatten()
        {
            if &location.contract_id == old {
                location.contract_id = *new;
                n += 1;
            }
        }
        n
    }

    pub fn uploaded_pieces(&self) -> u64 {
        self.chunks
            .iter()
            .flat_map(|c| c.pieces.iter())
            .filter(|p| !p.is_empty())
            .count() as u64
    }

    /// Fraction of the file's pieces that reached at least one host.
    pub fn upload_progress(&self) -> f64 {
        let expected = (self.chunks.len() * self.total_pieces()) as f64;
        if expected == 0.0 {
            return 0.0;
        }
        self.uploaded_pieces() as f64 / expected
    }

    pub fn uploaded_bytes(&self) -> u64 {
        self.chunks
            .iter()
            .flat_map(|c| c.pieces.iter())
            .map(|p| p.len() as u64 * self.piece_size)
            .sum()
    }

    pub fn chunk_redundancy(&self, chunk: usize, usable: impl Fn(&PieceLocation) -> bool) -> f64 {
        match self.chunks.get(chunk) {
            Some(placement) => {
                placement.distinct_pieces(usable).len() as f64 / self.data_pieces as f64
            }
            None => 0.0,
        }
    }

    /// Minimum chunk redundancy.
    pub fn redundancy(&self, usable: impl Fn(&PieceLocation) -> bool) -> f64 {
        (0..self.chunks.len())
            .map(|i| self.chunk_redundancy(i, &usable))
            .fold(f64::INFINITY, f64::min)
            .min(self.total_pieces() as f64 / self.data_pieces as f64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    pub path: String,
    pub file_size: u64,
    pub data_pieces: usize,
    pub parity_pieces: usize,
    pub local_path: Option<PathBuf>,
    pub redundancy: f64,
    pub upload_progress: f64,
    pub uploaded_bytes: u64,
    pub available: bool,
    pub recoverable: bool,
}

/// Files tracked by the renter, keyed by their renter path.
#[derive(Clone, Default)]
pub struct FileSet {
    files: Arc<RwLock<IndexMap<String, TrackedFile>>>,
}

impl FileSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, file: TrackedFile) -> bool {
        let mut files = self.files.write().unwrap_or_else(PoisonError::into_inner);
        if files.contains_key(&file.path) {
            return false;
        }
        files.insert(file.path.clone(), file);
        true
    }

    pub fn get(&self, path: &str) -> Option<TrackedFile> {
        self.files
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
    }

    pub fn remove(&self, path: &str) -> Option<TrackedFile> {
        self.files
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .shift_remove(path)
    }

    pub fn all(&self) -> Vec<TrackedFile> {
        self.files
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(path)
    }

    /// Runs `f` on the file at `path`. Returns `None` when it is not tracked.
    pub fn update<R>(&self, path: &str, f: impl FnOnce(&mut TrackedFile) -> R) -> Option<R> {
        let mut files = self.files.write().unwrap_or_else(PoisonError::into_inner);
        files.get_mut(path).map(f)
    }

    pub fn remap_contract(&self, old: &ContractId, new: &ContractId) -> usize {
        let mut files = self.files.write().unwrap_or_else(PoisonError::into_inner);
        files
            .values_mut()
            .map(|f| f.remap_contract(old, new))
            .sum()
    }
}
