use std::{collections::HashMap, path::PathBuf};

use tracing::{debug, warn};

use crate::{
    contracts::{ContractView, LifecycleState},
    files::{PieceLocation, TrackedFile},
    types::ContractId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Usability {
    /// Pieces count toward health while their contract may still be used or
    /// renewed.
    Health,
    /// Pieces can be fetched from any contract that has not expired.
    Download,
}

/// Point-in-time view of the contract store used to judge piece locations.
#[derive(Debug, Clone, Default)]
pub struct ContractIndex {
    contracts: HashMap<ContractId, ContractView>,
}

impl ContractIndex {
    pub fn new(views: Vec<ContractView>) -> Self {
        Self {
            contracts: views.into_iter().map(|v| (v.contract.id, v)).collect(),
        }
    }

    pub fn get(&self, id: &ContractId) -> Option<&ContractView> {
        self.contracts.get(id)
    }

    pub fn usable(&self, location: &PieceLocation, usability: Usability) -> bool {
        let Some(view) = self.contracts.get(&location.contract_id) else {
            return false;
        };
        if view.state == LifecycleState::Expired {
            return false;
        }
        match usability {
            Usability::Health => view.contract.good_for_upload || view.contract.good_for_renew,
            Usability::Download => true,
        }
    }

    pub fn redundancy(&self, file: &TrackedFile, usability: Usability) -> f64 {
        file.redundancy(|l| self.usable(l, usability))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairSource {
    /// The original file is still on local disk.
    LocalSource(PathBuf),
    /// Enough pieces are still reachable to rebuild the chunk.
    RemoteSource(Vec<(usize, PieceLocation)>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairJob {
    pub path: String,
    pub chunk: usize,
    /// Piece indices without a healthy location.
    pub missing: Vec<usize>,
    pub source: RepairSource,
}

/// Emits a repair job for every chunk that lost pieces and has a way to be
/// rebuilt. Chunks with a local source are repaired on any loss; chunks that
/// must be rebuilt from hosts wait until the missing fraction reaches
/// `remote_threshold`.
pub fn scan(files: &[TrackedFile], index: &ContractIndex, remote_threshold: f64) -> Vec<RepairJob> {
    let mut jobs = Vec::new();
    for file in files {
        let local = file.local_path.clone().filter(|p| p.exists());
        for (chunk, placement) in file.chunks.iter().enumerate() {
            let healthy = placement.distinct_pieces(|l| index.usable(l, Usability::Health));
            if healthy.len() >= file.total_pieces() {
                continue;
            }
            let missing: Vec<usize> = (0..file.total_pieces())
                .filter(|i| !healthy.iter().any(|(h, _)| h == i))
                .collect();
            let source = match &local {
                Some(path) => RepairSource::LocalSource(path.clone()),
                None => {
                    let fraction = missing.len() as f64 / file.total_pieces() as f64;
                    if fraction < remote_threshold {
                        debug!(
                            "{} chunk {} missing {:.2}, below remote repair threshold",
                            file.path, chunk, fraction
                        );
                        continue;
                    }
                    let reachable =
                        placement.distinct_pieces(|l| index.usable(l, Usability::Download));
                    if reachable.len() < file.data_pieces {
                        warn!(
                            "{} chunk {} unrecoverable: {} of {} pieces reachable",
                            file.path,
                            chunk,
                            reachable.len(),
                            file.data_pieces
                        );
                        continue;
                    }
                    RepairSource::RemoteSource(
                        placement.sources(|l| index.usable(l, Usability::Download)),
                    )
                }
            };
            jobs.push(RepairJob {
                path: file.path.clone(),
                chunk,
                missing,
                source,
            });
        }
    }
    jobs
}
