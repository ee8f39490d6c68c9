use tracing::{info, warn};

use crate::{
    erasure::ErasureCoder,
    error::{Error, Result},
    monitor::{RepairJob, RepairSource},
    renter::{Renter, read_chunk},
    transport::HostTransport,
    wallet::Wallet,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepairReport {
    pub jobs: usize,
    pub placed_pieces: usize,
    pub failed_jobs: usize,
}

/// Runs repair jobs one after another. A failed job is logged and retried
/// by a later scan.
pub async fn run<T: HostTransport, W: Wallet>(renter: &Renter<T, W>, jobs: Vec<RepairJob>) -> RepairReport {
    let mut report = RepairReport {
        jobs: jobs.len(),
        ..Default::default()
    };
    for job in jobs {
        if renter.cancel_token.is_cancelled() {
            break;
        }
        match repair(renter, &job).await {
            Ok(placed) => report.placed_pieces += placed,
            Err(e) => {
                warn!("Repair of {} chunk {} failed: {}", job.path, job.chunk, e);
                report.failed_jobs += 1;
            }
        }
    }
    if report.jobs > 0 {
        info!(
            "Repair: {} jobs, {} pieces placed, {} failed",
            report.jobs, report.placed_pieces, report.failed_jobs
        );
    }
    report
}

/// Rebuilds the chunk of `job` and uploads its missing pieces to hosts that
/// hold no piece of the chunk yet.
pub async fn repair<T: HostTransport, W: Wallet>(renter: &Renter<T, W>, job: &RepairJob) -> Result<usize> {
    let file = renter
        .files
        .get(&job.path)
        .ok_or_else(|| Error::FileNotFound(job.path.clone()))?;
    let coder = ErasureCoder::new(file.data_pieces, file.parity_pieces)?;
    let (offset, len) = file.chunk_bounds(job.chunk);

    let pieces = match &job.source {
        RepairSource::LocalSource(path) => {
            let data = read_chunk(path, offset, len).await?;
            coder.encode(&data, file.piece_size as usize)?
        }
        RepairSource::RemoteSource(locations) => {
            let index = renter.contract_index().await;
            let mut pieces = renter
                .collect_pieces(&index, &file, job.chunk, locations.clone())
                .await?;
            coder.reconstruct(&mut pieces)?;
            pieces.into_iter().flatten().collect()
        }
    };

    let placed = renter
        .place_pieces(&job.path, job.chunk, &pieces, &job.missing)
        .await;
    if placed > 0 {
        renter.save_file(&job.path).await?;
    }
    if placed < job.missing.len() {
        warn!(
            "{} chunk {}: repaired {} of {} missing pieces",
            job.path,
            job.chunk,
            placed,
            job.missing.len()
        );
    }
    Ok(placed)
}
