use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    contracts::{ContractFilter, ContractView},
    files::FileInfo,
    history::DownloadRecord,
    hostdb::HostEntry,
    ledger::FinancialMetrics,
    maintenance::ChainEvent,
    renter::{Cycle, UploadRequest},
    settings::{Allowance, Settings},
    transport::HostTransport,
    types::BlockHeight,
    wallet::Wallet,
};

use super::{
    Env,
    error::HttpError,
    result::{RawResult, Result},
};

#[derive(Debug, Serialize, Deserialize)]
pub struct RenterInfo {
    pub settings: Settings,
    pub financial_metrics: FinancialMetrics,
    pub height: BlockHeight,
    pub last_cycle: Cycle,
}

async fn get_info<T: HostTransport, W: Wallet>(env: &Env<T, W>) -> RenterInfo {
    let renter = &env.renter;
    RenterInfo {
        settings: (*renter.settings()).clone(),
        financial_metrics: renter.financial_metrics().await,
        height: renter.height(),
        last_cycle: renter.last_cycle(),
    }
}

pub async fn get_renter<T: HostTransport, W: Wallet>(
    State(env): State<Env<T, W>>,
) -> Result<RenterInfo> {
    Ok(get_info(&env).await.into())
}

pub async fn post_allowance<T: HostTransport, W: Wallet>(
    State(env): State<Env<T, W>>,
    Json(allowance): Json<Allowance>,
) -> Result<RenterInfo> {
    env.renter.set_allowance(allowance).await?;
    Ok(get_info(&env).await.into())
}

pub async fn delete_allowance<T: HostTransport, W: Wallet>(
    State(env): State<Env<T, W>>,
) -> Result<RenterInfo> {
    env.renter.cancel_allowance().await?;
    Ok(get_info(&env).await.into())
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RateLimitRequest {
    #[serde(default)]
    pub max_download_speed: u64,
    #[serde(default)]
    pub max_upload_speed: u64,
}

pub async fn post_rate_limit<T: HostTransport, W: Wallet>(
    State(env): State<Env<T, W>>,
    Json(request): Json<RateLimitRequest>,
) -> Result<RenterInfo> {
    env.renter
        .set_rate_limits(request.max_download_speed, request.max_upload_speed)
        .await?;
    Ok(get_info(&env).await.into())
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StreamCacheSizeRequest {
    pub size: u64,
}

pub async fn post_stream_cache_size<T: HostTransport, W: Wallet>(
    State(env): State<Env<T, W>>,
    Json(request): Json<StreamCacheSizeRequest>,
) -> Result<RenterInfo> {
    env.renter.set_stream_cache_size(request.size).await?;
    Ok(get_info(&env).await.into())
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ContractsQuery {
    #[serde(default)]
    pub filter: ContractFilter,
}

pub async fn get_contracts<T: HostTransport, W: Wallet>(
    State(env): State<Env<T, W>>,
    Query(query): Query<ContractsQuery>,
) -> Result<Vec<ContractView>> {
    Ok(env.renter.contracts_by_filter(query.filter).await.into())
}

pub async fn get_downloads<T: HostTransport, W: Wallet>(
    State(env): State<Env<T, W>>,
) -> Result<Vec<DownloadRecord>> {
    Ok(env.renter.history().list().into())
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ClearDownloadsRequest {
    pub after: Option<DateTime<Utc>>,
    pub before: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Cleared {
    pub removed: usize,
}

pub async fn post_clear_downloads<T: HostTransport, W: Wallet>(
    State(env): State<Env<T, W>>,
    Json(request): Json<ClearDownloadsRequest>,
) -> Result<Cleared> {
    let removed = env.renter.history().clear(request.after, request.before)?;
    Ok(Cleared { removed }.into())
}

pub async fn get_files<T: HostTransport, W: Wallet>(
    State(env): State<Env<T, W>>,
) -> Result<Vec<FileInfo>> {
    Ok(env.renter.file_infos().await.into())
}

pub async fn get_file<T: HostTransport, W: Wallet>(
    State(env): State<Env<T, W>>,
    Path(path): Path<String>,
) -> Result<FileInfo> {
    Ok(env.renter.file_info(&path).await?.into())
}

pub async fn delete_file<T: HostTransport, W: Wallet>(
    State(env): State<Env<T, W>>,
    Path(path): Path<String>,
) -> Result<String> {
    env.renter.delete_file(&path).await?;
    Ok(path.into())
}

pub async fn post_upload<T: HostTransport, W: Wallet>(
    State(env): State<Env<T, W>>,
    Json(request): Json<UploadRequest>,
) -> Result<FileInfo> {
    Ok(env.renter.upload(request).await?.into())
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct DownloadQuery {
    pub offset: Option<u64>,
    pub length: Option<u64>,
}

pub async fn get_download<T: HostTransport, W: Wallet>(
    State(env): State<Env<T, W>>,
    Path(path): Path<String>,
    Query(query): Query<DownloadQuery>,
) -> RawResult<Vec<u8>> {
    let info = env.renter.file_info(&path).await?;
    let offset = query.offset.unwrap_or(0);
    let length = query
        .length
        .unwrap_or_else(|| info.file_size.saturating_sub(offset));
    Ok(env.renter.download_range(&path, offset, length).await?)
}

pub async fn get_stream<T: HostTransport, W: Wallet>(
    State(env): State<Env<T, W>>,
    Path(path): Path<String>,
) -> RawResult<Body> {
    Ok(Body::from_stream(env.renter.stream(&path)?))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConsensusInfo {
    pub height: BlockHeight,
    pub last_cycle: Cycle,
}

pub async fn get_consensus<T: HostTransport, W: Wallet>(
    State(env): State<Env<T, W>>,
) -> Result<ConsensusInfo> {
    Ok(ConsensusInfo {
        height: env.renter.height(),
        last_cycle: env.renter.last_cycle(),
    }
    .into())
}

pub async fn post_block<T: HostTransport, W: Wallet>(
    State(env): State<Env<T, W>>,
    Json(event): Json<ChainEvent>,
) -> Result<ChainEvent> {
    env.chain
        .send(event)
        .await
        .map_err(|_| HttpError::BadRequest("maintenance is not running".to_string()))?;
    Ok(event.into())
}

pub async fn get_hosts<T: HostTransport, W: Wallet>(
    State(env): State<Env<T, W>>,
) -> Result<Vec<HostEntry>> {
    Ok(env.renter.hostdb().all().into())
}

pub async fn post_host<T: HostTransport, W: Wallet>(
    State(env): State<Env<T, W>>,
    Json(entry): Json<HostEntry>,
) -> Result<HostEntry> {
    env.renter.hostdb().announce(entry.clone());
    env.renter.trigger_maintenance();
    Ok(entry.into())
}

pub async fn stop<T: HostTransport, W: Wallet>(
    State(env): State<Env<T, W>>,
) -> Result<RenterInfo> {
    env.cancel_token.cancel();
    Ok(get_info(&env).await.into())
}
