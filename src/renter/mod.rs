mod download;
mod upload;

use std::{
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use tokio::{
    io::{AsyncReadExt, AsyncSeekExt},
    sync::{Mutex, Notify, watch},
};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    cache::StreamCache,
    config::{Config, Policy},
    contracts::{ContractFilter, ContractStore, ContractView},
    database::{self, DATABASE_FILENAME},
    error::{Error, Result},
    files::{FileInfo, FileSet, TrackedFile},
    history::DownloadHistory,
    hostdb::HostDb,
    ledger::{FinancialMetrics, LedgerContext},
    maintenance,
    monitor::{ContractIndex, Usability},
    persist::SettingsStore,
    ratelimit::RateLimits,
    settings::{Allowance, Settings, SettingsHandle},
    transport::HostTransport,
    types::BlockHeight,
    wallet::Wallet,
};

pub use upload::UploadRequest;

/// Completed maintenance cycles, published after every cycle settles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cycle {
    pub seq: u64,
    pub height: BlockHeight,
}

#[derive(Clone)]
pub struct Persistence {
    pub settings: SettingsStore,
    pub writer: database::Writer,
}

#[derive(Clone)]
pub struct Renter<T: HostTransport, W: Wallet> {
    pub(crate) policy: Arc<Policy>,
    pub(crate) settings: SettingsHandle,
    pub(crate) contracts: ContractStore,
    pub(crate) files: FileSet,
    pub(crate) hostdb: HostDb,
    pub(crate) transport: T,
    pub(crate) wallet: W,
    pub(crate) cache: StreamCache,
    pub(crate) history: DownloadHistory,
    pub(crate) limits: RateLimits,
    pub(crate) height: Arc<AtomicU64>,
    pub(crate) persistence: Option<Persistence>,
    pub(crate) cycle_lock: Arc<Mutex<()>>,
    pub(crate) trigger: Arc<Notify>,
    pub(crate) settled: Arc<watch::Sender<Cycle>>,
    pub(crate) cancel_token: CancellationToken,
}

impl<T: HostTransport, W: Wallet> Renter<T, W> {
    /// Builds a renter without persistence.
    pub fn new(
        policy: Policy,
        settings: Settings,
        hostdb: HostDb,
        transport: T,
        wallet: W,
        cancel_token: CancellationToken,
    ) -> Self {
        let cache = StreamCache::new(settings.stream_cache_size);
        let limits = RateLimits::new(settings.max_download_speed, settings.max_upload_speed);
        let (settled, _) = watch::channel(Cycle::default());
        Self {
            policy: Arc::new(policy),
            settings: SettingsHandle::new(settings),
            contracts: ContractStore::new(),
            files: FileSet::new(),
            hostdb,
            transport,
            wallet,
            cache,
            history: DownloadHistory::new(),
            limits,
            height: Arc::new(AtomicU64::new(0)),
            persistence: None,
            cycle_lock: Arc::new(Mutex::new(())),
            trigger: Arc::new(Notify::new()),
            settled: Arc::new(settled),
            cancel_token,
        }
    }

    /// Builds a renter backed by the settings file and database in
    /// `config.data_dir`, restoring contracts and tracked files.
    pub async fn open(
        config: &Config,
        hostdb: HostDb,
        transport: T,
        wallet: W,
        cancel_token: CancellationToken,
    ) -> Result<Self> {
        tokio::fs::create_dir_all(&config.data_dir).await?;
        let settings_store = SettingsStore::new(&config.data_dir);
        let settings = settings_store.load().await?;
        let db_path = config.data_dir.join(DATABASE_FILENAME);
        let writer = database::Writer::new(&db_path).await?;
        let reader = database::Reader::new(&db_path).await?;

        let mut renter = Self::new(
            config.policy(),
            settings,
            hostdb,
            transport,
            wallet,
            cancel_token,
        );
        let contracts = reader.load_contracts().await?;
        info!("Restoring {} contracts", contracts.len());
        renter.contracts.restore(contracts).await?;
        for file in reader.load_files().await? {
            renter.files.insert(file);
        }
        renter.persistence = Some(Persistence {
            settings: settings_store,
            writer,
        });
        Ok(renter)
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn height(&self) -> BlockHeight {
        self.height.load(Ordering::SeqCst)
    }

    pub(crate) fn set_height(&self, height: BlockHeight) {
        self.height.store(height, Ordering::SeqCst);
    }

    pub fn settings(&self) -> Arc<Settings> {
        self.settings.snapshot()
    }

    pub fn contracts(&self) -> &ContractStore {
        &self.contracts
    }

    pub fn files(&self) -> &FileSet {
        &self.files
    }

    pub fn hostdb(&self) -> &HostDb {
        &self.hostdb
    }

    pub fn wallet(&self) -> &W {
        &self.wallet
    }

    pub fn cache(&self) -> &StreamCache {
        &self.cache
    }

    pub fn history(&self) -> &DownloadHistory {
        &self.history
    }

    pub fn limits(&self) -> &RateLimits {
        &self.limits
    }

    pub async fn set_allowance(&self, allowance: Allowance) -> Result<()> {
        let settings = self.settings.set_allowance(allowance, self.height())?;
        info!(
            "Allowance set: {} funds, {} hosts, period {} starting at {}",
            allowance.funds, allowance.hosts, allowance.period, settings.period_start
        );
        self.save_settings(&settings).await?;
        self.trigger_maintenance();
        Ok(())
    }

    /// Empties the allowance. Contracts are retired by the next maintenance
    /// cycle and stay usable for downloads.
    pub async fn cancel_allowance(&self) -> Result<()> {
        let settings = self.settings.cancel_allowance()?;
        info!("Allowance cancelled");
        self.save_settings(&settings).await?;
        self.trigger_maintenance();
        Ok(())
    }

    pub async fn set_stream_cache_size(&self, size: u64) -> Result<()> {
        let settings = self.settings.set_stream_cache_size(size)?;
        self.cache.resize(size);
        self.save_settings(&settings).await
    }

    pub async fn set_rate_limits(&self, max_download_speed: u64, max_upload_speed: u64) -> Result<()> {
        let settings = self
            .settings
            .set_rate_limits(max_download_speed, max_upload_speed)?;
        self.limits.set(max_download_speed, max_upload_speed);
        self.save_settings(&settings).await
    }

    pub async fn contracts_by_filter(&self, filter: ContractFilter) -> Vec<ContractView> {
        self.contracts.list(filter).await
    }

    pub(crate) fn ledger_context(&self, settings: &Settings) -> LedgerContext {
        LedgerContext {
            funds: settings.allowance.funds,
            period_start: settings.period_start,
            height: self.height(),
            window_size: self.policy.host_window_size,
            maturity_delay: self.policy.maturity_delay,
        }
    }

    pub async fn financial_metrics(&self) -> FinancialMetrics {
        let settings = self.settings();
        let contracts = self.contracts.snapshot().await;
        FinancialMetrics::compute(&contracts, &self.ledger_context(&settings))
    }

    pub async fn contract_index(&self) -> ContractIndex {
        ContractIndex::new(self.contracts.snapshot().await)
    }

    fn describe(&self, file: &TrackedFile, index: &ContractIndex) -> FileInfo {
        let available = index.redundancy(file, Usability::Download) >= 1.0;
        let local = file.local_path.as_ref().is_some_and(|p| p.exists());
        FileInfo {
            path: file.path.clone(),
            file_size: file.file_size,
            data_pieces: file.data_pieces,
            parity_pieces: file.parity_pieces,
            local_path: file.local_path.clone(),
            redundancy: index.redundancy(file, Usability::Health),
            upload_progress: file.upload_progress(),
            uploaded_bytes: file.uploaded_bytes(),
            available,
            recoverable: available || local,
        }
    }

    pub async fn file_info(&self, path: &str) -> Result<FileInfo> {
        let file = self
            .files
            .get(path)
            .ok_or_else(|| Error::FileNotFound(path.to_string()))?;
        let index = self.contract_index().await;
        Ok(self.describe(&file, &index))
    }

    pub async fn file_infos(&self) -> Vec<FileInfo> {
        let index = self.contract_index().await;
        self.files
            .all()
            .iter()
            .map(|f| self.describe(f, &index))
            .collect()
    }

    /// Stops tracking a file. Pieces already stored on hosts are left to
    /// expire with their contracts.
    pub async fn delete_file(&self, path: &str) -> Result<()> {
        self.files
            .remove(path)
            .ok_or_else(|| Error::FileNotFound(path.to_string()))?;
        self.cache.invalidate(path);
        if let Some(p) = &self.persistence {
            p.writer.delete_file(path).await?;
        }
        info!("Deleted {}", path);
        Ok(())
    }

    /// Sets the height and runs one maintenance cycle.
    pub async fn process_block(&self, height: BlockHeight) -> Result<Cycle> {
        self.set_height(height);
        maintenance::run_cycle(self).await
    }

    /// Runs one maintenance cycle at the current height.
    pub async fn run_maintenance(&self) -> Result<Cycle> {
        maintenance::run_cycle(self).await
    }

    /// Wakes the background maintenance task.
    pub fn trigger_maintenance(&self) {
        self.trigger.notify_one();
    }

    pub fn subscribe(&self) -> watch::Receiver<Cycle> {
        self.settled.subscribe()
    }

    pub fn last_cycle(&self) -> Cycle {
        *self.settled.borrow()
    }

    /// Waits until cycle `seq` has completed, at most `timeout`.
    pub async fn wait_for_cycle(&self, seq: u64, timeout: Duration) -> Result<Cycle> {
        let mut rx = self.settled.subscribe();
        let cycle = tokio::time::timeout(timeout, rx.wait_for(|c| c.seq >= seq))
            .await
            .map_err(|_| anyhow!("Timed out waiting for maintenance cycle {}", seq))?
            .map_err(|e| anyhow!("Maintenance stopped: {}", e))?;
        Ok(*cycle)
    }

    pub(crate) fn publish_cycle(&self, height: BlockHeight) -> Cycle {
        let mut published = Cycle::default();
        self.settled.send_modify(|c| {
            c.seq += 1;
            c.height = height;
            published = *c;
        });
        published
    }

    pub(crate) async fn save_settings(&self, settings: &Settings) -> Result<()> {
        if let Some(p) = &self.persistence {
            p.settings.save(settings).await?;
        }
        Ok(())
    }

    pub(crate) async fn save_contracts(&self) -> Result<()> {
        if let Some(p) = &self.persistence {
            p.writer.save_contracts(&self.contracts.snapshot().await).await?;
        }
        Ok(())
    }

    pub(crate) async fn save_file(&self, path: &str) -> Result<()> {
        if let (Some(p), Some(file)) = (&self.persistence, self.files.get(path)) {
            p.writer.save_file(&file).await?;
        }
        Ok(())
    }
}

/// Reads `len` bytes at `offset` of a local file.
pub(crate) async fn read_chunk(path: &Path, offset: u64, len: u64) -> Result<Vec<u8>> {
    let mut file = tokio::fs::File::open(path).await?;
    file.seek(std::io::SeekFrom::Start(offset)).await?;
    let mut buf = vec![0u8; len as usize];
    file.read_exact(&mut buf).await?;
    Ok(buf)
}
