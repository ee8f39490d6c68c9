use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use anyhow::Result;
use bytes::Bytes;
use rand::prelude::*;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use crate::{
    config::Policy,
    database::{DATABASE_FILENAME, Reader, Writer},
    hostdb::{HostDb, HostEntry, HostSettings},
    renter::Renter,
    settings::{Allowance, Settings},
    transport::{HostTransport, Request, Response, TransportError},
    types::{Currency, HostKey, PieceRoot},
    wallet::LocalWallet,
};

pub const WALLET_BALANCE: u128 = 10_000_000;
pub const TX_FEE: u128 = 5;

struct MemoryHost {
    settings: HostSettings,
    online: bool,
    refuse_contracts: bool,
    pieces: HashMap<PieceRoot, Bytes>,
}

/// Request kinds that can be slowed down to widen race windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    Settings,
    Form,
    Renew,
    Upload,
    Download,
}

impl CallKind {
    fn of(request: &Request) -> Self {
        match request {
            Request::Settings => CallKind::Settings,
            Request::FormContract(_) => CallKind::Form,
            Request::RenewContract { .. } => CallKind::Renew,
            Request::Upload { .. } => CallKind::Upload,
            Request::Download { .. } => CallKind::Download,
        }
    }
}

#[derive(Default)]
struct NetworkState {
    hosts: HashMap<String, MemoryHost>,
    delays: HashMap<CallKind, Duration>,
    uploads: usize,
    downloads: usize,
}

/// In-process hosts reachable by address.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
}

pub fn address_of(host_key: &HostKey) -> String {
    format!("mem://{}", host_key)
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, NetworkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_host(&self, host_key: &HostKey, settings: HostSettings) -> HostEntry {
        let address = address_of(host_key);
        self.state().hosts.insert(
            address.clone(),
            MemoryHost {
                settings: settings.clone(),
                online: true,
                refuse_contracts: false,
                pieces: HashMap::new(),
            },
        );
        HostEntry {
            host_key: host_key.clone(),
            address,
            settings,
            online: true,
        }
    }

    pub fn set_online(&self, host_key: &HostKey, online: bool) {
        if let Some(host) = self.state().hosts.get_mut(&address_of(host_key)) {
            host.online = online;
        }
    }

    /// A host whose wallet is locked answers but refuses to sign contracts.
    pub fn set_refuse_contracts(&self, host_key: &HostKey, refuse: bool) {
        if let Some(host) = self.state().hosts.get_mut(&address_of(host_key)) {
            host.refuse_contracts = refuse;
        }
    }

    /// Every request of `kind` waits `delay` before the host handles it.
    pub fn set_delay(&self, kind: CallKind, delay: Duration) {
        self.state().delays.insert(kind, delay);
    }

    pub fn piece_count(&self, host_key: &HostKey) -> usize {
        self.state()
            .hosts
            .get(&address_of(host_key))
            .map(|h| h.pieces.len())
            .unwrap_or(0)
    }

    pub fn uploads(&self) -> usize {
        self.state().uploads
    }

    pub fn downloads(&self) -> usize {
        self.state().downloads
    }
}

impl HostTransport for MemoryNetwork {
    async fn call(&self, address: &str, request: Request) -> Result<Response, TransportError> {
        let delay = self.state().delays.get(&CallKind::of(&request)).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.handle(address, request)
    }
}

impl MemoryNetwork {
    fn handle(&self, address: &str, request: Request) -> Result<Response, TransportError> {
        let mut state = self.state();
        let state = &mut *state;
        let host = state
            .hosts
            .get_mut(address)
            .filter(|h| h.online)
            .ok_or_else(|| TransportError::Unreachable(address.to_string()))?;
        let response = match request {
            Request::Settings => Response::Settings(host.settings.clone()),
            Request::FormContract(_) | Request::RenewContract { .. } => {
                if host.refuse_contracts {
                    Response::Refused("wallet locked".to_string())
                } else {
                    Response::Accepted
                }
            }
            Request::Upload { data, .. } => {
                let root = PieceRoot::hash(&data);
                host.pieces.insert(root, data);
                state.uploads += 1;
                Response::Stored(root)
            }
            Request::Download { root, .. } => match host.pieces.get(&root) {
                Some(data) => {
                    state.downloads += 1;
                    Response::Piece(data.clone())
                }
                None => Response::Refused(format!("unknown piece {}", root)),
            },
        };
        Ok(response)
    }
}

pub async fn new_test_db() -> Result<(Reader, Writer, TempDir)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join(DATABASE_FILENAME);
    let writer = Writer::new(&db_path).await?;
    let reader = Reader::new(&db_path).await?;
    Ok((reader, writer, temp_dir))
}

pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len];
    rand::rng().fill_bytes(&mut data);
    data
}

pub fn test_policy() -> Policy {
    Policy {
        host_window_size: 5,
        maturity_delay: 3,
        renew_failure_threshold: 2,
        piece_size: 64,
        retry_min_delay_ms: 1,
        retry_max_times: 1,
        ..Policy::default()
    }
}

pub fn test_host_settings() -> HostSettings {
    HostSettings {
        accepting_contracts: true,
        contract_price: Currency::new(10),
        storage_price: Currency::ZERO,
        upload_price: Currency::new(1),
        download_price: Currency::new(1),
    }
}

pub fn test_allowance() -> Allowance {
    Allowance {
        funds: Currency::new(1_000_000),
        hosts: 3,
        period: 50,
        renew_window: 20,
    }
}

pub struct TestRenter {
    pub network: MemoryNetwork,
    pub wallet: LocalWallet,
    pub hosts: Vec<HostKey>,
    pub renter: Renter<MemoryNetwork, LocalWallet>,
    pub cancel_token: CancellationToken,
}

/// A renter without persistence wired to `n` in-memory hosts.
pub fn test_renter(n: usize) -> TestRenter {
    test_renter_with(n, test_policy())
}

pub fn test_renter_with(n: usize, policy: Policy) -> TestRenter {
    let network = MemoryNetwork::new();
    let hostdb = HostDb::new();
    let hosts: Vec<HostKey> = (0..n).map(|i| HostKey::new(format!("host-{}", i))).collect();
    for key in &hosts {
        hostdb.announce(network.add_host(key, test_host_settings()));
    }
    let wallet = LocalWallet::new(Currency::new(WALLET_BALANCE), Currency::new(TX_FEE));
    let cancel_token = CancellationToken::new();
    let renter = Renter::new(
        policy,
        Settings::default(),
        hostdb,
        network.clone(),
        wallet.clone(),
        cancel_token.clone(),
    );
    TestRenter {
        network,
        wallet,
        hosts,
        renter,
        cancel_token,
    }
}
