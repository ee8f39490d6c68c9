use std::{
    collections::HashSet,
    path::Path,
    sync::{Arc, PoisonError, RwLock},
};

use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::{Currency, HostKey};

/// Price terms a host advertises.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostSettings {
    pub accepting_contracts: bool,
    pub contract_price: Currency,
    /// Per byte per block.
    pub storage_price: Currency,
    /// Per byte.
    pub upload_price: Currency,
    /// Per byte.
    pub download_price: Currency,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostEntry {
    pub host_key: HostKey,
    pub address: String,
    pub settings: HostSettings,
    #[serde(default = "default_online")]
    pub online: bool,
}

fn default_online() -> bool {
    true
}

/// Directory of known hosts with their latest price terms and liveness.
#[derive(Clone, Default)]
pub struct HostDb {
    hosts: Arc<RwLock<IndexMap<HostKey, HostEntry>>>,
}

impl HostDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn load_file(&self, path: &Path) -> Result<usize> {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read hosts file {}", path.display()))?;
        let entries: Vec<HostEntry> = serde_json::from_str(&text)?;
        let n = entries.len();
        for entry in entries {
            self.announce(entry);
        }
        info!("Loaded {} hosts from {}", n, path.display());
        Ok(n)
    }

    pub fn announce(&self, entry: HostEntry) {
        let mut hosts = self.hosts.write().unwrap_or_else(PoisonError::into_inner);
        hosts.insert(entry.host_key.clone(), entry);
    }

    pub fn get(&self, host_key: &HostKey) -> Option<HostEntry> {
        self.hosts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(host_key)
            .cloned()
    }

    pub fn all(&self) -> Vec<HostEntry> {
        self.hosts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Records the outcome of a reachability probe.
    pub fn set_online(&self, host_key: &HostKey, online: bool, settings: Option<HostSettings>) {
        let mut hosts = self.hosts.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = hosts.get_mut(host_key) {
            if entry.online != online {
                info!("Host {} is now {}", host_key, if online { "online" } else { "offline" });
            }
            entry.online = online;
            if let Some(settings) = settings {
                entry.settings = settings;
            }
        }
    }

    /// Online hosts accepting contracts that are not in `exclude`, in
    /// announcement order.
    pub fn candidates(&self, exclude: &HashSet<HostKey>) -> Vec<HostEntry> {
        self.hosts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|h| h.online && h.settings.accepting_contracts)
            .filter(|h| !exclude.contains(&h.host_key))
            .cloned()
            .collect()
    }
}
