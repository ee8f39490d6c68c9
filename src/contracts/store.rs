use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, PoisonError},
};

use indexmap::IndexMap;
use thiserror::Error as ThisError;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::types::{ContractId, Currency, HostKey};

use super::{Contract, ContractFilter, ContractView, LifecycleState, SpendingKind};

#[derive(ThisError, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Contract not found: {0}")]
    NotFound(ContractId),
    #[error("Contract already exists: {0}")]
    Duplicate(ContractId),
    #[error("Invalid transition of contract {id} from {from} to {to}")]
    InvalidTransition {
        id: ContractId,
        from: LifecycleState,
        to: LifecycleState,
    },
    #[error("Renewal of {old} changes host from {expected} to {actual}")]
    HostMismatch {
        old: ContractId,
        expected: HostKey,
        actual: HostKey,
    },
    #[error("Renewed contract {0} carries spending")]
    NonZeroSpending(ContractId),
    #[error("Contract {0} is pinned by an upload")]
    Busy(ContractId),
    #[error("Contract {0} is not usable for upload")]
    NotUsable(ContractId),
    #[error("Contract {id} has {available} remaining, {needed} needed")]
    InsufficientFunds {
        id: ContractId,
        needed: Currency,
        available: Currency,
    },
}

#[derive(Default)]
struct Inner {
    arena: IndexMap<ContractId, Contract>,
    lifecycle: HashMap<ContractId, LifecycleState>,
}

impl Inner {
    fn view(&self, id: &ContractId) -> Option<ContractView> {
        let contract = self.arena.get(id)?;
        let state = *self.lifecycle.get(id)?;
        Some(ContractView {
            contract: contract.clone(),
            state,
        })
    }

    fn state(&self, id: &ContractId) -> Result<LifecycleState, StoreError> {
        self.lifecycle
            .get(id)
            .copied()
            .ok_or(StoreError::NotFound(*id))
    }

    fn contract_mut(&mut self, id: &ContractId) -> Result<&mut Contract, StoreError> {
        self.arena.get_mut(id).ok_or(StoreError::NotFound(*id))
    }
}

/// Upload leases and in-flight renewals share one lock so a lease is never
/// taken on a host whose renewal has already checked for leases.
#[derive(Default)]
struct PinState {
    leases: HashMap<ContractId, usize>,
    renewing: HashSet<HostKey>,
}

type Pins = Arc<Mutex<PinState>>;

fn lock(pins: &Pins) -> std::sync::MutexGuard<'_, PinState> {
    pins.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Authoritative set of contracts ever formed, in formation order, with
/// their lifecycle state kept in a separate index.
#[derive(Clone, Default)]
pub struct ContractStore {
    inner: Arc<RwLock<Inner>>,
    pins: Pins,
}

impl ContractStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads previously persisted contracts. Existing ids are rejected.
    pub async fn restore(&self, views: Vec<ContractView>) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        for view in views {
            let id = view.contract.id;
            if inner.arena.contains_key(&id) {
                return Err(StoreError::Duplicate(id));
            }
            inner.arena.insert(id, view.contract);
            inner.lifecycle.insert(id, view.state);
        }
        Ok(())
    }

    /// Adds a freshly formed contract as Active.
    pub async fn insert(&self, contract: Contract) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let id = contract.id;
        if inner.arena.contains_key(&id) {
            return Err(StoreError::Duplicate(id));
        }
        info!(
            "Formed contract {} with host {} ending at {}",
            id, contract.host_key, contract.end_height
        );
        inner.arena.insert(id, contract);
        inner.lifecycle.insert(id, LifecycleState::Active);
        Ok(())
    }

    /// Replaces an Active contract by its renewal. Both state changes happen
    /// under one write lock so readers never observe two Active contracts for
    /// the host or a renewed contract with spending.
    pub async fn renew(&self, old_id: &ContractId, renewed: Contract) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let from = inner.state(old_id)?;
        if from != LifecycleState::Active {
            return Err(StoreError::InvalidTransition {
                id: *old_id,
                from,
                to: LifecycleState::Inactive,
            });
        }
        let old = inner.arena.get(old_id).ok_or(StoreError::NotFound(*old_id))?;
        if old.host_key != renewed.host_key {
            return Err(StoreError::HostMismatch {
                old: *old_id,
                expected: old.host_key.clone(),
                actual: renewed.host_key,
            });
        }
        if inner.arena.contains_key(&renewed.id) {
            return Err(StoreError::Duplicate(renewed.id));
        }
        if !renewed.spending().is_zero() {
            return Err(StoreError::NonZeroSpending(renewed.id));
        }
        if self.is_leased(old_id) {
            return Err(StoreError::Busy(*old_id));
        }
        info!(
            "Renewed contract {} as {} with host {} ending at {}",
            old_id, renewed.id, renewed.host_key, renewed.end_height
        );
        inner.lifecycle.insert(*old_id, LifecycleState::Inactive);
        let id = renewed.id;
        inner.arena.insert(id, renewed);
        inner.lifecycle.insert(id, LifecycleState::Active);
        Ok(())
    }

    /// Active -> Inactive. Refused while an upload holds a lease on it.
    pub async fn deactivate(&self, id: &ContractId) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let from = inner.state(id)?;
        if from != LifecycleState::Active {
            return Err(StoreError::InvalidTransition {
                id: *id,
                from,
                to: LifecycleState::Inactive,
            });
        }
        if self.is_leased(id) {
            return Err(StoreError::Busy(*id));
        }
        info!("Contract {} is now inactive", id);
        inner.lifecycle.insert(*id, LifecycleState::Inactive);
        Ok(())
    }

    /// Inactive -> Expired. Returns the expired record.
    pub async fn expire(&self, id: &ContractId) -> Result<Contract, StoreError> {
        let mut inner = self.inner.write().await;
        let from = inner.state(id)?;
        if from != LifecycleState::Inactive {
            return Err(StoreError::InvalidTransition {
                id: *id,
                from,
                to: LifecycleState::Expired,
            });
        }
        info!("Contract {} expired", id);
        inner.lifecycle.insert(*id, LifecycleState::Expired);
        inner
            .arena
            .get(id)
            .cloned()
            .ok_or(StoreError::NotFound(*id))
    }

    pub async fn set_flags(
        &self,
        id: &ContractId,
        good_for_upload: bool,
        good_for_renew: bool,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let contract = inner.contract_mut(id)?;
        if contract.good_for_upload != good_for_upload || contract.good_for_renew != good_for_renew
        {
            debug!(
                "Contract {} flags upload={} renew={}",
                id, good_for_upload, good_for_renew
            );
        }
        contract.good_for_upload = good_for_upload;
        contract.good_for_renew = good_for_renew;
        Ok(())
    }

    /// Increments the consecutive renewal failure counter and returns it.
    pub async fn record_renew_failure(&self, id: &ContractId) -> Result<u32, StoreError> {
        let mut inner = self.inner.write().await;
        let contract = inner.contract_mut(id)?;
        contract.renew_failures += 1;
        Ok(contract.renew_failures)
    }

    /// Moves `amount` of the contract's renter funds into a spending
    /// category. Expired contracts cannot be charged.
    pub async fn record_spending(
        &self,
        id: &ContractId,
        kind: SpendingKind,
        amount: Currency,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let state = inner.state(id)?;
        if state == LifecycleState::Expired {
            return Err(StoreError::NotUsable(*id));
        }
        let contract = inner.contract_mut(id)?;
        let remaining = contract
            .renter_funds
            .checked_sub(amount)
            .ok_or(StoreError::InsufficientFunds {
                id: *id,
                needed: amount,
                available: contract.renter_funds,
            })?;
        contract.renter_funds = remaining;
        let category = match kind {
            SpendingKind::Upload => &mut contract.upload_spending,
            SpendingKind::Download => &mut contract.download_spending,
            SpendingKind::Storage => &mut contract.storage_spending,
        };
        *category += amount;
        Ok(())
    }

    pub async fn get(&self, id: &ContractId) -> Option<ContractView> {
        self.inner.read().await.view(id)
    }

    pub async fn list(&self, filter: ContractFilter) -> Vec<ContractView> {
        let inner = self.inner.read().await;
        inner
            .arena
            .keys()
            .filter_map(|id| inner.view(id))
            .filter(|view| filter.matches(view.state))
            .collect()
    }

    pub async fn snapshot(&self) -> Vec<ContractView> {
        self.list(ContractFilter::All).await
    }

    /// Pins an Active, good-for-upload contract for the duration of one
    /// upload. The contract cannot become Inactive while the lease lives.
    /// Refused while a renewal for the contract's host is in flight.
    pub async fn lease_for_upload(&self, id: &ContractId) -> Result<UploadLease, StoreError> {
        let inner = self.inner.read().await;
        let state = inner.state(id)?;
        let contract = inner.arena.get(id).ok_or(StoreError::NotFound(*id))?;
        if state != LifecycleState::Active || !contract.good_for_upload {
            return Err(StoreError::NotUsable(*id));
        }
        let mut pins = lock(&self.pins);
        if pins.renewing.contains(&contract.host_key) {
            return Err(StoreError::Busy(*id));
        }
        *pins.leases.entry(*id).or_insert(0) += 1;
        drop(pins);
        drop(inner);
        Ok(UploadLease {
            pins: self.pins.clone(),
            id: *id,
        })
    }

    pub fn is_leased(&self, id: &ContractId) -> bool {
        lock(&self.pins).leases.contains_key(id)
    }

    /// Claims the right to renew contracts of `host_key`. `None` when a
    /// renewal for that host is already in flight. While the guard lives no
    /// new upload lease is granted on the host's contracts.
    pub fn begin_renewal(&self, host_key: &HostKey) -> Option<RenewalGuard> {
        let mut pins = lock(&self.pins);
        if !pins.renewing.insert(host_key.clone()) {
            return None;
        }
        Some(RenewalGuard {
            pins: self.pins.clone(),
            host_key: host_key.clone(),
        })
    }
}

pub struct UploadLease {
    pins: Pins,
    id: ContractId,
}

impl UploadLease {
    pub fn id(&self) -> &ContractId {
        &self.id
    }
}

impl Drop for UploadLease {
    fn drop(&mut self) {
        let mut pins = lock(&self.pins);
        if let Some(count) = pins.leases.get_mut(&self.id) {
            *count -= 1;
            if *count == 0 {
                pins.leases.remove(&self.id);
            }
        }
    }
}

pub struct RenewalGuard {
    pins: Pins,
    host_key: HostKey,
}

impl Drop for RenewalGuard {
    fn drop(&mut self) {
        lock(&self.pins).renewing.remove(&self.host_key);
    }
}
