mod store;

use std::{fmt, str::FromStr};

use bon::Builder;
use serde::{Deserialize, Serialize};

use crate::types::{BlockHeight, ContractId, Currency, HostKey};

pub use store::{ContractStore, RenewalGuard, StoreError, UploadLease};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Builder)]
pub struct Contract {
    pub id: ContractId,
    pub host_key: HostKey,
    pub host_address: String,
    pub start_height: BlockHeight,
    pub end_height: BlockHeight,
    pub total_cost: Currency,
    pub renter_funds: Currency,
    #[builder(default)]
    pub fees: Currency,
    #[builder(default)]
    pub upload_spending: Currency,
    #[builder(default)]
    pub download_spending: Currency,
    #[builder(default)]
    pub storage_spending: Currency,
    #[builder(default = true)]
    pub good_for_upload: bool,
    #[builder(default = true)]
    pub good_for_renew: bool,
    #[builder(default)]
    pub renew_failures: u32,
}

impl Contract {
    pub fn spending(&self) -> Currency {
        self.upload_spending + self.download_spending + self.storage_spending
    }

    /// Height after which the host's proof window has closed and the funds
    /// locked in the contract are released.
    pub fn maturity_height(&self, window_size: BlockHeight, maturity_delay: BlockHeight) -> BlockHeight {
        self.end_height + window_size + maturity_delay
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Active,
    Inactive,
    Expired,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleState::Active => "active",
            LifecycleState::Inactive => "inactive",
            LifecycleState::Expired => "expired",
        };
        f.write_str(s)
    }
}

impl FromStr for LifecycleState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(LifecycleState::Active),
            "inactive" => Ok(LifecycleState::Inactive),
            "expired" => Ok(LifecycleState::Expired),
            other => Err(format!("unknown lifecycle state: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractView {
    #[serde(flatten)]
    pub contract: Contract,
    pub state: LifecycleState,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractFilter {
    #[default]
    Active,
    Inactive,
    Expired,
    All,
}

impl ContractFilter {
    pub fn matches(&self, state: LifecycleState) -> bool {
        match self {
            ContractFilter::Active => state == LifecycleState::Active,
            ContractFilter::Inactive => state == LifecycleState::Inactive,
            ContractFilter::Expired => state == LifecycleState::Expired,
            ContractFilter::All => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpendingKind {
    Upload,
    Download,
    Storage,
}
