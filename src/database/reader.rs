use std::path::Path;

use anyhow::{Context, Result};
use deadpool::managed::{Object, Pool};
use libsql::params;

use crate::{
    contracts::{Contract, ContractView, LifecycleState},
    files::TrackedFile,
};

use super::pool::{Manager, new_pool};

#[derive(Clone)]
pub struct Reader {
    pool: Pool<Manager>,
}

impl Reader {
    pub async fn new(path: &Path) -> Result<Self> {
        let pool = new_pool(path)?;
        Ok(Self { pool })
    }

    pub async fn connection(&self) -> Result<Object<Manager>> {
        self.pool
            .get()
            .await
            .context("Failed to get connection for database reader pool")
    }

    /// All contracts in formation order.
    pub async fn load_contracts(&self) -> Result<Vec<ContractView>> {
        let conn = self.connection().await?;
        let mut rows = conn
            .query(
                "SELECT state, record FROM contracts ORDER BY rowid",
                params![],
            )
            .await?;
        let mut views = Vec::new();
        while let Some(row) = rows.next().await? {
            let state: String = row.get(0)?;
            let record: String = row.get(1)?;
            let state: LifecycleState = state.parse().map_err(anyhow::Error::msg)?;
            let contract: Contract = serde_json::from_str(&record)?;
            views.push(ContractView { contract, state });
        }
        Ok(views)
    }

    pub async fn load_files(&self) -> Result<Vec<TrackedFile>> {
        let conn = self.connection().await?;
        let mut rows = conn
            .query("SELECT record FROM files ORDER BY rowid", params![])
            .await?;
        let mut files = Vec::new();
        while let Some(row) = rows.next().await? {
            let record: String = row.get(0)?;
            files.push(serde_json::from_str(&record)?);
        }
        Ok(files)
    }
}
