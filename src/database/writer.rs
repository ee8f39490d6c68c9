use std::path::Path;

use anyhow::Result;
use libsql::{Connection, params};

use crate::{contracts::ContractView, files::TrackedFile};

use super::connection::new_connection;

#[derive(Clone)]
pub struct Writer {
    conn: Connection,
}

impl Writer {
    pub async fn new(path: &Path) -> Result<Self> {
        let conn = new_connection(path).await?;
        Ok(Self { conn })
    }

    /// Upserts every contract in one transaction.
    pub async fn save_contracts(&self, views: &[ContractView]) -> Result<()> {
        let tx = self.conn.transaction().await?;
        for view in views {
            tx.execute(
                "INSERT INTO contracts (id, host_key, state, end_height, record)
                 VALUES (?, ?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                    state = excluded.state,
                    end_height = excluded.end_height,
                    record = excluded.record",
                params![
                    view.contract.id.to_string(),
                    view.contract.host_key.to_string(),
                    view.state.to_string(),
                    view.contract.end_height as i64,
                    serde_json::to_string(&view.contract)?
                ],
            )
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn save_file(&self, file: &TrackedFile) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO files (path, record) VALUES (?, ?)
                 ON CONFLICT(path) DO UPDATE SET record = excluded.record",
                params![file.path.clone(), serde_json::to_string(file)?],
            )
            .await?;
        Ok(())
    }

    pub async fn delete_file(&self, path: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM files WHERE path = ?", params![path])
            .await?;
        Ok(())
    }
}
