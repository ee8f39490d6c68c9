use std::path::{Path, PathBuf};

use anyhow::Context;
use deadpool::managed::{self, Pool, RecycleError};
use libsql::Error;

use super::connection::new_connection;

const MAX_READERS: usize = 4;

#[derive(Debug)]
pub struct Manager {
    path: PathBuf,
}

impl Manager {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }
}

fn recycle_error(e: impl std::fmt::Display) -> RecycleError<Error> {
    RecycleError::Message(format!("{}", e).into())
}

impl managed::Manager for Manager {
    type Type = libsql::Connection;
    type Error = Error;

    async fn create(&self) -> Result<Self::Type, Error> {
        new_connection(&self.path).await
    }

    async fn recycle(
        &self,
        conn: &mut Self::Type,
        _: &managed::Metrics,
    ) -> managed::RecycleResult<Error> {
        let n: i64 = conn
            .query("SELECT 1", ())
            .await
            .map_err(recycle_error)?
            .next()
            .await
            .map_err(recycle_error)?
            .ok_or_else(|| recycle_error("no rows returned"))?
            .get(0)
            .map_err(recycle_error)?;
        if n == 1 {
            Ok(())
        } else {
            Err(recycle_error("unexpected liveness result"))
        }
    }
}

pub fn new_pool(path: &Path) -> anyhow::Result<Pool<Manager>> {
    Pool::builder(Manager::new(path))
        .max_size(MAX_READERS)
        .build()
        .context("Failed to build database pool")
}
