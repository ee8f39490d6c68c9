use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "error", rename_all = "lowercase")]
pub enum DownloadOutcome {
    Completed,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRecord {
    pub path: String,
    pub start_time: DateTime<Utc>,
    pub offset: u64,
    pub length: u64,
    pub outcome: DownloadOutcome,
}

/// Append-only log of downloads ordered by start time.
#[derive(Clone, Default)]
pub struct DownloadHistory {
    records: Arc<RwLock<Vec<DownloadRecord>>>,
}

impl DownloadHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, record: DownloadRecord) {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let at = records.partition_point(|r| r.start_time <= record.start_time);
        records.insert(at, record);
    }

    /// Newest first.
    pub fn list(&self) -> Vec<DownloadRecord> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn retain(&self, keep: impl Fn(&DownloadRecord) -> bool) -> usize {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let before = records.len();
        records.retain(|r| keep(r));
        before - records.len()
    }

    /// Removes records started exactly at `t`.
    pub fn clear_at(&self, t: DateTime<Utc>) -> usize {
        self.retain(|r| r.start_time != t)
    }

    /// Removes records with `after < start_time < before`.
    pub fn clear_range(&self, after: DateTime<Utc>, before: DateTime<Utc>) -> usize {
        self.retain(|r| !(after < r.start_time && r.start_time < before))
    }

    /// Removes records with `start_time < t`.
    pub fn clear_before(&self, t: DateTime<Utc>) -> usize {
        self.retain(|r| r.start_time >= t)
    }

    /// Removes records with `start_time > t`.
    pub fn clear_after(&self, t: DateTime<Utc>) -> usize {
        self.retain(|r| r.start_time <= t)
    }

    pub fn clear_all(&self) -> usize {
        self.retain(|_| false)
    }

    /// Both bounds clear the strict range between them, or the exact
    /// timestamp when they are equal. One bound clears strictly before or
    /// after it. No bound clears everything.
    pub fn clear(
        &self,
        after: Option<DateTime<Utc>>,
        before: Option<DateTime<Utc>>,
    ) -> Result<usize> {
        let removed = match (after, before) {
            (Some(a), Some(b)) if a > b => return Err(Error::InvalidHistoryRange),
            (Some(a), Some(b)) if a == b => self.clear_at(a),
            (Some(a), Some(b)) => self.clear_range(a, b),
            (Some(a), None) => self.clear_after(a),
            (None, Some(b)) => self.clear_before(b),
            (None, None) => self.clear_all(),
        };
        Ok(removed)
    }
}
