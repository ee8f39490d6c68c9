use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

use crate::types::{BlockHeight, Currency};

pub const DEFAULT_STREAM_CACHE_SIZE: u64 = 2;

#[derive(ThisError, Debug, Clone, PartialEq, Eq)]
pub enum SettingsError {
    #[error("Allowance funds must be greater than zero")]
    ZeroFunds,
    #[error("Allowance hosts must be greater than zero")]
    ZeroHosts,
    #[error("Allowance period must be greater than zero")]
    ZeroPeriod,
    #[error("Renew window {renew_window} must be shorter than period {period}")]
    RenewWindowTooLarge {
        renew_window: BlockHeight,
        period: BlockHeight,
    },
    #[error("Allowance is already cancelled")]
    AlreadyCancelled,
    #[error("Stream cache size must be at least 1")]
    ZeroStreamCacheSize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allowance {
    pub funds: Currency,
    pub hosts: u64,
    pub period: BlockHeight,
    pub renew_window: BlockHeight,
}

impl Allowance {
    /// A cancelled allowance is the zero value.
    pub fn is_active(&self) -> bool {
        !self.funds.is_zero() && self.hosts > 0
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.funds.is_zero() {
            return Err(SettingsError::ZeroFunds);
        }
        if self.hosts == 0 {
            return Err(SettingsError::ZeroHosts);
        }
        if self.period == 0 {
            return Err(SettingsError::ZeroPeriod);
        }
        if self.renew_window >= self.period {
            return Err(SettingsError::RenewWindowTooLarge {
                renew_window: self.renew_window,
                period: self.period,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub allowance: Allowance,
    /// First block of the current funding period.
    pub period_start: BlockHeight,
    pub stream_cache_size: u64,
    /// Bytes per second, 0 means unlimited.
    pub max_download_speed: u64,
    pub max_upload_speed: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            allowance: Allowance::default(),
            period_start: 0,
            stream_cache_size: DEFAULT_STREAM_CACHE_SIZE,
            max_download_speed: 0,
            max_upload_speed: 0,
        }
    }
}

/// Immutable settings snapshots swapped under a single writer.
#[derive(Clone, Default)]
pub struct SettingsHandle {
    current: Arc<RwLock<Arc<Settings>>>,
}

impl SettingsHandle {
    pub fn new(settings: Settings) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(settings))),
        }
    }

    pub fn snapshot(&self) -> Arc<Settings> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Applies `f` to the current snapshot. The new snapshot is published
    /// only when `f` succeeds.
    pub fn update<F>(&self, f: F) -> Result<Arc<Settings>, SettingsError>
    where
        F: FnOnce(&Settings) -> Result<Settings, SettingsError>,
    {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let next = Arc::new(f(&current)?);
        *current = next.clone();
        Ok(next)
    }

    pub fn set_allowance(
        &self,
        allowance: Allowance,
        height: BlockHeight,
    ) -> Result<Arc<Settings>, SettingsError> {
        allowance.validate()?;
        self.update(|s| {
            let period_start = if s.allowance.is_active() {
                s.period_start
            } else {
                height
            };
            Ok(Settings {
                allowance,
                period_start,
                ..s.clone()
            })
        })
    }

    pub fn cancel_allowance(&self) -> Result<Arc<Settings>, SettingsError> {
        self.update(|s| {
            if !s.allowance.is_active() {
                return Err(SettingsError::AlreadyCancelled);
            }
            Ok(Settings {
                allowance: Allowance::default(),
                ..s.clone()
            })
        })
    }

    pub fn set_stream_cache_size(&self, size: u64) -> Result<Arc<Settings>, SettingsError> {
        if size == 0 {
            return Err(SettingsError::ZeroStreamCacheSize);
        }
        self.update(|s| {
            Ok(Settings {
                stream_cache_size: size,
                ..s.clone()
            })
        })
    }

    pub fn set_rate_limits(
        &self,
        max_download_speed: u64,
        max_upload_speed: u64,
    ) -> Result<Arc<Settings>, SettingsError> {
        self.update(|s| {
            Ok(Settings {
                max_download_speed,
                max_upload_speed,
                ..s.clone()
            })
        })
    }

    /// Moves the period forward once `height` enters the renew window of the
    /// current period. Returns the new period start when it moved.
    pub fn advance_period(&self, height: BlockHeight) -> Option<BlockHeight> {
        let mut moved = None;
        let _ = self.update(|s| {
            let a = s.allowance;
            if !a.is_active() || height + a.renew_window < s.period_start + a.period {
                return Ok(s.clone());
            }
            let mut period_start = s.period_start;
            while height + a.renew_window >= period_start + a.period {
                period_start += a.period - a.renew_window;
            }
            moved = Some(period_start);
            Ok(Settings {
                period_start,
                ..s.clone()
            })
        });
        moved
    }
}
