use std::{
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::info;

use crate::{
    settings::{Allowance, DEFAULT_STREAM_CACHE_SIZE, Settings},
    types::{BlockHeight, Currency},
};

pub const SETTINGS_FILENAME: &str = "renter.json";
pub const SETTINGS_VERSION: &str = "1.4.0";

#[derive(Debug, Serialize, Deserialize)]
struct SettingsFile {
    version: String,
    settings: Settings,
}

/// Settings written by older releases: an optional two-line header
/// (`"Renter Persistence"`, `"<version>"`) followed by a PascalCase object
/// in which any field may be absent.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct LegacySettings {
    allowance: LegacyAllowance,
    current_period: BlockHeight,
    stream_cache_size: u64,
    max_download_speed: i64,
    max_upload_speed: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct LegacyAllowance {
    funds: Currency,
    hosts: u64,
    period: BlockHeight,
    renew_window: BlockHeight,
}

impl From<LegacySettings> for Settings {
    fn from(legacy: LegacySettings) -> Self {
        let stream_cache_size = match legacy.stream_cache_size {
            0 => DEFAULT_STREAM_CACHE_SIZE,
            n => n,
        };
        Settings {
            allowance: Allowance {
                funds: legacy.allowance.funds,
                hosts: legacy.allowance.hosts,
                period: legacy.allowance.period,
                renew_window: legacy.allowance.renew_window,
            },
            period_start: legacy.current_period,
            stream_cache_size,
            max_download_speed: legacy.max_download_speed.max(0) as u64,
            max_upload_speed: legacy.max_upload_speed.max(0) as u64,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(SETTINGS_FILENAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the settings file. A missing file yields the defaults.
    pub async fn load(&self) -> Result<Settings> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No settings at {}, using defaults", self.path.display());
                return Ok(Settings::default());
            }
            Err(e) => return Err(e.into()),
        };
        parse_settings(&text)
            .with_context(|| format!("Failed to parse settings at {}", self.path.display()))
    }

    /// Writes through a temporary file in the same directory so a crash never
    /// leaves a torn settings file behind.
    pub async fn save(&self, settings: &Settings) -> Result<()> {
        let file = SettingsFile {
            version: SETTINGS_VERSION.to_string(),
            settings: settings.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&file)?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let dir = path
                .parent()
                .ok_or_else(|| anyhow!("Settings path has no parent directory"))?;
            let mut tmp = NamedTempFile::new_in(dir)?;
            tmp.write_all(&bytes)?;
            tmp.as_file().sync_all()?;
            tmp.persist(&path)?;
            Ok(())
        })
        .await?
    }
}

pub fn parse_settings(text: &str) -> Result<Settings> {
    let values = serde_json::Deserializer::from_str(text)
        .into_iter::<Value>()
        .collect::<Result<Vec<_>, _>>()?;
    let object = values
        .last()
        .ok_or_else(|| anyhow!("Settings file is empty"))?
        .clone();

    if values.len() == 1 && object.get("version").is_some() && object.get("settings").is_some() {
        let file: SettingsFile = serde_json::from_value(object)?;
        return Ok(file.settings);
    }

    if let Some(Value::String(version)) = values.len().checked_sub(2).and_then(|i| values.get(i)) {
        info!("Loading settings written by version {}", version);
    }
    let legacy: LegacySettings = serde_json::from_value(object)?;
    Ok(legacy.into())
}
