use crate::services::SessionOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const API_KEY_ENV: &str = "IMMICH_API_KEY";

/// Longest accepted staleness window, one week.
const MAX_STALE_AFTER_SECS: u64 = 7 * 24 * 60 * 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("No catalog configured; run `sweeprs config set-immich` or `sweeprs config set-local`")]
    MissingCatalog,

    #[error("Could not determine a {0} directory for this platform")]
    NoPlatformDir(&'static str),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CatalogConfig {
    Immich { base_url: String, api_key: String },
    Local { root: PathBuf },
}

impl CatalogConfig {
    /// Same config with secrets masked, for display.
    pub fn redacted(&self) -> Self {
        match self {
            CatalogConfig::Immich { base_url, api_key } => CatalogConfig::Immich {
                base_url: base_url.clone(),
                api_key: if api_key.is_empty() {
                    String::new()
                } else {
                    "********".to_string()
                },
            },
            other => other.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub page_size: usize,
    pub workers: usize,
    pub pixel_timeout_secs: u64,
    pub store_retries: u32,
    pub retry_backoff_ms: u64,
    pub stale_after_secs: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            page_size: 50,
            workers: num_cpus::get(),
            pixel_timeout_secs: 10,
            store_retries: 3,
            retry_backoff_ms: 250,
            stale_after_secs: 300,
        }
    }
}

impl From<&AnalysisConfig> for SessionOptions {
    fn from(config: &AnalysisConfig) -> Self {
        Self {
            page_size: config.page_size.max(1),
            workers: config.workers.max(1),
            pixel_timeout: Duration::from_secs(config.pixel_timeout_secs),
            store_retries: config.store_retries,
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
            stale_after: stale_after(config.stale_after_secs),
        }
    }
}

fn stale_after(secs: u64) -> chrono::Duration {
    let secs = secs.min(MAX_STALE_AFTER_SECS) as i64;
    chrono::Duration::try_seconds(secs).unwrap_or_else(|| chrono::Duration::days(7))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub catalog: Option<CatalogConfig>,
    /// Defaults to `<data_dir>/sweeprs/results.db`.
    pub store_path: Option<PathBuf>,
    pub analysis: AnalysisConfig,
}

impl AppConfig {
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let dir = dirs::config_dir().ok_or(ConfigError::NoPlatformDir("config"))?;
        Ok(dir.join("sweeprs").join("config.json"))
    }

    /// Reads the file at `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = match std::fs::read_to_string(path) {
            Ok(text) => serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("No config at {}, using defaults", path.display());
                AppConfig::default()
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        config.apply_env(std::env::var(API_KEY_ENV).ok());
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, json).map_err(io_err)
    }

    fn apply_env(&mut self, api_key: Option<String>) {
        let Some(key) = api_key.filter(|k| !k.trim().is_empty()) else {
            return;
        };
        if let Some(CatalogConfig::Immich { api_key, .. }) = &mut self.catalog {
            *api_key = key;
        }
    }

    pub fn catalog(&self) -> Result<&CatalogConfig, ConfigError> {
        self.catalog.as_ref().ok_or(ConfigError::MissingCatalog)
    }

    pub fn store_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.store_path {
            Some(path) => Ok(path.clone()),
            None => {
                let dir = dirs::data_dir().ok_or(ConfigError::NoPlatformDir("data"))?;
                Ok(dir.join("sweeprs").join("results.db"))
            }
        }
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions::from(&self.analysis)
    }

    pub fn redacted(&self) -> Self {
        Self {
            catalog: self.catalog.as_ref().map(CatalogConfig::redacted),
            ..self.clone()
        }
    }
}
