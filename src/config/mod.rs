use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use dotenvy::dotenv;
use serde::Deserialize;

use crate::ledger::{RetryPolicy, DEFAULT_LEDGER_KEY};

/// Where the serialized ledger lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    File,
    Postgres,
    Memory,
}

/// Configuration for the application
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Root of the school backend's REST API
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    pub api_token: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub ledger_backend: StorageBackend,
    #[serde(default = "default_ledger_dir")]
    pub ledger_dir: PathBuf,
    #[serde(default = "default_ledger_key")]
    pub ledger_key: String,
    /// Database connection URL, used by the postgres backend
    pub database_url: Option<String>,

    #[serde(default = "default_sync_max_attempts")]
    pub sync_max_attempts: usize,
    #[serde(default = "default_sync_base_backoff_ms")]
    pub sync_base_backoff_ms: u64,
    #[serde(default = "default_sync_max_backoff_ms")]
    pub sync_max_backoff_ms: u64,

    /// 0 turns periodic reconciliation off
    #[serde(default = "default_reconcile_interval_secs")]
    pub reconcile_interval_secs: u64,
}

fn default_api_base_url() -> String {
    "http://localhost:4000/api".to_string()
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_ledger_dir() -> PathBuf {
    PathBuf::from(".fee-ledger")
}

fn default_ledger_key() -> String {
    DEFAULT_LEDGER_KEY.to_string()
}

fn default_sync_max_attempts() -> usize {
    5
}

fn default_sync_base_backoff_ms() -> u64 {
    500
}

fn default_sync_max_backoff_ms() -> u64 {
    30_000
}

fn default_reconcile_interval_secs() -> u64 {
    300
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// This function will:
    /// 1. Load variables from .env file if it exists
    /// 2. Deserialize environment variables into Config struct
    /// 3. Check that the chosen storage backend has what it needs
    pub fn load() -> Result<Self> {
        dotenv().ok();

        let config = envy::from_env::<Config>()?;
        config.validate()?;

        Ok(config)
    }

    /// Build a Config from explicit key/value pairs, as if they were the environment
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let config = envy::from_iter::<_, Config>(
            pairs.into_iter().map(|(k, v)| (k.into(), v.into())),
        )?;
        config.validate()?;

        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.ledger_backend == StorageBackend::Postgres && self.database_url.is_none() {
            bail!("DATABASE_URL must be set when LEDGER_BACKEND=postgres");
        }
        if self.sync_max_attempts == 0 {
            bail!("SYNC_MAX_ATTEMPTS must be at least 1");
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.sync_max_attempts,
            base_backoff_ms: self.sync_base_backoff_ms,
            max_backoff_ms: self.sync_max_backoff_ms,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn reconcile_interval(&self) -> Option<Duration> {
        (self.reconcile_interval_secs > 0).then(|| Duration::from_secs(self.reconcile_interval_secs))
    }
}

/// Initialize environment variables and load configuration
pub fn init() -> Result<Config> {
    Config::load()
}
