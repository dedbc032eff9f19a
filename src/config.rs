//! Configuration loader and validator for the POS sync daemon and tools.
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::db;
use crate::error::RemoteError;
use crate::remote::{BackendHandle, SupabaseClient};
use crate::sync::EngineSettings;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    #[serde(default)]
    pub sync: SyncPolicy,
    #[serde(default)]
    pub connectivity: Connectivity,
    #[serde(default)]
    pub backend: Backend,
}

/// Where this till lives and whom it sells for.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    pub tenant_id: String,
    pub store_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SyncPolicy {
    pub drain_interval_secs: u64,
    pub max_attempts: u32,
    pub retention_days: u32,
    pub request_timeout_secs: u64,
    /// Dine-in only.
    pub service_fee_percent: Decimal,
    pub cleanup_interval_secs: u64,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            drain_interval_secs: 30,
            max_attempts: 3,
            retention_days: 7,
            request_timeout_secs: 15,
            service_fee_percent: Decimal::TEN,
            cleanup_interval_secs: 3600,
        }
    }
}

/// Reachability probe used by the daemon to report online/offline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Connectivity {
    pub probe_interval_ms: u64,
    pub probe_timeout_ms: u64,
}

impl Default for Connectivity {
    fn default() -> Self {
        Self {
            probe_interval_ms: 5000,
            probe_timeout_ms: 2000,
        }
    }
}

/// Hosted backend. Leaving `url` or `anon_key` empty runs the till fully
/// offline.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Backend {
    pub url: String,
    pub anon_key: String,
    pub email: Option<String>,
    pub password: Option<String>,
}

impl Backend {
    pub fn is_configured(&self) -> bool {
        !self.url.trim().is_empty() && !self.anon_key.trim().is_empty()
    }

    /// Email and password for a staff session, when both are set.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.email.as_deref(), self.password.as_deref()) {
            (Some(email), Some(password)) if !email.trim().is_empty() => Some((email, password)),
            _ => None,
        }
    }
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    /// `DATABASE_URL` wins over the file under `app.data_dir`.
    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| db::default_database_url(&self.app.data_dir))
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            drain_interval: Duration::from_secs(self.sync.drain_interval_secs),
            max_attempts: self.sync.max_attempts,
            retention_days: self.sync.retention_days,
            request_timeout: Duration::from_secs(self.sync.request_timeout_secs),
            service_fee_percent: self.sync.service_fee_percent,
        }
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.connectivity.probe_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.connectivity.probe_timeout_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.sync.cleanup_interval_secs)
    }

    /// Client for the configured backend, or `None` when it is left empty.
    pub fn supabase_client(&self) -> Result<Option<SupabaseClient>, RemoteError> {
        if !self.backend.is_configured() {
            return Ok(None);
        }
        SupabaseClient::new(
            self.backend.url.trim(),
            self.backend.anon_key.trim().to_string(),
            Duration::from_secs(self.sync.request_timeout_secs),
        )
        .map(Some)
    }

    /// Backend handle without a staff session.
    pub fn backend_handle(&self) -> Result<BackendHandle, RemoteError> {
        Ok(match self.supabase_client()? {
            Some(client) => BackendHandle::configured(client),
            None => BackendHandle::NotConfigured(not_configured_reason().to_string()),
        })
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("SUPABASE_URL") {
            self.backend.url = url;
        }
        if let Some(key) = lookup("SUPABASE_ANON_KEY") {
            self.backend.anon_key = key;
        }
    }
}

pub fn not_configured_reason() -> &'static str {
    "backend.url and backend.anon_key must both be set"
}

/// Load configuration from a YAML file, apply environment overrides and
/// validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let mut cfg: Config = serde_yaml::from_str(&content)?;
    cfg.apply_overrides(|key| std::env::var(key).ok());
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.tenant_id.trim().is_empty() {
        return Err(ConfigError::Invalid("app.tenant_id must be non-empty"));
    }
    if cfg.app.store_id.trim().is_empty() {
        return Err(ConfigError::Invalid("app.store_id must be non-empty"));
    }

    let sync = &cfg.sync;
    if sync.drain_interval_secs == 0 {
        return Err(ConfigError::Invalid("sync.drain_interval_secs must be > 0"));
    }
    if sync.max_attempts == 0 {
        return Err(ConfigError::Invalid("sync.max_attempts must be > 0"));
    }
    if sync.request_timeout_secs == 0 {
        return Err(ConfigError::Invalid("sync.request_timeout_secs must be > 0"));
    }
    if sync.cleanup_interval_secs == 0 {
        return Err(ConfigError::Invalid("sync.cleanup_interval_secs must be > 0"));
    }
    if sync.service_fee_percent < Decimal::ZERO || sync.service_fee_percent > Decimal::ONE_HUNDRED {
        return Err(ConfigError::Invalid("sync.service_fee_percent must be within 0..=100"));
    }

    if cfg.connectivity.probe_interval_ms == 0 {
        return Err(ConfigError::Invalid("connectivity.probe_interval_ms must be > 0"));
    }
    if cfg.connectivity.probe_timeout_ms == 0 {
        return Err(ConfigError::Invalid("connectivity.probe_timeout_ms must be > 0"));
    }

    let backend = &cfg.backend;
    let url = backend.url.trim();
    if !url.is_empty() && !(url.starts_with("https://") || url.starts_with("http://")) {
        return Err(ConfigError::Invalid("backend.url must be an http(s) URL"));
    }
    if backend.email.is_some() != backend.password.is_some() {
        return Err(ConfigError::Invalid("backend.email and backend.password go together"));
    }

    Ok(())
}

/// Returns the reference YAML configuration.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  tenant_id: "YOUR_TENANT_ID"
  store_id: "YOUR_STORE_ID"

sync:
  drain_interval_secs: 30
  max_attempts: 3
  retention_days: 7
  request_timeout_secs: 15
  service_fee_percent: "10"
  cleanup_interval_secs: 3600

connectivity:
  probe_interval_ms: 5000
  probe_timeout_ms: 2000

backend:
  url: "https://YOUR_PROJECT.supabase.co"
  anon_key: "YOUR_SUPABASE_ANON_KEY"
  email: "till@example.com"
  password: "YOUR_STAFF_PASSWORD"
"#
}
