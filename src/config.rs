//! Engine configuration module
//!
//! Provides the configuration type the host shell builds before constructing
//! the engine: which resources to track, where the local database lives, and
//! the bounds (snapshot TTL, per-send timeout, retry limit, storage quota)
//! the components operate under.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Default server URL
const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:3000";

/// Resource collections tracked when the host does not override them
const DEFAULT_RESOURCES: &[&str] = &["clients", "machines", "orders", "reports"];

/// Record fields stripped from a "light" snapshot write
const DEFAULT_HEAVY_FIELDS: &[&str] = &["photos", "attachments"];

/// Engine configuration
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base URL of the remote API server
    pub server_url: String,
    /// Names of the resource collections the coordinator tracks
    pub resources: Vec<String>,
    /// Age after which a persisted snapshot is discarded
    pub snapshot_ttl: chrono::Duration,
    /// Client-side bound on each individual send
    pub send_timeout: Duration,
    /// Server rejections tolerated before an operation is marked failed
    pub max_retries: i32,
    /// Simulated storage quota for the snapshot document, in bytes
    pub snapshot_quota_bytes: Option<usize>,
    /// Record fields replaced with empty values on a degraded snapshot write
    pub heavy_fields: Vec<String>,
    /// Local database file; platform data directory when unset
    pub db_path: Option<PathBuf>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        let server_url =
            std::env::var("FIELDSYNC_API_URL").unwrap_or_else(|_| DEFAULT_SERVER_URL.to_string());
        Self {
            server_url,
            resources: DEFAULT_RESOURCES.iter().map(|s| s.to_string()).collect(),
            snapshot_ttl: chrono::Duration::days(30),
            send_timeout: Duration::from_secs(15),
            max_retries: 5,
            snapshot_quota_bytes: None,
            heavy_fields: DEFAULT_HEAVY_FIELDS.iter().map(|s| s.to_string()).collect(),
            db_path: None,
        }
    }
}

impl SyncConfig {
    /// Create a new SyncConfigBuilder
    pub fn builder() -> SyncConfigBuilder {
        SyncConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server_url.is_empty() {
            return Err(ConfigError::MissingValue("server_url"));
        }
        if !self.server_url.starts_with("http://") && !self.server_url.starts_with("https://") {
            return Err(ConfigError::InvalidUrl(self.server_url.clone()));
        }
        if self.resources.is_empty() {
            return Err(ConfigError::MissingValue("resources"));
        }
        if self.snapshot_ttl <= chrono::Duration::zero() {
            return Err(ConfigError::InvalidBound("snapshot_ttl must be positive"));
        }
        if self.max_retries < 1 {
            return Err(ConfigError::InvalidBound("max_retries must be at least 1"));
        }
        Ok(())
    }

    /// Get the full URL for an API endpoint
    pub fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.server_url.trim_end_matches('/'), path)
    }
}

/// Builder for SyncConfig
#[derive(Debug, Default)]
pub struct SyncConfigBuilder {
    server_url: Option<String>,
    resources: Option<Vec<String>>,
    snapshot_ttl: Option<chrono::Duration>,
    send_timeout: Option<Duration>,
    max_retries: Option<i32>,
    snapshot_quota_bytes: Option<usize>,
    heavy_fields: Option<Vec<String>>,
    db_path: Option<PathBuf>,
}

impl SyncConfigBuilder {
    /// Set the server URL
    pub fn server_url(mut self, url: impl Into<String>) -> Self {
        self.server_url = Some(url.into());
        self
    }

    /// Set the tracked resource collections
    pub fn resources<I, S>(mut self, resources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.resources = Some(resources.into_iter().map(Into::into).collect());
        self
    }

    /// Set the snapshot time-to-live
    pub fn snapshot_ttl(mut self, ttl: chrono::Duration) -> Self {
        self.snapshot_ttl = Some(ttl);
        self
    }

    /// Set the per-send timeout
    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = Some(timeout);
        self
    }

    /// Set the rejection retry bound
    pub fn max_retries(mut self, max: i32) -> Self {
        self.max_retries = Some(max);
        self
    }

    /// Set the snapshot storage quota in bytes
    pub fn snapshot_quota_bytes(mut self, quota: usize) -> Self {
        self.snapshot_quota_bytes = Some(quota);
        self
    }

    /// Set the fields stripped on a degraded snapshot write
    pub fn heavy_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.heavy_fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Set the local database file path
    pub fn db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.db_path = Some(path.into());
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<SyncConfig, ConfigError> {
        let defaults = SyncConfig::default();
        let config = SyncConfig {
            server_url: self.server_url.unwrap_or(defaults.server_url),
            resources: self.resources.unwrap_or(defaults.resources),
            snapshot_ttl: self.snapshot_ttl.unwrap_or(defaults.snapshot_ttl),
            send_timeout: self.send_timeout.unwrap_or(defaults.send_timeout),
            max_retries: self.max_retries.unwrap_or(defaults.max_retries),
            snapshot_quota_bytes: self.snapshot_quota_bytes.or(defaults.snapshot_quota_bytes),
            heavy_fields: self.heavy_fields.unwrap_or(defaults.heavy_fields),
            db_path: self.db_path.or(defaults.db_path),
        };
        config.validate()?;
        Ok(config)
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("missing value: {0}")]
    MissingValue(&'static str),
    #[error("invalid bound: {0}")]
    InvalidBound(&'static str),
}
