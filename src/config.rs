use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Where contacts come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceMode {
    /// Full ladder: network, durable cache, alternate transports, sample data.
    #[default]
    Remote,
    /// Bundled sample data only.
    Local,
}

/// Values consumed by the ingestion pipeline. Loading is up to the caller;
/// [`IngestConfig::load`] covers the common TOML case.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    #[serde(default)]
    pub source_url: String,
    #[serde(default)]
    pub mode: SourceMode,
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_min_body_bytes")]
    pub min_body_bytes: usize,
    #[serde(default = "default_auto_refresh_secs")]
    pub auto_refresh_secs: u64,
    #[serde(default = "default_memory_cache_secs")]
    pub memory_cache_secs: u64,
    #[serde(default = "default_disk_cache_secs")]
    pub disk_cache_secs: u64,
    /// Relay template; `{url}` is replaced by the url-encoded source.
    #[serde(default)]
    pub proxy_url_template: Option<String>,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            source_url: String::new(),
            mode: SourceMode::Remote,
            retry_count: default_retry_count(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            timeout_ms: default_timeout_ms(),
            min_body_bytes: default_min_body_bytes(),
            auto_refresh_secs: default_auto_refresh_secs(),
            memory_cache_secs: default_memory_cache_secs(),
            disk_cache_secs: default_disk_cache_secs(),
            proxy_url_template: None,
            cache_dir: default_cache_dir(),
        }
    }
}

fn default_retry_count() -> u32 {
    3
}
fn default_retry_base_delay_ms() -> u64 {
    1_000
}
fn default_timeout_ms() -> u64 {
    15_000
}
fn default_min_body_bytes() -> usize {
    50
}
fn default_auto_refresh_secs() -> u64 {
    300
}
fn default_memory_cache_secs() -> u64 {
    300
}
fn default_disk_cache_secs() -> u64 {
    600
}
fn default_cache_dir() -> PathBuf {
    PathBuf::from(".contact-cache")
}

impl IngestConfig {
    pub fn new(source_url: impl Into<String>) -> Self {
        Self {
            source_url: source_url.into(),
            ..Default::default()
        }
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: IngestConfig = toml::from_str(raw).context("invalid ingest config")?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_toml_str(&raw).with_context(|| format!("in {}", path.display()))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn auto_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.auto_refresh_secs)
    }

    pub fn memory_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.memory_cache_secs)
    }

    pub fn disk_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.disk_cache_secs)
    }
}
