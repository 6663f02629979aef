use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::http::buffer::DEFAULT_CAPACITY;
use crate::http::connection::ConnectionOptions;

/// Environment variable naming the YAML configuration file.
pub const CONFIG_ENV: &str = "WEIR_CONFIG";
/// Environment variable overriding `server.listen_addr`.
pub const LISTEN_ENV: &str = "LISTEN";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub transfer: TransferConfig,
    /// `RUST_LOG`-style filter directive.
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub buffer_size: usize,
    pub max_header_bytes: usize,
    /// Idle read limit per connection; `0` disables it.
    pub read_timeout_secs: u64,
    pub stop_timeout_secs: u64,
    pub tls: Option<TlsConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    #[serde(default)]
    pub root_ca_path: Option<PathBuf>,
    #[serde(default)]
    pub require_client_cert: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    pub slots: usize,
    pub timeout_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080".to_string(),
            buffer_size: DEFAULT_CAPACITY,
            max_header_bytes: DEFAULT_CAPACITY,
            read_timeout_secs: 60,
            stop_timeout_secs: 5,
            tls: None,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            slots: 5,
            timeout_ms: 45_000,
            poll_interval_ms: 500,
        }
    }
}

impl Config {
    /// Reads the file named by `WEIR_CONFIG` when set, falling back to
    /// defaults, then applies the `LISTEN` override.
    pub fn load() -> anyhow::Result<Self> {
        let mut cfg = match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };

        if let Ok(listen_addr) = std::env::var(LISTEN_ENV) {
            cfg.server.listen_addr = listen_addr;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_yaml_str(&text)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn from_yaml_str(text: &str) -> anyhow::Result<Self> {
        // an empty document deserializes to unit, not to a map
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let cfg: Self = serde_yaml::from_str(text).context("Failed to parse YAML")?;
        Ok(cfg)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.buffer_size == 0 {
            anyhow::bail!("server.buffer_size must be greater than zero");
        }
        if self.server.max_header_bytes == 0 {
            anyhow::bail!("server.max_header_bytes must be greater than zero");
        }
        if self.transfer.slots == 0 {
            anyhow::bail!("transfer.slots must be greater than zero");
        }
        if self.transfer.poll_interval_ms == 0 {
            anyhow::bail!("transfer.poll_interval_ms must be greater than zero");
        }
        Ok(())
    }
}

impl ServerConfig {
    pub fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            buffer_size: self.buffer_size,
            max_header_bytes: self.max_header_bytes,
            read_timeout: (self.read_timeout_secs > 0)
                .then(|| Duration::from_secs(self.read_timeout_secs)),
        }
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

impl TransferConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
