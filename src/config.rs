use anyhow::{ensure, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use validator::Validate;

use crate::modbus::reader::RetryPolicy;

/// Configuration shared between the poll loop, queries and updates
pub type SharedConfig = Arc<RwLock<Config>>;

const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub modbus: ModbusConfig,
    pub polling: PollingConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub enable_cors: bool,
    pub request_timeout_secs: u64,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            enable_cors: true,
            request_timeout_secs: 30,
        }
    }
}

/// Inverter endpoint and read retry budget
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModbusConfig {
    pub host: String,
    pub port: u16,
    pub unit_id: u8,
    pub retry_timeout_secs: u64,
    pub retry_delay_ms: u64,
    /// Poll a simulated inverter instead of the network (needs the `sim` feature)
    pub simulate: bool,
}

impl ModbusConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_secs(self.retry_timeout_secs),
            retry_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }
}

impl Default for ModbusConfig {
    fn default() -> Self {
        Self {
            host: "192.168.9.242".to_string(),
            port: 502,
            unit_id: 1,
            retry_timeout_secs: 10,
            retry_delay_ms: 500,
            simulate: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub interval_secs: u64,
    pub history_size: usize,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            history_size: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// CSV log path; empty disables the durable log
    pub file: String,
}

impl LogConfig {
    pub fn path(&self) -> Option<PathBuf> {
        let file = self.file.trim();
        (!file.is_empty()).then(|| PathBuf::from(file))
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            file: "growatt_log.csv".to_string(),
        }
    }
}

/// Partial update accepted at runtime; absent fields are left unchanged
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ConfigUpdate {
    #[validate(range(min = 1, max = 3600))]
    pub polling_interval_secs: Option<u64>,
    #[validate(range(min = 1, max = 1_000_000))]
    pub history_size: Option<usize>,
    /// Empty string disables the durable log
    pub log_file: Option<String>,
    #[validate(length(min = 1, max = 253))]
    pub modbus_host: Option<String>,
    #[validate(range(min = 1))]
    pub modbus_port: Option<u16>,
    pub modbus_unit_id: Option<u8>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration update: {0}")]
    Invalid(#[from] validator::ValidationErrors),
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            modbus: ModbusConfig::default(),
            polling: PollingConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Config {
    /// Load from `GROWATT_CONFIG` (or `config/default.toml`) layered with `GROWATT__*` env vars
    pub fn load() -> Result<Self> {
        Self::load_from(&config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let figment = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("GROWATT__").split("__"));
        let cfg: Config = figment.extract()?;

        ensure!(
            cfg.polling.interval_secs >= 1,
            "polling.interval_secs must be at least 1"
        );
        ensure!(
            cfg.polling.history_size >= 1,
            "polling.history_size must be at least 1"
        );
        Ok(cfg)
    }

    /// Merge a validated partial update
    pub fn apply(&mut self, update: &ConfigUpdate) -> Result<(), ConfigError> {
        update.validate()?;

        if let Some(interval) = update.polling_interval_secs {
            self.polling.interval_secs = interval;
        }
        if let Some(size) = update.history_size {
            self.polling.history_size = size;
        }
        if let Some(file) = &update.log_file {
            self.log.file = file.clone();
        }
        if let Some(host) = &update.modbus_host {
            self.modbus.host = host.clone();
        }
        if let Some(port) = update.modbus_port {
            self.modbus.port = port;
        }
        if let Some(unit_id) = update.modbus_unit_id {
            self.modbus.unit_id = unit_id;
        }
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let text = toml::to_string_pretty(self)?;
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|source| ConfigError::Write {
                path: path.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(path, text).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Path the configuration is loaded from and saved back to
pub fn config_path() -> PathBuf {
    std::env::var_os("GROWATT_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
