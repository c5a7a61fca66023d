//! Configuration loading
//!
//! The proxy is configured from a YAML file. Every section has defaults so a
//! minimal file only lists the listeners.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::proxy::dispatcher::DEFAULT_BUFFER_SIZE;
use crate::server::listener::ListenAddr;

pub const DEFAULT_CONFIG_PATH: &str = "config.yml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub worker: WorkerConfig,
    pub logger: LoggerConfig,
    pub filters: FiltersConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// TCP `host:port` addresses or `unix:<path>` sockets
    pub listeners: Vec<String>,
    /// Seconds in-flight connections get to finish on shutdown
    pub shutdown_timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listeners: Vec::new(),
            shutdown_timeout: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub pool_size: usize,
    pub buffer_size: usize,
    /// Seconds a client has to send its request head
    pub read_timeout: u64,
    /// Seconds allowed for resolving and connecting to an upstream
    pub connect_timeout: u64,
    pub max_header_size: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            pool_size: 1024,
            buffer_size: DEFAULT_BUFFER_SIZE,
            read_timeout: 30,
            connect_timeout: 10,
            max_header_size: 64 * 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoggerMode {
    #[default]
    Development,
    Production,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    pub mode: LoggerMode,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FiltersConfig {
    pub healthcheck: HealthCheckConfig,
    pub forwarded: ForwardedConfig,
    pub certbot: CertbotConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    pub enabled: bool,
    pub method: String,
    pub path: String,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            method: "GET".to_string(),
            path: "/healthz".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ForwardedConfig {
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CertbotConfig {
    pub enabled: bool,
    pub hostname: String,
    pub webroot: PathBuf,
    pub challenge_path: String,
}

impl Default for CertbotConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            hostname: String::new(),
            webroot: PathBuf::new(),
            challenge_path: "/.well-known/acme-challenge/".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub enabled: bool,
    /// Realm announced in the `Proxy-Authenticate` challenge
    pub realm: String,
    pub passwords_file: Option<PathBuf>,
    /// Base64-encoded pepper mixed into every password digest
    pub pepper: String,
    /// Inline users with plaintext passwords
    pub users: HashMap<String, String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            realm: "waypost".to_string(),
            passwords_file: None,
            pepper: String::new(),
            users: HashMap::new(),
        }
    }
}

impl Config {
    /// Reads, parses and validates the file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let cfg: Config = serde_yaml::from_str(content)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| -> Result<(), ConfigError> { Err(ConfigError::Invalid(msg.to_string())) };

        if self.server.listeners.is_empty() {
            return invalid("server.listeners must list at least one address");
        }
        for addr in &self.server.listeners {
            addr.parse::<ListenAddr>()
                .map_err(|e| ConfigError::Invalid(format!("server.listeners: {}", e)))?;
        }

        if self.worker.pool_size == 0 {
            return invalid("worker.pool_size must be at least 1");
        }
        if self.worker.buffer_size == 0 {
            return invalid("worker.buffer_size must be at least 1");
        }
        if self.worker.connect_timeout == 0 {
            return invalid("worker.connect_timeout must be at least 1");
        }
        if self.worker.max_header_size == 0 {
            return invalid("worker.max_header_size must be at least 1");
        }

        let filters = &self.filters;
        if filters.healthcheck.enabled {
            if filters.healthcheck.method.is_empty() {
                return invalid("filters.healthcheck.method must not be empty");
            }
            if !filters.healthcheck.path.starts_with('/') {
                return invalid("filters.healthcheck.path must start with '/'");
            }
        }

        if filters.certbot.enabled {
            if filters.certbot.hostname.is_empty() {
                return invalid("filters.certbot.hostname is required");
            }
            if filters.certbot.webroot.as_os_str().is_empty() {
                return invalid("filters.certbot.webroot is required");
            }
            if !filters.certbot.challenge_path.starts_with('/') {
                return invalid("filters.certbot.challenge_path must start with '/'");
            }
        }

        if filters.auth.enabled && filters.auth.realm.contains('"') {
            return invalid("filters.auth.realm must not contain '\"'");
        }
        if filters.auth.enabled && filters.auth.passwords_file.is_none() && filters.auth.users.is_empty() {
            return invalid("filters.auth needs a passwords_file or inline users");
        }

        Ok(())
    }

    pub fn listen_addrs(&self) -> Result<Vec<ListenAddr>, ConfigError> {
        self.server
            .listeners
            .iter()
            .map(|a| {
                a.parse::<ListenAddr>()
                    .map_err(|e| ConfigError::Invalid(format!("server.listeners: {}", e)))
            })
            .collect()
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.worker.read_timeout)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.worker.connect_timeout)
    }
}
