//! Shared configuration for mqadmin front ends.
//!
//! TOML defaults layered with `MQADMIN_` environment overrides, the
//! broker-list properties file, password resolution (stored, env,
//! keyring) and tracing setup. Translates everything into
//! `mqadmin_core` config types; the core itself never touches files.

pub mod credentials;
pub mod logging;
pub mod properties;

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use mqadmin_core::config::DEFAULT_ADMIN_USER;
use mqadmin_core::{
    BrokerListError, ControllerConfig, Credentials, ReconnectPolicy, RetryPolicy, SessionConfig,
};

pub use credentials::{resolve_credentials, resolve_password, store_password};
pub use logging::init_tracing;
pub use properties::{
    load_broker_list_file, parse_properties, render_properties, save_broker_list_file,
};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no password available for broker '{broker}'")]
    NoCredentials { broker: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("broker list {path}: {source}")]
    BrokerList {
        path: PathBuf,
        source: BrokerListError,
    },

    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("logging setup failed: {0}")]
    Logging(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    /// Defaults applied to every broker entry and the controller.
    #[serde(default)]
    pub defaults: Defaults,

    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Defaults {
    /// Admin username for new broker entries.
    #[serde(default = "default_username")]
    pub username: String,

    /// Reply timeout in seconds for each receive window.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Attempts per admin call while the broker stays busy or silent.
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Receive window in seconds after a busy or silent attempt.
    #[serde(default = "default_timeout")]
    pub retry_timeout: u64,

    #[serde(default = "default_true")]
    pub reconnect: bool,

    #[serde(default = "default_retries")]
    pub reconnect_retries: u32,

    /// Seconds between reconnect attempts.
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay: u64,

    /// Intents a broker accepts at once, counting the one in flight.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Upper bound in seconds on one admin call with all its retries.
    #[serde(default = "default_command_deadline")]
    pub command_deadline: Option<u64>,

    /// Upper bound in seconds on the reconnect loop of a restart.
    #[serde(default)]
    pub reconnect_deadline: Option<u64>,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            username: default_username(),
            timeout: default_timeout(),
            retries: default_retries(),
            retry_timeout: default_timeout(),
            reconnect: true,
            reconnect_retries: default_retries(),
            reconnect_delay: default_reconnect_delay(),
            queue_capacity: default_queue_capacity(),
            command_deadline: default_command_deadline(),
            reconnect_deadline: None,
        }
    }
}

fn default_username() -> String {
    DEFAULT_ADMIN_USER.into()
}
fn default_timeout() -> u64 {
    10
}
fn default_retries() -> u32 {
    5
}
fn default_reconnect_delay() -> u64 {
    5
}
fn default_queue_capacity() -> usize {
    4
}
#[allow(clippy::unnecessary_wraps)]
fn default_command_deadline() -> Option<u64> {
    Some(120)
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LogConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_level")]
    pub level: String,

    /// Write logs to this file instead of stderr.
    #[serde(default)]
    pub file: Option<PathBuf>,

    /// One JSON object per line.
    #[serde(default)]
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            file: None,
            json: false,
        }
    }
}

fn default_level() -> String {
    "info".into()
}

impl Defaults {
    /// Reject values the controller cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &str, reason: &str| ConfigError::Validation {
            field: format!("defaults.{field}"),
            reason: reason.into(),
        };
        if self.queue_capacity == 0 {
            return Err(invalid("queue_capacity", "must be at least 1"));
        }
        if self.retries == 0 {
            return Err(invalid("retries", "must be at least 1"));
        }
        if self.timeout == 0 {
            return Err(invalid("timeout", "must be at least 1 second"));
        }
        if self.username.trim().is_empty() {
            return Err(invalid("username", "must not be empty"));
        }
        Ok(())
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            queue_capacity: self.queue_capacity.max(1),
            command_deadline: self.command_deadline.map(Duration::from_secs),
            reconnect_deadline: self.reconnect_deadline.map(Duration::from_secs),
        }
    }

    /// A new broker entry with these defaults.
    pub fn session_config(
        &self,
        key: impl Into<String>,
        host: impl Into<String>,
        port: u16,
    ) -> SessionConfig {
        let mut config = SessionConfig::new(key, host, port)
            .with_credentials(Credentials::new(self.username.clone(), String::new()));
        config.timeout = Duration::from_secs(self.timeout);
        self.apply_policies(&mut config);
        config
    }

    /// Retry and reconnect policies are not part of the broker list; they
    /// always come from here.
    pub fn apply_policies(&self, config: &mut SessionConfig) {
        config.retry = RetryPolicy {
            max_retries: self.retries.max(1),
            retry_timeout: Duration::from_secs(self.retry_timeout),
        };
        config.reconnect = ReconnectPolicy {
            enabled: self.reconnect,
            max_retries: self.reconnect_retries.max(1),
            delay: Duration::from_secs(self.reconnect_delay),
        };
    }
}

// ── Paths ───────────────────────────────────────────────────────────

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "mqadmin", "mqadmin")
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("mqadmin");
    p
}

fn config_dir() -> PathBuf {
    project_dirs().map_or_else(dirs_fallback, |dirs| dirs.config_dir().to_path_buf())
}

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Where the console keeps its broker entries.
pub fn broker_list_path() -> PathBuf {
    config_dir().join("brokerlist.properties")
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Defaults, then `path` if it exists, then `MQADMIN_` variables
/// (`MQADMIN_DEFAULTS__TIMEOUT=30`, `MQADMIN_LOG__LEVEL=debug`).
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("MQADMIN_").split("__"));

    let config: Config = figment.extract()?;
    config.defaults.validate()?;
    Ok(config)
}

/// Load config, returning a default if loading fails.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write it to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(&config_path(), cfg)
}

pub fn save_config_to(path: &Path, cfg: &Config) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}
