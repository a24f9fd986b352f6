// ── Runtime session configuration ──
//
// These types describe *how* to talk to a broker: address, credentials,
// reply timeouts and retry behaviour. They never touch disk; the config
// crate or an embedding application builds them and hands them in.

use std::collections::BTreeMap;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 7676;
pub const DEFAULT_ADMIN_USER: &str = "admin";

/// Broker attribute holding the host name in a saved broker list.
pub const ATTR_HOST: &str = "imqBrokerHostName";
/// Broker attribute holding the port in a saved broker list.
pub const ATTR_PORT: &str = "imqBrokerHostPort";

/// Admin login for one broker.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::from(password.into()),
        }
    }

    /// Both a user name and a password are present.
    pub fn is_complete(&self) -> bool {
        !self.username.is_empty() && !self.password.expose_secret().is_empty()
    }
}

impl Default for Credentials {
    fn default() -> Self {
        Self::new(DEFAULT_ADMIN_USER, "")
    }
}

/// Busy-retry behaviour for a single admin call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per call, including the first one.
    pub max_retries: u32,
    /// Receive window for every attempt after the first. A request the
    /// broker answered with `Busy` is resent at once and then waited on
    /// for this long; an unanswered one is waited on again without a
    /// resend.
    pub retry_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_timeout: Duration::from_secs(10),
        }
    }
}

/// Reconnect behaviour used by the restart flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    pub max_retries: u32,
    /// Pause between consecutive failed attempts.
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 5,
            delay: Duration::from_secs(5),
        }
    }
}

impl ReconnectPolicy {
    /// Attempts the restart flow should make. A disabled policy still
    /// tries once.
    pub fn attempts(&self) -> u32 {
        if self.enabled { self.max_retries } else { 1 }
    }
}

/// Configuration for one broker entry.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Display name of the broker entry.
    pub key: String,
    pub host: String,
    pub port: u16,
    pub credentials: Credentials,
    /// Extra broker attributes carried through the saved broker list.
    pub attrs: BTreeMap<String, String>,
    /// Receive window for the first attempt of each call.
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub reconnect: ReconnectPolicy,
}

impl SessionConfig {
    pub fn new(key: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            key: key.into(),
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// `host:port` address of the broker.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            key: String::new(),
            host: DEFAULT_HOST.into(),
            port: DEFAULT_PORT,
            credentials: Credentials::default(),
            attrs: BTreeMap::new(),
            timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Controller-wide settings.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Intents a session worker accepts before `submit` reports
    /// `QueueFull` (one in flight plus backlog).
    pub queue_capacity: usize,
    /// Upper bound on one admin call including all retries. `None` leaves
    /// calls bounded by the retry policy alone.
    pub command_deadline: Option<Duration>,
    /// Upper bound on the reconnect loop of a restart.
    pub reconnect_deadline: Option<Duration>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 4,
            command_deadline: Some(Duration::from_secs(120)),
            reconnect_deadline: None,
        }
    }
}
