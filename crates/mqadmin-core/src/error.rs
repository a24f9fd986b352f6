// ── Core error types ──
//
// User-facing errors from mqadmin-core. Consumers never see transport
// internals directly: the `From<mqadmin_api::Error>` impls translate them
// into connect and command variants. Every error can be flattened into an
// `ErrorInfo`, which is what events carry.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{NodeId, SessionId};
use crate::topology::NodeKind;

// ── Connect errors ───────────────────────────────────────────────────

/// Failures of the session state machine.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectError {
    #[error("Invalid user name or password")]
    InvalidCredentials,

    #[error("User is not authorized to administer this broker")]
    Forbidden,

    #[error("Cannot connect to broker: {reason}")]
    TransportError { reason: String },

    #[error("Broker did not come back after {attempts} reconnect attempt(s)")]
    ReconnectExhausted { attempts: u32 },

    #[error("A command is still waiting for a reply from the broker")]
    Busy,

    #[error("Session is already connected")]
    AlreadyConnected,
}

impl From<mqadmin_api::Error> for ConnectError {
    fn from(err: mqadmin_api::Error) -> Self {
        match err {
            mqadmin_api::Error::InvalidLogin => Self::InvalidCredentials,
            mqadmin_api::Error::Forbidden => Self::Forbidden,
            other => Self::TransportError {
                reason: other.to_string(),
            },
        }
    }
}

impl ConnectError {
    /// Credential problems are not fixed by trying again.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::InvalidCredentials | Self::Forbidden)
    }
}

// ── Command errors ───────────────────────────────────────────────────

/// Failures of a single correlated admin call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("Busy waiting for a reply to a previous command")]
    SessionBusy,

    #[error("Not connected to the broker")]
    NotConnected,

    #[error("Broker not responding, gave up after {attempts} attempt(s)")]
    NoReplyGiveUp { attempts: u32 },

    #[error("Reply not received within {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    #[error("Problem processing the broker's reply: {message}")]
    ProtocolError { message: String },

    #[error("Broker rejected the request (code {code}): {message}")]
    Rejected { code: u16, message: String },

    #[error("Connection to the broker was lost: {reason}")]
    ConnectionLost { reason: String },

    #[error("Failed to exchange messages with the broker: {reason}")]
    Transport { reason: String },
}

impl From<mqadmin_api::Error> for CommandError {
    fn from(err: mqadmin_api::Error) -> Self {
        match err {
            mqadmin_api::Error::Closed { reason } => Self::ConnectionLost { reason },
            mqadmin_api::Error::NotOpen => Self::NotConnected,
            mqadmin_api::Error::Malformed(message) => Self::ProtocolError { message },
            other => Self::Transport {
                reason: other.to_string(),
            },
        }
    }
}

impl CommandError {
    /// The broker simply did not answer in time.
    pub fn is_no_reply(&self) -> bool {
        matches!(self, Self::NoReplyGiveUp { .. } | Self::Timeout { .. })
    }
}

// ── Topology errors ──────────────────────────────────────────────────

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TopologyError {
    #[error("Topology node not found: {0}")]
    UnknownNode(NodeId),

    #[error("A {child} node cannot be placed under a {parent} node")]
    InvalidChild { parent: NodeKind, child: NodeKind },
}

// ── Broker list errors ───────────────────────────────────────────────

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BrokerListError {
    #[error("Broker list version {found} is newer than supported version {current}")]
    UnsupportedVersion { found: String, current: String },

    #[error("Broker list version {found} is older than the first supported version {first}")]
    VersionTooOld { found: String, first: String },

    #[error("Broker list version is not a number: {value}")]
    BadVersion { value: String },

    #[error("Broker entry {index} has an invalid port: {value}")]
    InvalidPort { index: usize, value: String },
}

// ── Controller surface ───────────────────────────────────────────────

/// Unified error type for the controller surface.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("Unknown broker session: {0}")]
    UnknownSession(SessionId),

    #[error("Node not found: {identifier}")]
    NodeNotFound { identifier: String },

    #[error("Command queue for {session} is full")]
    QueueFull { session: SessionId },

    #[error("Controller has stopped")]
    ControllerStopped,

    #[error("Missing credentials for broker {key}")]
    MissingCredentials { key: String },

    #[error("A broker named '{key}' already exists")]
    BrokerExists { key: String },

    #[error("Invalid broker {field}: '{value}'")]
    InvalidBrokerEntry { field: &'static str, value: String },

    #[error("Broker session {0} must be disconnected first")]
    SessionActive(SessionId),

    #[error(transparent)]
    BrokerList(#[from] BrokerListError),

    #[error(transparent)]
    Topology(#[from] TopologyError),
}

// ── Serializable error summary ───────────────────────────────────────

/// Closed set of error kinds carried by events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidCredentials,
    Forbidden,
    TransportError,
    ReconnectExhausted,
    AlreadyConnected,
    SessionBusy,
    NotConnected,
    NoReplyGiveUp,
    Timeout,
    ProtocolError,
    Rejected,
    ConnectionLost,
    UnknownSession,
    NodeNotFound,
    QueueFull,
    ControllerStopped,
    MissingCredentials,
    BrokerExists,
    InvalidBrokerEntry,
    SessionActive,
    BrokerList,
    Topology,
}

/// Kind plus the user-facing message of an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl ConnectError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidCredentials => ErrorKind::InvalidCredentials,
            Self::Forbidden => ErrorKind::Forbidden,
            Self::TransportError { .. } => ErrorKind::TransportError,
            Self::ReconnectExhausted { .. } => ErrorKind::ReconnectExhausted,
            Self::Busy => ErrorKind::SessionBusy,
            Self::AlreadyConnected => ErrorKind::AlreadyConnected,
        }
    }

    pub fn info(&self) -> ErrorInfo {
        ErrorInfo::new(self.kind(), self.to_string())
    }
}

impl CommandError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::SessionBusy => ErrorKind::SessionBusy,
            Self::NotConnected => ErrorKind::NotConnected,
            Self::NoReplyGiveUp { .. } => ErrorKind::NoReplyGiveUp,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::ProtocolError { .. } => ErrorKind::ProtocolError,
            Self::Rejected { .. } => ErrorKind::Rejected,
            Self::ConnectionLost { .. } => ErrorKind::ConnectionLost,
            Self::Transport { .. } => ErrorKind::TransportError,
        }
    }

    pub fn info(&self) -> ErrorInfo {
        ErrorInfo::new(self.kind(), self.to_string())
    }
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connect(e) => e.kind(),
            Self::Command(e) => e.kind(),
            Self::UnknownSession(_) => ErrorKind::UnknownSession,
            Self::NodeNotFound { .. } => ErrorKind::NodeNotFound,
            Self::QueueFull { .. } => ErrorKind::QueueFull,
            Self::ControllerStopped => ErrorKind::ControllerStopped,
            Self::MissingCredentials { .. } => ErrorKind::MissingCredentials,
            Self::BrokerExists { .. } => ErrorKind::BrokerExists,
            Self::InvalidBrokerEntry { .. } => ErrorKind::InvalidBrokerEntry,
            Self::SessionActive(_) => ErrorKind::SessionActive,
            Self::BrokerList(_) => ErrorKind::BrokerList,
            Self::Topology(_) => ErrorKind::Topology,
        }
    }

    pub fn info(&self) -> ErrorInfo {
        ErrorInfo::new(self.kind(), self.to_string())
    }
}
