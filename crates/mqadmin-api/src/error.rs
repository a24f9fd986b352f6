use thiserror::Error;

/// Top-level error type for the `mqadmin-api` crate.
///
/// Covers every failure a transport can report: authentication during
/// `open`, connection setup, and send/receive on an open channel.
/// `mqadmin-core` maps these into connect and command errors.
#[derive(Debug, Clone, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// The broker rejected the user name or password.
    #[error("Invalid login")]
    InvalidLogin,

    /// The credentials are valid but lack administrative rights.
    #[error("Access to the admin service is forbidden")]
    Forbidden,

    // ── Connection ──────────────────────────────────────────────────
    /// The connection could not be established.
    #[error("Cannot connect to broker: {reason}")]
    Connect { reason: String },

    /// An operation was attempted before `open` succeeded.
    #[error("Transport is not open")]
    NotOpen,

    /// The channel was closed by the remote side.
    #[error("Connection closed: {reason}")]
    Closed { reason: String },

    // ── Messaging ───────────────────────────────────────────────────
    /// The request could not be handed to the broker.
    #[error("Failed to send request: {0}")]
    Send(String),

    /// Reading the next reply failed.
    #[error("Failed to receive reply: {0}")]
    Receive(String),

    /// A message arrived that does not form a valid envelope.
    #[error("Malformed message: {0}")]
    Malformed(String),
}

impl Error {
    /// Returns `true` if the broker refused the credentials.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::InvalidLogin | Self::Forbidden)
    }

    /// Returns `true` if the underlying channel is gone and the
    /// session can no longer be used.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed { .. })
    }
}
