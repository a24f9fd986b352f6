// ── Broker session ──
//
// Connection state machine for one broker entry. A session owns the
// transport, the stored credentials, the busy flag that serializes admin
// calls, and the topology node a delayed reply should update. State is
// published through a watch channel so observers can follow it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use arc_swap::{ArcSwap, ArcSwapOption};
use mqadmin_api::{AdminOp, ReplyStatus, Request, Transport};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::EventBus;
use crate::config::{Credentials, SessionConfig};
use crate::error::ConnectError;
use crate::model::{Event, EventKind, NodeId, SessionId};

// ── SessionState ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
}

// ── Session ──────────────────────────────────────────────────────

pub struct Session {
    id: SessionId,
    config: ArcSwap<SessionConfig>,
    credentials: ArcSwap<Credentials>,
    transport: Arc<dyn Transport>,
    state: watch::Sender<SessionState>,
    busy: AtomicBool,
    associated: ArcSwapOption<NodeId>,
    bus: EventBus,
}

/// Holds the busy flag for the duration of one admin call.
pub(crate) struct BusyGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

impl Session {
    pub fn new(
        id: SessionId,
        config: SessionConfig,
        transport: Arc<dyn Transport>,
        bus: EventBus,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Disconnected);
        Self {
            id,
            credentials: ArcSwap::from_pointee(config.credentials.clone()),
            config: ArcSwap::from_pointee(config),
            transport,
            state,
            busy: AtomicBool::new(false),
            associated: ArcSwapOption::empty(),
            bus,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn key(&self) -> String {
        self.config.load().key.clone()
    }

    /// Configuration with the currently stored credentials.
    pub fn config(&self) -> SessionConfig {
        let mut config = SessionConfig::clone(&self.config.load());
        config.credentials = Credentials::clone(&self.credentials.load());
        config
    }

    /// Replace the whole broker entry, login included. Only the controller
    /// calls this, and only while disconnected.
    pub(crate) fn set_config(&self, config: SessionConfig) {
        self.credentials.store(Arc::new(config.credentials.clone()));
        self.config.store(Arc::new(config));
    }

    pub fn credentials(&self) -> Arc<Credentials> {
        self.credentials.load_full()
    }

    /// Replace the stored login used by later connects.
    pub fn set_credentials(&self, credentials: Credentials) {
        self.credentials.store(Arc::new(credentials));
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// True while an admin call is between send and resolved reply.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub(crate) fn reply_timeout(&self) -> Duration {
        self.config.load().timeout
    }

    // ── Connection lifecycle ─────────────────────────────────────

    /// Open the transport and perform the hello handshake.
    ///
    /// `credentials` overrides the stored login for this attempt only.
    pub async fn connect(&self, credentials: Option<&Credentials>) -> Result<(), ConnectError> {
        let claimed = self.state.send_if_modified(|state| {
            if *state == SessionState::Disconnected {
                *state = SessionState::Connecting;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Err(ConnectError::AlreadyConnected);
        }

        let stored = self.credentials.load_full();
        let credentials = credentials.unwrap_or(stored.as_ref());
        info!(
            session = %self.id,
            broker = %self.config.load().address(),
            user = %credentials.username,
            "connecting"
        );

        let result = self.attempt(credentials).await;
        self.finish_connect(&result);
        result
    }

    /// Close the session. Refused while a command is outstanding.
    pub async fn disconnect(&self) -> Result<(), ConnectError> {
        if self.is_busy() {
            return Err(ConnectError::Busy);
        }
        if self.state() == SessionState::Disconnected {
            return Ok(());
        }
        self.close_transport().await;
        self.settle_disconnected(EventKind::Disconnected);
        Ok(())
    }

    /// Close regardless of outstanding commands.
    pub async fn force_close(&self) {
        self.close_transport().await;
        if self.state() != SessionState::Disconnected {
            self.settle_disconnected(EventKind::Disconnected);
        }
    }

    /// Try to connect up to `retries` times, sleeping `delay` between
    /// consecutive failures. Credential failures end the loop at once.
    /// Cancellation and `deadline` both surface as `ReconnectExhausted`.
    pub async fn reconnect(
        &self,
        credentials: Option<&Credentials>,
        retries: u32,
        delay: Duration,
        cancel: &CancellationToken,
        deadline: Option<Instant>,
    ) -> Result<(), ConnectError> {
        if self.state() != SessionState::Disconnected {
            return Err(ConnectError::AlreadyConnected);
        }
        let stored = self.credentials.load_full();
        let credentials = credentials.unwrap_or(stored.as_ref());
        info!(session = %self.id, retries, delay_ms = delay.as_millis(), "reconnecting");

        let attempts = AtomicU32::new(0);
        let exhausted = || ConnectError::ReconnectExhausted {
            attempts: attempts.load(Ordering::Relaxed),
        };
        let attempt_loop = self.reconnect_loop(credentials, retries, delay, &attempts);
        let bounded = async {
            match deadline {
                Some(at) => tokio::time::timeout_at(at, attempt_loop)
                    .await
                    .unwrap_or_else(|_| Err(exhausted())),
                None => attempt_loop.await,
            }
        };

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(exhausted()),
            result = bounded => result,
        };

        if result.is_err() && self.transport.is_open() {
            self.close_transport().await;
        }
        self.finish_connect(&result);
        result
    }

    async fn reconnect_loop(
        &self,
        credentials: &Credentials,
        retries: u32,
        delay: Duration,
        attempts: &AtomicU32,
    ) -> Result<(), ConnectError> {
        for attempt in 1..=retries {
            attempts.store(attempt, Ordering::Relaxed);
            self.state.send_replace(SessionState::Reconnecting { attempt });

            match self.attempt(credentials).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_auth() => return Err(e),
                Err(e) => {
                    debug!(session = %self.id, attempt, max = retries, error = %e, "reconnect attempt failed");
                    self.publish(EventKind::ReconnectProgress {
                        attempt,
                        max: retries,
                    });
                    if attempt < retries {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
        Err(ConnectError::ReconnectExhausted { attempts: retries })
    }

    /// Record the node a pending or delayed reply should update. Ignored
    /// while a command is in flight.
    pub fn mark_associated(&self, node: NodeId) -> bool {
        if self.is_busy() {
            debug!(session = %self.id, node = %node, "busy, association unchanged");
            return false;
        }
        self.associated.store(Some(Arc::new(node)));
        true
    }

    pub fn associated(&self) -> Option<NodeId> {
        self.associated.load_full().map(|node| *node)
    }

    // ── Crate internals ──────────────────────────────────────────

    /// Claim the busy flag, or `None` if another call holds it.
    pub(crate) fn begin_command(&self) -> Option<BusyGuard<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| BusyGuard { flag: &self.busy })
    }

    /// The transport reported closure mid-call.
    pub(crate) fn mark_lost(&self, reason: &str) {
        if self.state() != SessionState::Disconnected {
            warn!(session = %self.id, reason, "connection lost");
            self.settle_disconnected(EventKind::ConnectionLost {
                reason: reason.to_owned(),
            });
        }
    }

    fn publish(&self, kind: EventKind) {
        self.bus.publish(Event::from_session(self.id, kind));
    }

    async fn attempt(&self, credentials: &Credentials) -> Result<(), ConnectError> {
        let result = self.handshake(credentials).await;
        if result.is_err() {
            self.close_transport().await;
        }
        result
    }

    async fn handshake(&self, credentials: &Credentials) -> Result<(), ConnectError> {
        self.transport
            .open(&credentials.username, &credentials.password)
            .await?;

        let hello = Request::new(AdminOp::Hello, Value::Null);
        let correlation_id = hello.correlation_id;
        self.transport.send(hello).await?;
        debug!(session = %self.id, id = %correlation_id, "hello sent");

        let timeout = self.reply_timeout();
        let deadline = Instant::now() + timeout;
        loop {
            let window = deadline.saturating_duration_since(Instant::now());
            let Some(reply) = self.transport.receive(window).await? else {
                return Err(ConnectError::TransportError {
                    reason: format!(
                        "no reply to hello within {} ms",
                        timeout.as_millis()
                    ),
                });
            };
            if reply.correlation_id != correlation_id {
                debug!(session = %self.id, id = %reply.correlation_id, "discarding stale reply");
                continue;
            }
            return match reply.status {
                ReplyStatus::Ok => Ok(()),
                ReplyStatus::Error { code: 401 } => Err(ConnectError::InvalidCredentials),
                ReplyStatus::Error { code: 403 } => Err(ConnectError::Forbidden),
                ReplyStatus::Error { code } => Err(ConnectError::TransportError {
                    reason: reply
                        .error
                        .unwrap_or_else(|| format!("hello rejected with code {code}")),
                }),
                ReplyStatus::Busy => Err(ConnectError::TransportError {
                    reason: "broker too busy to accept the connection".into(),
                }),
            };
        }
    }

    fn finish_connect(&self, result: &Result<(), ConnectError>) {
        match result {
            Ok(()) => {
                self.state.send_replace(SessionState::Connected);
                info!(session = %self.id, broker = %self.config.load().address(), "connected");
                self.publish(EventKind::ConnectSucceeded);
            }
            Err(e) => {
                self.state.send_replace(SessionState::Disconnected);
                warn!(session = %self.id, error = %e, "connect failed");
                self.publish(EventKind::ConnectFailed { reason: e.info() });
            }
        }
    }

    async fn close_transport(&self) {
        if let Err(e) = self.transport.close().await {
            debug!(session = %self.id, error = %e, "transport close failed");
        }
    }

    fn settle_disconnected(&self, kind: EventKind) {
        self.state.send_replace(SessionState::Disconnected);
        self.associated.store(None);
        info!(session = %self.id, "disconnected");
        self.publish(kind);
    }
}
