// ── Controller ──
//
// Top-level orchestrator for a console managing many brokers. Owns one
// session per broker entry, a worker task per session that executes
// queued intents in order, and the topology owner task that applies
// their outcomes to the shared tree.

mod owner;
mod worker;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use mqadmin_api::Transport;
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use self::owner::{OwnerMsg, TopologyOwner};
use self::worker::SessionWorker;
use crate::bus::EventBus;
use crate::command::{CommandEnvelope, Intent, IntentHandle, IntentOutcome};
use crate::config::{ControllerConfig, Credentials, SessionConfig};
use crate::correlator::{Correlator, LateReply};
use crate::error::CoreError;
use crate::model::{IntentId, NodeId, SessionId};
use crate::session::{Session, SessionState};
use crate::topology::{BrokerNode, NodeView, TopologyTree};

// ── Controller ───────────────────────────────────────────────────

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<ControllerInner>`. All tree mutation
/// happens on the owner task; readers get immutable snapshots.
#[derive(Clone)]
pub struct Controller {
    inner: Arc<ControllerInner>,
}

struct SessionEntry {
    session: Arc<Session>,
    jobs: mpsc::Sender<CommandEnvelope>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owner task pieces, kept until the first broker is added.
struct PendingOwner {
    owner: TopologyOwner,
    inbox: mpsc::UnboundedReceiver<OwnerMsg>,
    late_rx: mpsc::UnboundedReceiver<LateReply>,
}

struct ControllerInner {
    config: ControllerConfig,
    bus: EventBus,
    tree: watch::Receiver<Arc<TopologyTree>>,
    owner_tx: mpsc::UnboundedSender<OwnerMsg>,
    late_tx: mpsc::UnboundedSender<LateReply>,
    sessions: DashMap<SessionId, SessionEntry>,
    next_session: AtomicU64,
    next_intent: AtomicU64,
    cancel: CancellationToken,
    /// Serializes entry changes so broker names stay unique.
    entries: Mutex<()>,
    pending_owner: Mutex<Option<PendingOwner>>,
    owner_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Controller {
    /// Create a controller with no brokers. Background tasks start with
    /// the first [`add_broker()`](Self::add_broker).
    pub fn new(config: ControllerConfig) -> Self {
        Self::with_bus(config, EventBus::new())
    }

    /// Create a controller publishing on an existing bus.
    pub fn with_bus(config: ControllerConfig, bus: EventBus) -> Self {
        let (owner, tree) = TopologyOwner::new(bus.clone());
        let (owner_tx, inbox) = mpsc::unbounded_channel();
        let (late_tx, late_rx) = mpsc::unbounded_channel();

        Self {
            inner: Arc::new(ControllerInner {
                config,
                bus,
                tree,
                owner_tx,
                late_tx,
                sessions: DashMap::new(),
                next_session: AtomicU64::new(1),
                next_intent: AtomicU64::new(1),
                cancel: CancellationToken::new(),
                entries: Mutex::new(()),
                pending_owner: Mutex::new(Some(PendingOwner {
                    owner,
                    inbox,
                    late_rx,
                })),
                owner_handle: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.inner.config
    }

    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    // ── Broker entries ───────────────────────────────────────────

    /// Register a broker entry. Creates its session, its subtree and its
    /// worker; the session starts disconnected. Broker names are unique.
    pub async fn add_broker(
        &self,
        config: SessionConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<SessionId, CoreError> {
        if self.inner.cancel.is_cancelled() {
            return Err(CoreError::ControllerStopped);
        }
        validate_entry(&config)?;
        let _entries = self.inner.entries.lock().await;
        self.check_unique(&config.key, None)?;
        self.ensure_owner().await;

        let id = SessionId::new(self.inner.next_session.fetch_add(1, Ordering::Relaxed));
        let broker = BrokerNode::new(id, &config.key, &config.host, config.port);
        let (respond, node_rx) = oneshot::channel();
        self.inner
            .owner_tx
            .send(OwnerMsg::AddBroker { broker, respond })
            .map_err(|_| CoreError::ControllerStopped)?;
        let node = node_rx.await.map_err(|_| CoreError::ControllerStopped)?;

        let key = config.key.clone();
        let correlator =
            Correlator::new(config.retry).with_late_replies(self.inner.late_tx.clone());
        let session = Arc::new(Session::new(id, config, transport, self.inner.bus.clone()));

        // One intent runs outside the channel; the rest wait in it.
        let backlog = self.inner.config.queue_capacity.saturating_sub(1).max(1);
        let (jobs, jobs_rx) = mpsc::channel(backlog);
        let cancel = self.inner.cancel.child_token();
        let worker = SessionWorker::new(
            Arc::clone(&session),
            correlator,
            jobs_rx,
            self.inner.owner_tx.clone(),
            self.inner.tree.clone(),
            self.inner.config.clone(),
            cancel.clone(),
        );
        let handle = tokio::spawn(worker.run());

        self.inner.sessions.insert(
            id,
            SessionEntry {
                session,
                jobs,
                cancel,
                handle,
            },
        );
        info!(session = %id, key = %key, node = %node, "broker added");
        Ok(id)
    }

    /// Close a broker's session and drop its subtree. Queued intents
    /// resolve with `ControllerStopped`.
    pub async fn remove_broker(&self, id: SessionId) -> Result<(), CoreError> {
        let (_, entry) = self
            .inner
            .sessions
            .remove(&id)
            .ok_or(CoreError::UnknownSession(id))?;
        Self::stop_entry(id, entry).await;

        let (respond, removed) = oneshot::channel();
        self.inner
            .owner_tx
            .send(OwnerMsg::RemoveBroker { session: id, respond })
            .map_err(|_| CoreError::ControllerStopped)?;
        if !removed.await.map_err(|_| CoreError::ControllerStopped)? {
            warn!(session = %id, "broker had no subtree");
        }
        info!(session = %id, "broker removed");
        Ok(())
    }

    /// Current broker entries in the order they were added.
    pub fn broker_configs(&self) -> Vec<SessionConfig> {
        let mut entries: Vec<(SessionId, SessionConfig)> = self
            .inner
            .sessions
            .iter()
            .map(|entry| (*entry.key(), entry.session.config()))
            .collect();
        entries.sort_by_key(|(id, _)| *id);
        entries.into_iter().map(|(_, config)| config).collect()
    }

    pub fn sessions(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.inner.sessions.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    pub fn session(&self, id: SessionId) -> Option<Arc<Session>> {
        self.inner
            .sessions
            .get(&id)
            .map(|entry| Arc::clone(&entry.session))
    }

    /// Edit a broker entry's name, address, login and receive timeout.
    /// The session must be disconnected; the retry policy it was added
    /// with is kept. Nothing changes when the entry is rejected.
    pub async fn update_broker_entry(
        &self,
        id: SessionId,
        mut config: SessionConfig,
    ) -> Result<(), CoreError> {
        validate_entry(&config)?;
        let _entries = self.inner.entries.lock().await;
        let session = self.session(id).ok_or(CoreError::UnknownSession(id))?;
        if session.state() != SessionState::Disconnected {
            return Err(CoreError::SessionActive(id));
        }
        self.check_unique(&config.key, Some(id))?;

        let previous = session.config();
        config.retry = previous.retry;
        let (key, host, port) = (config.key.clone(), config.host.clone(), config.port);
        session.set_config(config);

        let (respond, updated) = oneshot::channel();
        self.inner
            .owner_tx
            .send(OwnerMsg::UpdateBroker {
                session: id,
                key: key.clone(),
                host,
                port,
                respond,
            })
            .map_err(|_| CoreError::ControllerStopped)?;
        if updated.await.map_err(|_| CoreError::ControllerStopped)?.is_none() {
            warn!(session = %id, "broker had no subtree");
        }
        info!(session = %id, old = %previous.key, key = %key, "broker entry updated");
        Ok(())
    }

    /// Replace the stored login of a broker entry.
    pub fn update_credentials(&self, id: SessionId, credentials: Credentials) -> Result<(), CoreError> {
        let entry = self
            .inner
            .sessions
            .get(&id)
            .ok_or(CoreError::UnknownSession(id))?;
        entry.session.set_credentials(credentials);
        Ok(())
    }

    // ── Intents ──────────────────────────────────────────────────

    /// Queue an intent on its session's worker. Never blocks: a full
    /// queue reports `QueueFull`.
    pub fn submit(&self, intent: Intent) -> Result<IntentHandle, CoreError> {
        if self.inner.cancel.is_cancelled() {
            return Err(CoreError::ControllerStopped);
        }
        let Intent { session, command } = intent;
        let entry = self
            .inner
            .sessions
            .get(&session)
            .ok_or(CoreError::UnknownSession(session))?;

        let id = IntentId::new(self.inner.next_intent.fetch_add(1, Ordering::Relaxed));
        let (response_tx, rx) = oneshot::channel();
        let envelope = CommandEnvelope {
            id,
            command,
            response_tx,
        };
        entry.jobs.try_send(envelope).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => CoreError::QueueFull { session },
            mpsc::error::TrySendError::Closed(_) => CoreError::ControllerStopped,
        })?;
        debug!(session = %session, intent = %id, "intent queued");
        Ok(IntentHandle::new(id, session, rx))
    }

    /// Submit and wait for the outcome.
    pub async fn execute(&self, intent: Intent) -> Result<IntentOutcome, CoreError> {
        self.submit(intent)?.wait().await
    }

    // ── Topology ─────────────────────────────────────────────────

    /// Latest published tree.
    pub fn tree(&self) -> Arc<TopologyTree> {
        Arc::clone(&self.inner.tree.borrow())
    }

    pub fn watch_tree(&self) -> watch::Receiver<Arc<TopologyTree>> {
        self.inner.tree.clone()
    }

    pub fn snapshot(&self, node: NodeId) -> Option<NodeView> {
        self.tree().snapshot(node)
    }

    pub fn broker_node(&self, id: SessionId) -> Option<NodeId> {
        self.tree().broker_root(id)
    }

    // ── Shutdown ─────────────────────────────────────────────────

    /// Stop every worker, close every session and stop the owner task.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();

        let ids: Vec<SessionId> = self.inner.sessions.iter().map(|e| *e.key()).collect();
        for id in ids {
            if let Some((_, entry)) = self.inner.sessions.remove(&id) {
                Self::stop_entry(id, entry).await;
            }
        }
        if let Some(handle) = self.inner.owner_handle.lock().await.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "topology owner ended abnormally");
            }
        }
        info!("controller shut down");
    }

    // ── Internals ────────────────────────────────────────────────

    async fn ensure_owner(&self) {
        let Some(pending) = self.inner.pending_owner.lock().await.take() else {
            return;
        };
        let PendingOwner {
            owner,
            inbox,
            late_rx,
        } = pending;
        let handle = tokio::spawn(owner.run(inbox, late_rx, self.inner.cancel.clone()));
        *self.inner.owner_handle.lock().await = Some(handle);
        debug!("topology owner started");
    }

    fn check_unique(&self, key: &str, except: Option<SessionId>) -> Result<(), CoreError> {
        let taken = self
            .inner
            .sessions
            .iter()
            .any(|entry| Some(*entry.key()) != except && entry.session.key() == key);
        if taken {
            return Err(CoreError::BrokerExists { key: key.to_owned() });
        }
        Ok(())
    }

    async fn stop_entry(id: SessionId, entry: SessionEntry) {
        entry.cancel.cancel();
        if let Err(e) = entry.handle.await {
            warn!(session = %id, error = %e, "session worker ended abnormally");
        }
        entry.session.force_close().await;
    }
}

fn validate_entry(config: &SessionConfig) -> Result<(), CoreError> {
    let invalid = |field, value: &str| CoreError::InvalidBrokerEntry {
        field,
        value: value.to_owned(),
    };
    if config.key.trim().is_empty() {
        return Err(invalid("name", &config.key));
    }
    let host = config.host.trim();
    if host.is_empty() || host.contains(char::is_whitespace) {
        return Err(invalid("host", &config.host));
    }
    if config.port == 0 {
        return Err(invalid("port", "0"));
    }
    Ok(())
}
