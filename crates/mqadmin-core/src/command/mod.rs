// ── Command API ──
//
// Every user action on a broker flows through a `Command` wrapped in an
// `Intent`. The controller queues intents on the owning session's worker,
// which runs the admin calls; the topology owner applies the outcome and
// resolves the caller's `IntentHandle`.

pub mod requests;

use mqadmin_api::AdminOp;
use tokio::sync::oneshot;

use crate::config::Credentials;
use crate::error::CoreError;
use crate::model::{BrokerProps, DestType, DestinationInfo, IntentId, NodeId, PauseKind, SessionId};

/// A queued intent with the channel its outcome is reported on.
pub(crate) struct CommandEnvelope {
    pub id: IntentId,
    pub command: Command,
    pub response_tx: oneshot::Sender<Result<IntentOutcome, CoreError>>,
}

/// A command addressed to one broker session.
#[derive(Debug, Clone)]
pub struct Intent {
    pub session: SessionId,
    pub command: Command,
}

impl Intent {
    pub fn new(session: SessionId, command: Command) -> Self {
        Self { session, command }
    }
}

/// Every administrative action the console can take.
#[derive(Debug, Clone)]
pub enum Command {
    // ── Connection ───────────────────────────────────────────────────
    /// `credentials` overrides the stored login for this attempt only.
    Connect {
        credentials: Option<Credentials>,
    },
    Disconnect,
    /// Shut the broker down with restart, then reconnect and repopulate.
    Restart {
        credentials: Option<Credentials>,
    },
    Shutdown,

    // ── Broker ───────────────────────────────────────────────────────
    QueryBroker,
    UpdateBroker {
        props: BrokerProps,
    },
    PauseBroker,
    ResumeBroker,

    // ── Services ─────────────────────────────────────────────────────
    PauseService {
        name: String,
    },
    ResumeService {
        name: String,
    },
    UpdateService {
        name: String,
        props: BrokerProps,
    },

    // ── Destinations ─────────────────────────────────────────────────
    CreateDestination {
        info: DestinationInfo,
    },
    DestroyDestination {
        name: String,
        dest_type: DestType,
    },
    PauseDestination {
        name: String,
        dest_type: DestType,
        pause_kind: PauseKind,
    },
    ResumeDestination {
        name: String,
        dest_type: DestType,
    },
    PauseAllDestinations,
    ResumeAllDestinations,
    PurgeDestination {
        name: String,
        dest_type: DestType,
    },
    UpdateDestination {
        info: DestinationInfo,
    },

    // ── Durable subscriptions ────────────────────────────────────────
    DestroyDurable {
        name: String,
        client_id: Option<String>,
        topic: String,
    },
    PurgeDurable {
        name: String,
        client_id: Option<String>,
        topic: String,
    },

    // ── Queries ──────────────────────────────────────────────────────
    Refresh(RefreshTarget),
}

/// What a `Refresh` re-reads from the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshTarget {
    /// Broker properties, services and destinations.
    Broker,
    ServiceList,
    Service { name: String },
    DestinationList,
    /// The destination and its durable subscriptions.
    Destination { name: String, dest_type: DestType },
}

impl Command {
    /// Primary admin operation behind this command. Connection commands
    /// have none of their own.
    pub fn op(&self) -> Option<AdminOp> {
        let op = match self {
            Self::Connect { .. } | Self::Disconnect => return None,
            Self::Restart { .. } | Self::Shutdown => AdminOp::Shutdown,
            Self::QueryBroker | Self::Refresh(RefreshTarget::Broker) => AdminOp::GetBrokerProps,
            Self::UpdateBroker { .. } => AdminOp::UpdateBroker,
            Self::PauseBroker => AdminOp::PauseBroker,
            Self::ResumeBroker => AdminOp::ResumeBroker,
            Self::PauseService { .. } => AdminOp::PauseService,
            Self::ResumeService { .. } => AdminOp::ResumeService,
            Self::UpdateService { .. } => AdminOp::UpdateService,
            Self::CreateDestination { .. } => AdminOp::CreateDestination,
            Self::DestroyDestination { .. } => AdminOp::DestroyDestination,
            Self::PauseDestination { .. } | Self::PauseAllDestinations => AdminOp::PauseDestination,
            Self::ResumeDestination { .. } | Self::ResumeAllDestinations => {
                AdminOp::ResumeDestination
            }
            Self::PurgeDestination { .. } => AdminOp::PurgeDestination,
            Self::UpdateDestination { .. } => AdminOp::UpdateDestination,
            Self::DestroyDurable { .. } => AdminOp::DestroyDurable,
            Self::PurgeDurable { .. } => AdminOp::PurgeDurable,
            Self::Refresh(RefreshTarget::ServiceList | RefreshTarget::Service { .. }) => {
                AdminOp::GetServices
            }
            Self::Refresh(
                RefreshTarget::DestinationList | RefreshTarget::Destination { .. },
            ) => AdminOp::GetDestinations,
        };
        Some(op)
    }

    /// Connection commands report through session events instead of
    /// `CommandSucceeded` / `CommandFailed`.
    pub(crate) fn is_connection(&self) -> bool {
        matches!(self, Self::Connect { .. } | Self::Disconnect)
    }
}

/// Result of an applied intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntentOutcome {
    pub intent: IntentId,
    pub session: SessionId,
    /// Node whose subtree the outcome changed.
    pub node: NodeId,
    /// A query went unanswered and `node` was marked stale instead of
    /// refreshed.
    pub stale: bool,
}

/// Resolves once the topology owner has applied the intent's outcome.
#[derive(Debug)]
pub struct IntentHandle {
    id: IntentId,
    session: SessionId,
    rx: oneshot::Receiver<Result<IntentOutcome, CoreError>>,
}

impl IntentHandle {
    pub(crate) fn new(
        id: IntentId,
        session: SessionId,
        rx: oneshot::Receiver<Result<IntentOutcome, CoreError>>,
    ) -> Self {
        Self { id, session, rx }
    }

    pub fn id(&self) -> IntentId {
        self.id
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub async fn wait(self) -> Result<IntentOutcome, CoreError> {
        self.rx.await.map_err(|_| CoreError::ControllerStopped)?
    }
}
