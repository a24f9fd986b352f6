// ── Admin events ──
//
// Everything observers learn about sessions, commands and the topology
// arrives as an `Event`. Events are immutable once published and are
// shared as `Arc<Event>`.

use std::time::Duration;

use chrono::{DateTime, Utc};
use mqadmin_api::AdminOp;
use serde::{Deserialize, Serialize};

use super::ids::{NodeId, SessionId};
use crate::error::ErrorInfo;
use crate::topology::ActionSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    // Session lifecycle
    ConnectSucceeded,
    ConnectFailed { reason: ErrorInfo },
    ReconnectProgress { attempt: u32, max: u32 },
    Disconnected,
    ConnectionLost { reason: String },

    // Commands
    CommandSucceeded { op: AdminOp },
    CommandFailed { op: AdminOp, error: ErrorInfo },
    /// The broker has not answered yet; `attempt` of `max` failed and the
    /// next one waits up to `timeout`.
    BrokerBusy {
        attempt: u32,
        max: u32,
        timeout: Duration,
    },

    // Topology
    /// `actions` lists the node and its ancestors, nearest first.
    TopologyChanged {
        node: NodeId,
        actions: Vec<(NodeId, ActionSet)>,
    },
    BrokerAdded { node: NodeId },
    BrokerRemoved,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    /// Session the event concerns, if any.
    pub source: Option<SessionId>,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(kind: EventKind, source: Option<SessionId>) -> Self {
        Self {
            kind,
            source,
            timestamp: Utc::now(),
        }
    }

    pub fn from_session(session: SessionId, kind: EventKind) -> Self {
        Self::new(kind, Some(session))
    }

    /// Failure events, logged at warn level by the tracing listener.
    pub fn is_failure(&self) -> bool {
        matches!(
            self.kind,
            EventKind::ConnectFailed { .. }
                | EventKind::ConnectionLost { .. }
                | EventKind::CommandFailed { .. }
        )
    }
}
