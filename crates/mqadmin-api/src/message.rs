// Admin request/reply envelopes.
//
// Every administrative exchange is one `Request` answered by one `Reply`
// carrying the same correlation id. Payloads are opaque JSON values; the
// typed shapes live in `mqadmin-core`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Administrative operation codes understood by the broker's admin service.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AdminOp {
    Hello,
    GetBrokerProps,
    UpdateBroker,
    PauseBroker,
    ResumeBroker,
    Shutdown,
    GetServices,
    PauseService,
    ResumeService,
    UpdateService,
    GetDestinations,
    CreateDestination,
    DestroyDestination,
    PauseDestination,
    ResumeDestination,
    PurgeDestination,
    UpdateDestination,
    GetDurables,
    DestroyDurable,
    PurgeDurable,
}

impl AdminOp {
    /// Read-only operations. A missed reply to one of these degrades the
    /// affected view instead of failing the user action.
    pub fn is_query(self) -> bool {
        matches!(
            self,
            Self::GetBrokerProps | Self::GetServices | Self::GetDestinations | Self::GetDurables
        )
    }

    /// Whether the broker is allowed to go away without answering.
    pub fn reply_optional(self) -> bool {
        matches!(self, Self::Shutdown)
    }
}

/// Outgoing admin request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub correlation_id: Uuid,
    pub op: AdminOp,
    #[serde(default)]
    pub payload: Value,
}

impl Request {
    /// Build a request with a freshly allocated correlation id.
    pub fn new(op: AdminOp, payload: Value) -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            op,
            payload,
        }
    }
}

/// Broker-side outcome attached to every reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReplyStatus {
    Ok,
    /// The broker is busy; the request should be retried later.
    Busy,
    Error { code: u16 },
}

/// Incoming admin reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub correlation_id: Uuid,
    pub op: AdminOp,
    pub status: ReplyStatus,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub error: Option<String>,
}

impl Reply {
    pub fn ok(request: &Request, payload: Value) -> Self {
        Self {
            correlation_id: request.correlation_id,
            op: request.op,
            status: ReplyStatus::Ok,
            payload,
            error: None,
        }
    }

    pub fn busy(request: &Request) -> Self {
        Self {
            correlation_id: request.correlation_id,
            op: request.op,
            status: ReplyStatus::Busy,
            payload: Value::Null,
            error: None,
        }
    }

    pub fn error(request: &Request, code: u16, message: impl Into<String>) -> Self {
        Self {
            correlation_id: request.correlation_id,
            op: request.op,
            status: ReplyStatus::Error { code },
            payload: Value::Null,
            error: Some(message.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == ReplyStatus::Ok
    }
}
