// ── Admin payloads ──
//
// Typed request bodies carried in `Request::payload`. Replies to the
// list queries decode into `Vec<ServiceInfo>`, `Vec<DestinationInfo>`,
// `Vec<DurableInfo>` or `BrokerProps`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::{DestType, PauseKind};

/// `GetServices`: all services, or the one named.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// `PauseService` / `ResumeService`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRef {
    pub name: String,
}

/// `UpdateService`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceUpdate {
    pub name: String,
    pub props: BTreeMap<String, String>,
}

/// `GetDestinations` and `ResumeDestination`: all destinations, or the
/// one named.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest_type: Option<DestType>,
}

impl DestinationQuery {
    pub fn one(name: impl Into<String>, dest_type: DestType) -> Self {
        Self {
            name: Some(name.into()),
            dest_type: Some(dest_type),
        }
    }

    pub fn matches(&self, name: &str, dest_type: DestType) -> bool {
        self.name.as_deref().is_none_or(|n| n == name)
            && self.dest_type.is_none_or(|t| t == dest_type)
    }
}

/// `DestroyDestination` / `PurgeDestination`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationRef {
    pub name: String,
    pub dest_type: DestType,
}

/// `PauseDestination`: one destination, or all of them when `target`
/// leaves the name unset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationPause {
    #[serde(flatten)]
    pub target: DestinationQuery,
    #[serde(default)]
    pub pause_kind: PauseKind,
}

/// `GetDurables`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurableQuery {
    pub dest_name: String,
}

/// `DestroyDurable` / `PurgeDurable`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurableRef {
    pub name: String,
    #[serde(default)]
    pub client_id: Option<String>,
}

/// `Shutdown`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownRequest {
    #[serde(default)]
    pub restart: bool,
}

/// `UpdateBroker`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerUpdate {
    pub props: BTreeMap<String, String>,
}
