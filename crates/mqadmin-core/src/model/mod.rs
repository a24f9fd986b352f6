// ── Admin domain model ──
//
// Value types mirrored from the broker: services, destinations and durable
// subscriptions as reported by admin queries, plus the identifiers and
// events the rest of the crate passes around.

pub mod destination;
pub mod durable;
pub mod event;
pub mod ids;
pub mod service;

// ── Re-exports ──────────────────────────────────────────────────────

pub use destination::{DestState, DestType, DestinationInfo, PauseKind};
pub use durable::DurableInfo;
pub use event::{Event, EventKind};
pub use ids::{IntentId, NodeId, SessionId};
pub use service::{ServiceInfo, ServiceKind, ServiceState};

/// Broker properties as returned by a broker query.
pub type BrokerProps = std::collections::BTreeMap<String, String>;
