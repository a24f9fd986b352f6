//! Broker administration core between `mqadmin-api` and console front ends.
//!
//! This crate owns the connection state, command routing and the in-memory
//! broker hierarchy for the admin console:
//!
//! - **[`Controller`]**: Central facade. [`add_broker()`](Controller::add_broker)
//!   registers a broker entry and spawns its session worker;
//!   [`submit()`](Controller::submit) queues an [`Intent`] and hands back an
//!   [`IntentHandle`] that resolves once the outcome is applied.
//!
//! - **[`Session`]**: Connection and authentication context for one broker:
//!   connect, disconnect, bounded reconnect and the busy flag that guards
//!   the single outstanding admin call.
//!
//! - **[`Correlator`]**: Request/reply matching with busy-retry, per-call
//!   deadlines and late-reply recovery for abandoned queries.
//!
//! - **[`EventBus`]**: Synchronous publish/subscribe of [`Event`]s with
//!   per-listener failure isolation.
//!
//! - **[`TopologyTree`]**: Arena of broker, service, destination and
//!   durable nodes, with the per-node [`ActionSet`] the console enables.
//!
//! - **Broker list** ([`broker_list`]): Flat key/value form of the
//!   configured broker entries.

pub mod broker_list;
pub mod bus;
pub mod command;
pub mod config;
pub mod controller;
pub mod correlator;
pub mod error;
pub mod model;
pub mod session;
pub mod topology;

// ── Primary re-exports ──────────────────────────────────────────────
pub use broker_list::{PropertyMap, load_broker_list, save_broker_list};
pub use bus::{ChannelListener, EventBus, EventListener, ListenerError, SubscriptionId, TracingListener};
pub use command::{Command, Intent, IntentHandle, IntentOutcome, RefreshTarget};
pub use config::{ControllerConfig, Credentials, ReconnectPolicy, RetryPolicy, SessionConfig};
pub use controller::Controller;
pub use correlator::{CallOptions, Correlator, LateReply};
pub use error::{
    BrokerListError, CommandError, ConnectError, CoreError, ErrorInfo, ErrorKind, TopologyError,
};
pub use session::{Session, SessionState};
pub use topology::{Action, ActionSet, NodeData, NodeKind, NodeView, TopologyTree};

// Re-export model types at the crate root for ergonomics.
pub use model::{
    BrokerProps, DestState, DestType, DestinationInfo, DurableInfo, Event, EventKind, IntentId,
    NodeId, PauseKind, ServiceInfo, ServiceKind, ServiceState, SessionId,
};
