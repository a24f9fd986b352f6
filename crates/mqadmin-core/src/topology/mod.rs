// ── Topology model ──
//
// In-memory mirror of the broker hierarchy: broker roots, their service
// and destination lists, and durable subscriptions below topics. Nodes
// live in an arena addressed by `NodeId`; the controller's owner task is
// the only writer and publishes immutable snapshots.

pub mod actions;
pub mod filter;
mod node;
mod tree;

pub use actions::{Action, ActionSet, active_actions_for};
pub use filter::is_listed;
pub use node::{BrokerNode, NodeData, NodeKind, NodeView, TopologyNode};
pub use tree::TopologyTree;
