use serde::Serialize;

use super::ActionSet;
use crate::model::{BrokerProps, DestinationInfo, DurableInfo, NodeId, ServiceInfo, SessionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    BrokerRoot,
    ServiceListRoot,
    Service,
    DestListRoot,
    Destination,
    DurableSub,
}

impl NodeKind {
    /// Whether a node of kind `child` may hang under this one.
    pub fn accepts(self, child: Self) -> bool {
        matches!(
            (self, child),
            (Self::BrokerRoot, Self::ServiceListRoot | Self::DestListRoot)
                | (Self::ServiceListRoot, Self::Service)
                | (Self::DestListRoot, Self::Destination)
                | (Self::Destination, Self::DurableSub)
        )
    }
}

/// Broker entry data held by a `BrokerRoot` node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BrokerNode {
    pub session: SessionId,
    pub key: String,
    pub host: String,
    pub port: u16,
    pub connected: bool,
    /// Last broker query result; empty until queried.
    pub props: BrokerProps,
}

impl BrokerNode {
    pub fn new(session: SessionId, key: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            session,
            key: key.into(),
            host: host.into(),
            port,
            connected: false,
            props: BrokerProps::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum NodeData {
    BrokerRoot(BrokerNode),
    ServiceListRoot,
    Service(ServiceInfo),
    DestListRoot,
    Destination(DestinationInfo),
    DurableSub(DurableInfo),
}

impl NodeData {
    pub fn kind(&self) -> NodeKind {
        match self {
            Self::BrokerRoot(_) => NodeKind::BrokerRoot,
            Self::ServiceListRoot => NodeKind::ServiceListRoot,
            Self::Service(_) => NodeKind::Service,
            Self::DestListRoot => NodeKind::DestListRoot,
            Self::Destination(_) => NodeKind::Destination,
            Self::DurableSub(_) => NodeKind::DurableSub,
        }
    }

    pub fn as_broker(&self) -> Option<&BrokerNode> {
        match self {
            Self::BrokerRoot(broker) => Some(broker),
            _ => None,
        }
    }

    pub fn as_service(&self) -> Option<&ServiceInfo> {
        match self {
            Self::Service(service) => Some(service),
            _ => None,
        }
    }

    pub fn as_destination(&self) -> Option<&DestinationInfo> {
        match self {
            Self::Destination(dest) => Some(dest),
            _ => None,
        }
    }

    pub fn as_durable(&self) -> Option<&DurableInfo> {
        match self {
            Self::DurableSub(durable) => Some(durable),
            _ => None,
        }
    }
}

/// One arena slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyNode {
    pub(super) id: NodeId,
    pub(super) parent: Option<NodeId>,
    pub(super) children: Vec<NodeId>,
    pub(super) data: NodeData,
    pub(super) stale: bool,
}

impl TopologyNode {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Children in insertion order.
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn data(&self) -> &NodeData {
        &self.data
    }

    pub fn kind(&self) -> NodeKind {
        self.data.kind()
    }

    /// Data is known to be out of date until the next refresh.
    pub fn is_stale(&self) -> bool {
        self.stale
    }
}

/// Recursive, owned view of a subtree for presentation layers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeView {
    pub id: NodeId,
    pub kind: NodeKind,
    pub data: NodeData,
    pub stale: bool,
    pub actions: ActionSet,
    pub children: Vec<NodeView>,
}

impl NodeView {
    /// Depth-first search for a view by id.
    pub fn find(&self, id: NodeId) -> Option<&NodeView> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(id))
    }
}
