// ── Action sets ──
//
// What a user may do with a node right now. Derived on demand from the
// node's kind, data and children; never cached on the node.

use std::fmt;

use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;

use super::{NodeData, TopologyTree};
use crate::model::{NodeId, ServiceState};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumIter,
)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Connect,
    Disconnect,
    Delete,
    Properties,
    Refresh,
    QueryBroker,
    Shutdown,
    Restart,
    Pause,
    Resume,
    Purge,
    AddDestination,
}

impl Action {
    const fn bit(self) -> u32 {
        match self {
            Self::Connect => 1,
            Self::Disconnect => 1 << 1,
            Self::Delete => 1 << 2,
            Self::Properties => 1 << 3,
            Self::Refresh => 1 << 4,
            Self::QueryBroker => 1 << 5,
            Self::Shutdown => 1 << 6,
            Self::Restart => 1 << 7,
            Self::Pause => 1 << 8,
            Self::Resume => 1 << 9,
            Self::Purge => 1 << 10,
            Self::AddDestination => 1 << 11,
        }
    }
}

/// Set of [`Action`]s as a bit mask.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionSet(u32);

impl ActionSet {
    pub const EMPTY: Self = Self(0);

    pub fn insert(&mut self, action: Action) {
        self.0 |= action.bit();
    }

    pub fn remove(&mut self, action: Action) {
        self.0 &= !action.bit();
    }

    pub fn with(mut self, action: Action) -> Self {
        self.insert(action);
        self
    }

    pub fn contains(self, action: Action) -> bool {
        self.0 & action.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn len(self) -> usize {
        self.iter().count()
    }

    pub fn iter(self) -> impl Iterator<Item = Action> {
        Action::iter().filter(move |action| self.contains(*action))
    }
}

impl FromIterator<Action> for ActionSet {
    fn from_iter<I: IntoIterator<Item = Action>>(iter: I) -> Self {
        let mut set = Self::EMPTY;
        for action in iter {
            set.insert(action);
        }
        set
    }
}

impl fmt::Debug for ActionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// Actions currently available on `node`. Empty for unknown nodes.
pub fn active_actions_for(tree: &TopologyTree, node: NodeId) -> ActionSet {
    let Some(entry) = tree.get(node) else {
        return ActionSet::EMPTY;
    };

    let mut set = ActionSet::EMPTY;
    match entry.data() {
        NodeData::BrokerRoot(broker) => {
            set.insert(Action::Properties);
            if broker.connected {
                set.insert(Action::Disconnect);
                set.insert(Action::Refresh);
                set.insert(Action::QueryBroker);
                set.insert(Action::Shutdown);
                set.insert(Action::Restart);

                let services = tree
                    .service_list(node)
                    .into_iter()
                    .flat_map(move |list| tree.child_data(list))
                    .filter_map(NodeData::as_service)
                    .filter(|service| !service.is_admin());
                for service in services {
                    match service.state {
                        ServiceState::Running => set.insert(Action::Pause),
                        ServiceState::Paused => set.insert(Action::Resume),
                        ServiceState::Quiesced | ServiceState::Unknown => {}
                    }
                }
            } else {
                set.insert(Action::Connect);
                set.insert(Action::Delete);
            }
        }
        NodeData::ServiceListRoot => set.insert(Action::Refresh),
        NodeData::Service(service) => {
            set.insert(Action::Properties);
            if !service.is_admin() {
                match service.state {
                    ServiceState::Running => set.insert(Action::Pause),
                    ServiceState::Paused => set.insert(Action::Resume),
                    ServiceState::Quiesced | ServiceState::Unknown => {}
                }
            }
        }
        NodeData::DestListRoot => {
            set.insert(Action::AddDestination);
            set.insert(Action::Refresh);
            for dest in tree.child_data(node).filter_map(NodeData::as_destination) {
                if dest.state.is_running() {
                    set.insert(Action::Pause);
                }
                if dest.state.is_paused() {
                    set.insert(Action::Resume);
                }
            }
        }
        NodeData::Destination(dest) => {
            set.insert(Action::Purge);
            set.insert(Action::Delete);
            set.insert(Action::Properties);
            set.insert(Action::Refresh);
            if dest.state.is_running() {
                set.insert(Action::Pause);
            }
            if dest.state.is_paused() {
                set.insert(Action::Resume);
            }
        }
        NodeData::DurableSub(_) => {
            set.insert(Action::Purge);
            set.insert(Action::Delete);
        }
    }
    set
}
