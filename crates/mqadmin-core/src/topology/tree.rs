use std::collections::HashMap;

use super::actions::{ActionSet, active_actions_for};
use super::filter::is_listed;
use super::node::{NodeData, NodeKind, NodeView, TopologyNode};
use crate::error::TopologyError;
use crate::model::{DestType, NodeId, SessionId};

/// Arena of topology nodes.
///
/// Cloning is how the owner task produces snapshots; observers hold an
/// `Arc<TopologyTree>` and never see a partially applied change.
#[derive(Debug, Clone, Default)]
pub struct TopologyTree {
    nodes: HashMap<NodeId, TopologyNode>,
    roots: Vec<NodeId>,
    next_id: u64,
}

impl TopologyTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn get(&self, id: NodeId) -> Option<&TopologyNode> {
        self.nodes.get(&id)
    }

    pub fn data(&self, id: NodeId) -> Option<&NodeData> {
        self.nodes.get(&id).map(TopologyNode::data)
    }

    /// Root nodes in insertion order.
    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.nodes
            .get(&id)
            .map(|node| node.children.as_slice())
            .unwrap_or_default()
    }

    /// Data of the children of `id`, in order.
    pub fn child_data(&self, id: NodeId) -> impl Iterator<Item = &NodeData> + '_ {
        self.children(id)
            .iter()
            .filter_map(|child| self.nodes.get(child))
            .map(TopologyNode::data)
    }

    // ── Mutation ─────────────────────────────────────────────────────

    pub fn insert_root(&mut self, data: NodeData) -> NodeId {
        let id = self.allocate(None, data);
        self.roots.push(id);
        id
    }

    /// Append a child under `parent`.
    pub fn insert(&mut self, parent: NodeId, data: NodeData) -> Result<NodeId, TopologyError> {
        let parent_kind = self.kind_of(parent)?;
        check_child(parent_kind, data.kind())?;

        let id = self.allocate(Some(parent), data);
        if let Some(node) = self.nodes.get_mut(&parent) {
            node.children.push(id);
        }
        Ok(id)
    }

    /// Remove `id` together with its whole subtree.
    pub fn remove(&mut self, id: NodeId) -> Result<NodeData, TopologyError> {
        let parent = self.get(id).ok_or(TopologyError::UnknownNode(id))?.parent;
        match parent {
            Some(parent) => {
                if let Some(node) = self.nodes.get_mut(&parent) {
                    node.children.retain(|child| *child != id);
                }
            }
            None => self.roots.retain(|root| *root != id),
        }
        self.drop_subtree(id).ok_or(TopologyError::UnknownNode(id))
    }

    /// Replace the full child set of `parent` in one step and clear its
    /// stale flag. Under a destination list, unlisted destinations are
    /// dropped from `children`.
    pub fn replace_children(
        &mut self,
        parent: NodeId,
        children: Vec<NodeData>,
    ) -> Result<Vec<NodeId>, TopologyError> {
        let parent_kind = self.kind_of(parent)?;
        for child in &children {
            check_child(parent_kind, child.kind())?;
        }

        let old = self
            .nodes
            .get_mut(&parent)
            .map(|node| std::mem::take(&mut node.children))
            .unwrap_or_default();
        for child in old {
            self.drop_subtree(child);
        }

        let mut ids = Vec::with_capacity(children.len());
        for data in children {
            if parent_kind == NodeKind::DestListRoot && !passes_filter(&data) {
                continue;
            }
            ids.push(self.allocate(Some(parent), data));
        }
        if let Some(node) = self.nodes.get_mut(&parent) {
            node.children.clone_from(&ids);
            node.stale = false;
        }
        Ok(ids)
    }

    /// Overwrite the data of `id` with fresh data of the same kind and
    /// clear its stale flag. A destination that no longer passes the list
    /// filter is removed instead; the return value tells whether the node
    /// survived.
    pub fn set_data(&mut self, id: NodeId, data: NodeData) -> Result<bool, TopologyError> {
        let node = self.nodes.get_mut(&id).ok_or(TopologyError::UnknownNode(id))?;
        if node.data.kind() != data.kind() {
            return Err(TopologyError::InvalidChild {
                parent: node.data.kind(),
                child: data.kind(),
            });
        }
        if !passes_filter(&data) {
            self.remove(id)?;
            return Ok(false);
        }
        node.data = data;
        node.stale = false;
        Ok(true)
    }

    /// In-place edit used for optimistic updates. The kind must not change.
    pub(crate) fn data_mut(&mut self, id: NodeId) -> Option<&mut NodeData> {
        self.nodes.get_mut(&id).map(|node| &mut node.data)
    }

    /// Mark `id` stale. Its subtree is left alone.
    pub fn mark_stale(&mut self, id: NodeId) -> Result<(), TopologyError> {
        let node = self.nodes.get_mut(&id).ok_or(TopologyError::UnknownNode(id))?;
        node.stale = true;
        Ok(())
    }

    pub(crate) fn clear_stale(&mut self, id: NodeId) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.stale = false;
        }
    }

    // ── Views ────────────────────────────────────────────────────────

    /// Owned recursive view of the subtree under `id`.
    pub fn snapshot(&self, id: NodeId) -> Option<NodeView> {
        let node = self.nodes.get(&id)?;
        let children = node
            .children
            .iter()
            .filter_map(|child| self.snapshot(*child))
            .collect();
        Some(NodeView {
            id,
            kind: node.kind(),
            data: node.data.clone(),
            stale: node.stale,
            actions: active_actions_for(self, id),
            children,
        })
    }

    pub fn actions_for(&self, id: NodeId) -> ActionSet {
        active_actions_for(self, id)
    }

    /// Action sets of `id` and each of its ancestors, nearest first.
    pub fn actions_along_path(&self, id: NodeId) -> Vec<(NodeId, ActionSet)> {
        std::iter::once(id)
            .chain(self.ancestors(id))
            .filter(|node| self.contains(*node))
            .map(|node| (node, active_actions_for(self, node)))
            .collect()
    }

    /// Ancestors of `id`, nearest first.
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut current = self.get(id).and_then(TopologyNode::parent);
        while let Some(node) = current {
            out.push(node);
            current = self.get(node).and_then(TopologyNode::parent);
        }
        out
    }

    // ── Lookup ───────────────────────────────────────────────────────

    pub fn broker_root(&self, session: SessionId) -> Option<NodeId> {
        self.roots.iter().copied().find(|root| {
            self.data(*root)
                .and_then(NodeData::as_broker)
                .is_some_and(|broker| broker.session == session)
        })
    }

    /// Broker root above `id` (or `id` itself).
    pub fn broker_of(&self, id: NodeId) -> Option<NodeId> {
        if !self.contains(id) {
            return None;
        }
        Some(self.ancestors(id).last().copied().unwrap_or(id))
    }

    pub fn service_list(&self, broker: NodeId) -> Option<NodeId> {
        self.child_of_kind(broker, NodeKind::ServiceListRoot)
    }

    pub fn dest_list(&self, broker: NodeId) -> Option<NodeId> {
        self.child_of_kind(broker, NodeKind::DestListRoot)
    }

    pub fn find_service(&self, broker: NodeId, name: &str) -> Option<NodeId> {
        let list = self.service_list(broker)?;
        self.find_child(list, |data| {
            data.as_service().is_some_and(|service| service.name == name)
        })
    }

    pub fn find_destination(
        &self,
        broker: NodeId,
        name: &str,
        dest_type: DestType,
    ) -> Option<NodeId> {
        let list = self.dest_list(broker)?;
        self.find_child(list, |data| {
            data.as_destination()
                .is_some_and(|dest| dest.matches(name, dest_type))
        })
    }

    pub fn find_durable(
        &self,
        destination: NodeId,
        name: &str,
        client_id: Option<&str>,
    ) -> Option<NodeId> {
        self.find_child(destination, |data| {
            data.as_durable()
                .is_some_and(|durable| durable.matches(name, client_id))
        })
    }

    // ── Internals ────────────────────────────────────────────────────

    fn allocate(&mut self, parent: Option<NodeId>, data: NodeData) -> NodeId {
        self.next_id += 1;
        let id = NodeId::new(self.next_id);
        self.nodes.insert(
            id,
            TopologyNode {
                id,
                parent,
                children: Vec::new(),
                data,
                stale: false,
            },
        );
        id
    }

    fn kind_of(&self, id: NodeId) -> Result<NodeKind, TopologyError> {
        self.get(id)
            .map(TopologyNode::kind)
            .ok_or(TopologyError::UnknownNode(id))
    }

    fn child_of_kind(&self, parent: NodeId, kind: NodeKind) -> Option<NodeId> {
        self.find_child(parent, |data| data.kind() == kind)
    }

    fn find_child(&self, parent: NodeId, pred: impl Fn(&NodeData) -> bool) -> Option<NodeId> {
        self.children(parent)
            .iter()
            .copied()
            .find(|child| self.data(*child).is_some_and(&pred))
    }

    /// Drop `id` and everything below it from the arena without touching
    /// the parent's child list.
    fn drop_subtree(&mut self, id: NodeId) -> Option<NodeData> {
        let node = self.nodes.remove(&id)?;
        for child in node.children {
            self.drop_subtree(child);
        }
        Some(node.data)
    }
}

fn check_child(parent: NodeKind, child: NodeKind) -> Result<(), TopologyError> {
    if parent.accepts(child) {
        Ok(())
    } else {
        Err(TopologyError::InvalidChild { parent, child })
    }
}

fn passes_filter(data: &NodeData) -> bool {
    data.as_destination().is_none_or(is_listed)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::{DestinationInfo, DurableInfo, ServiceInfo, ServiceKind, ServiceState};
    use crate::topology::BrokerNode;
    use pretty_assertions::assert_eq;

    fn broker(tree: &mut TopologyTree) -> (NodeId, NodeId, NodeId) {
        let root = tree.insert_root(NodeData::BrokerRoot(BrokerNode::new(
            SessionId::new(7),
            "local",
            "localhost",
            7676,
        )));
        let services = tree.insert(root, NodeData::ServiceListRoot).unwrap();
        let dests = tree.insert(root, NodeData::DestListRoot).unwrap();
        (root, services, dests)
    }

    fn queue(name: &str) -> NodeData {
        NodeData::Destination(DestinationInfo::new(name, DestType::Queue))
    }

    fn child_names(tree: &TopologyTree, parent: NodeId) -> Vec<String> {
        tree.child_data(parent)
            .filter_map(NodeData::as_destination)
            .map(|dest| dest.name.clone())
            .collect()
    }

    #[test]
    fn children_keep_insertion_order() {
        let mut tree = TopologyTree::new();
        let (_, _, dests) = broker(&mut tree);
        for name in ["c", "a", "b"] {
            tree.insert(dests, queue(name)).unwrap();
        }
        assert_eq!(child_names(&tree, dests), vec!["c", "a", "b"]);
    }

    #[test]
    fn kinds_are_checked_on_insert() {
        let mut tree = TopologyTree::new();
        let (_, services, _) = broker(&mut tree);
        let err = tree.insert(services, queue("orders")).unwrap_err();
        assert_eq!(
            err,
            TopologyError::InvalidChild {
                parent: NodeKind::ServiceListRoot,
                child: NodeKind::Destination,
            }
        );
    }

    #[test]
    fn remove_takes_the_whole_subtree() {
        let mut tree = TopologyTree::new();
        let (root, _, dests) = broker(&mut tree);
        let topic = tree
            .insert(
                dests,
                NodeData::Destination(DestinationInfo::new("prices", DestType::Topic)),
            )
            .unwrap();
        tree.insert(
            topic,
            NodeData::DurableSub(DurableInfo {
                name: "sub".into(),
                client_id: Some("c1".into()),
                dest_name: "prices".into(),
                message_count: 0,
                active: true,
            }),
        )
        .unwrap();
        assert_eq!(tree.len(), 5);

        tree.remove(root).unwrap();
        assert!(tree.is_empty());
        assert!(tree.roots().is_empty());
    }

    #[test]
    fn replace_children_is_idempotent_and_filters() {
        let mut tree = TopologyTree::new();
        let (_, _, dests) = broker(&mut tree);
        tree.mark_stale(dests).unwrap();

        let mut temp = DestinationInfo::new("temporary_destination://queue/9", DestType::Queue);
        temp.temporary = true;
        let listing = vec![
            queue("orders"),
            NodeData::Destination(temp),
            queue(crate::topology::filter::ADMIN_DESTINATION),
            queue("billing"),
        ];

        let first = tree.replace_children(dests, listing.clone()).unwrap();
        let after_first = child_names(&tree, dests);
        let size_after_first = tree.len();
        let second = tree.replace_children(dests, listing).unwrap();

        assert_eq!(after_first, vec!["orders", "billing"]);
        assert_eq!(child_names(&tree, dests), after_first);
        assert_eq!(tree.len(), size_after_first);
        assert_eq!(first.len(), second.len());
        assert!(!tree.get(dests).unwrap().is_stale());
        // Old ids are gone.
        assert!(first.iter().all(|id| !tree.contains(*id)));
    }

    #[test]
    fn set_data_of_a_filtered_destination_removes_it() {
        let mut tree = TopologyTree::new();
        let (root, _, dests) = broker(&mut tree);
        let id = tree.insert(dests, queue("orders")).unwrap();

        let mut info = DestinationInfo::new("orders", DestType::Queue);
        info.internal = true;
        let kept = tree.set_data(id, NodeData::Destination(info)).unwrap();

        assert!(!kept);
        assert!(tree.find_destination(root, "orders", DestType::Queue).is_none());
    }

    #[test]
    fn lookups_and_paths() {
        let mut tree = TopologyTree::new();
        let (root, services, _) = broker(&mut tree);
        let jms = tree
            .insert(
                services,
                NodeData::Service(ServiceInfo::new("jms", ServiceKind::Normal, ServiceState::Running)),
            )
            .unwrap();

        assert_eq!(tree.broker_root(SessionId::new(7)), Some(root));
        assert_eq!(tree.find_service(root, "jms"), Some(jms));
        assert_eq!(tree.broker_of(jms), Some(root));
        assert_eq!(tree.ancestors(jms), vec![services, root]);

        let path: Vec<NodeId> = tree.actions_along_path(jms).into_iter().map(|(id, _)| id).collect();
        assert_eq!(path, vec![jms, services, root]);
    }

    #[test]
    fn snapshot_reflects_stale_flags() {
        let mut tree = TopologyTree::new();
        let (root, services, _) = broker(&mut tree);
        tree.mark_stale(services).unwrap();

        let view = tree.snapshot(root).unwrap();
        assert_eq!(view.children.len(), 2);
        assert!(view.find(services).unwrap().stale);
        assert!(!view.stale);
    }
}
