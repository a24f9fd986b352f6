// ── Topology owner ──
//
// Single task that owns the `TopologyTree`. Session workers send it raw
// outcomes; it applies them, publishes a fresh snapshot over the watch
// channel, emits the matching events, and only then resolves the
// caller's handle.

use std::sync::Arc;

use mqadmin_api::AdminOp;
use serde::de::DeserializeOwned;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::worker::{DestAssumption, Fetch, Populated, Work};
use crate::bus::EventBus;
use crate::command::{Command, IntentOutcome};
use crate::correlator::LateReply;
use crate::error::{CoreError, TopologyError};
use crate::model::{
    BrokerProps, DestState, DestType, DestinationInfo, DurableInfo, Event, EventKind, IntentId,
    NodeId, ServiceInfo, ServiceState, SessionId,
};
use crate::topology::{BrokerNode, NodeData, NodeKind, TopologyTree, is_listed};

pub(crate) enum OwnerMsg {
    AddBroker {
        broker: BrokerNode,
        respond: oneshot::Sender<NodeId>,
    },
    RemoveBroker {
        session: SessionId,
        respond: oneshot::Sender<bool>,
    },
    /// New name or address for an existing broker entry.
    UpdateBroker {
        session: SessionId,
        key: String,
        host: String,
        port: u16,
        respond: oneshot::Sender<Option<NodeId>>,
    },
    Outcome(Box<Outcome>),
}

/// Raw result of one intent, as the worker saw it.
pub(crate) struct Outcome {
    pub session: SessionId,
    pub intent: IntentId,
    pub command: Command,
    pub result: Result<Work, CoreError>,
    /// Session state once the worker was done.
    pub connected: bool,
    pub response_tx: oneshot::Sender<Result<IntentOutcome, CoreError>>,
    pub applied_tx: oneshot::Sender<()>,
}

/// Where an outcome landed.
#[derive(Debug, Clone, Copy)]
struct Applied {
    node: NodeId,
    stale: bool,
}

impl Applied {
    fn new(node: NodeId, stale: bool) -> Self {
        Self { node, stale }
    }
}

pub(crate) struct TopologyOwner {
    tree: TopologyTree,
    snapshot_tx: watch::Sender<Arc<TopologyTree>>,
    bus: EventBus,
}

impl TopologyOwner {
    pub(crate) fn new(bus: EventBus) -> (Self, watch::Receiver<Arc<TopologyTree>>) {
        let (snapshot_tx, snapshot_rx) = watch::channel(Arc::new(TopologyTree::new()));
        let owner = Self {
            tree: TopologyTree::new(),
            snapshot_tx,
            bus,
        };
        (owner, snapshot_rx)
    }

    pub(crate) async fn run(
        mut self,
        mut inbox: mpsc::UnboundedReceiver<OwnerMsg>,
        mut late_rx: mpsc::UnboundedReceiver<LateReply>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                msg = inbox.recv() => match msg {
                    Some(msg) => self.handle(msg),
                    None => break,
                },
                Some(late) = late_rx.recv() => self.apply_late(late),
            }
        }
        debug!("topology owner stopped");
    }

    fn handle(&mut self, msg: OwnerMsg) {
        match msg {
            OwnerMsg::AddBroker { broker, respond } => {
                let session = broker.session;
                let node = self.add_broker(broker);
                self.publish_snapshot();
                self.bus
                    .publish(Event::from_session(session, EventKind::BrokerAdded { node }));
                let _ = respond.send(node);
            }
            OwnerMsg::RemoveBroker { session, respond } => {
                let removed = match self.tree.broker_root(session) {
                    Some(root) => self.tree.remove(root).is_ok(),
                    None => false,
                };
                if removed {
                    self.publish_snapshot();
                    self.bus
                        .publish(Event::from_session(session, EventKind::BrokerRemoved));
                }
                let _ = respond.send(removed);
            }
            OwnerMsg::UpdateBroker {
                session,
                key,
                host,
                port,
                respond,
            } => {
                let root = self.update_broker(session, key, host, port);
                if let Some(root) = root {
                    self.publish_snapshot();
                    self.publish_changed(session, root);
                }
                let _ = respond.send(root);
            }
            OwnerMsg::Outcome(outcome) => self.apply_outcome(*outcome),
        }
    }

    fn update_broker(
        &mut self,
        session: SessionId,
        key: String,
        host: String,
        port: u16,
    ) -> Option<NodeId> {
        let root = self.tree.broker_root(session)?;
        let Some(NodeData::BrokerRoot(broker)) = self.tree.data_mut(root) else {
            return None;
        };
        broker.key = key;
        broker.host = host;
        broker.port = port;
        Some(root)
    }

    fn add_broker(&mut self, broker: BrokerNode) -> NodeId {
        let root = self.tree.insert_root(NodeData::BrokerRoot(broker));
        for list in [NodeData::ServiceListRoot, NodeData::DestListRoot] {
            if let Err(e) = self.tree.insert(root, list) {
                warn!(error = %e, "cannot attach broker list node");
            }
        }
        root
    }

    // ── Outcomes ─────────────────────────────────────────────────────

    fn apply_outcome(&mut self, outcome: Outcome) {
        let Outcome {
            session,
            intent,
            command,
            result,
            connected,
            response_tx,
            applied_tx,
        } = outcome;

        let reply = match self.tree.broker_root(session) {
            Some(root) => self.apply_result(session, root, intent, &command, result, connected),
            None => Err(result.err().unwrap_or(CoreError::UnknownSession(session))),
        };
        let _ = response_tx.send(reply);
        let _ = applied_tx.send(());
    }

    fn apply_result(
        &mut self,
        session: SessionId,
        root: NodeId,
        intent: IntentId,
        command: &Command,
        result: Result<Work, CoreError>,
        connected: bool,
    ) -> Result<IntentOutcome, CoreError> {
        match result {
            Ok(work) => {
                let restarted = matches!(work, Work::Restarted(_));
                self.sync_connection(root, connected);
                if restarted {
                    self.clear_broker(root);
                }
                let applied = self.apply_work(root, work);
                self.publish_snapshot();
                let applied = applied?;

                if !command.is_connection() {
                    if let Some(op) = command.op() {
                        self.bus
                            .publish(Event::from_session(session, EventKind::CommandSucceeded { op }));
                    }
                }
                self.publish_changed(session, applied.node);
                debug!(session = %session, intent = %intent, node = %applied.node, stale = applied.stale, "intent applied");
                Ok(IntentOutcome {
                    intent,
                    session,
                    node: applied.node,
                    stale: applied.stale,
                })
            }
            Err(error) => {
                if self.sync_connection(root, connected) {
                    self.publish_snapshot();
                    self.publish_changed(session, root);
                }
                // Connection failures were already reported by the session.
                if !matches!(error, CoreError::Connect(_)) && !command.is_connection() {
                    if let Some(op) = command.op() {
                        self.bus.publish(Event::from_session(
                            session,
                            EventKind::CommandFailed {
                                op,
                                error: error.info(),
                            },
                        ));
                    }
                }
                debug!(session = %session, intent = %intent, error = %error, "intent failed");
                Err(error)
            }
        }
    }

    /// Bring the broker root's `connected` flag in line with the session.
    /// A broker that dropped off loses its lists and properties.
    fn sync_connection(&mut self, root: NodeId, connected: bool) -> bool {
        let Some(NodeData::BrokerRoot(broker)) = self.tree.data_mut(root) else {
            return false;
        };
        if broker.connected == connected {
            return false;
        }
        broker.connected = connected;
        if !connected {
            self.clear_broker(root);
        }
        true
    }

    fn clear_broker(&mut self, root: NodeId) {
        if let Some(NodeData::BrokerRoot(broker)) = self.tree.data_mut(root) {
            broker.props.clear();
        }
        self.tree.clear_stale(root);
        let lists = [self.tree.service_list(root), self.tree.dest_list(root)];
        for list in lists.into_iter().flatten() {
            if let Err(e) = self.tree.replace_children(list, Vec::new()) {
                warn!(error = %e, "cannot clear broker list");
            }
        }
    }

    fn apply_work(&mut self, root: NodeId, work: Work) -> Result<Applied, TopologyError> {
        match work {
            Work::Connected(populated) | Work::Restarted(populated) | Work::Broker(populated) => {
                self.apply_populated(root, populated)
            }
            Work::Disconnected => Ok(Applied::new(root, false)),
            Work::BrokerProps(fetched) => {
                let stale = self.apply_props(root, fetched)?;
                Ok(Applied::new(root, stale))
            }
            Work::Services { fetched, assumed } => {
                let list = self.service_list(root)?;
                self.apply_services(list, fetched, assumed)
            }
            Work::Service {
                name,
                fetched,
                assumed,
            } => self.apply_service(root, &name, fetched, assumed),
            Work::Destinations { fetched, assumed } => {
                let list = self.dest_list(root)?;
                self.apply_destinations(list, fetched, assumed)
            }
            Work::Destination {
                name,
                dest_type,
                fetched,
                durables,
                assume,
            } => {
                let applied = self.apply_destination(root, &name, dest_type, fetched, assume)?;
                match durables {
                    Some(durables) if self.is_destination(applied.node) => {
                        let stale = self.apply_durables(applied.node, durables)?;
                        Ok(Applied::new(applied.node, applied.stale || stale))
                    }
                    _ => Ok(applied),
                }
            }
            Work::DestinationCreated { info, stale } => {
                let list = self.dest_list(root)?;
                if !is_listed(&info) {
                    return Ok(Applied::new(list, false));
                }
                if let Some(existing) = self.tree.find_destination(root, &info.name, info.dest_type) {
                    self.tree.remove(existing)?;
                }
                let node = self.tree.insert(list, NodeData::Destination(info))?;
                if stale {
                    self.tree.mark_stale(node)?;
                }
                Ok(Applied::new(node, stale))
            }
            Work::DestinationRemoved { name, dest_type } => {
                let list = self.dest_list(root)?;
                if let Some(existing) = self.tree.find_destination(root, &name, dest_type) {
                    self.tree.remove(existing)?;
                }
                Ok(Applied::new(list, false))
            }
            Work::Durables { topic, fetched } => {
                match self.tree.find_destination(root, &topic, DestType::Topic) {
                    Some(dest) => {
                        let stale = self.apply_durables(dest, fetched)?;
                        Ok(Applied::new(dest, stale))
                    }
                    None => Ok(Applied::new(self.dest_list(root)?, fetched.is_stale())),
                }
            }
        }
    }

    fn apply_populated(&mut self, root: NodeId, populated: Populated) -> Result<Applied, TopologyError> {
        let Populated {
            props,
            services,
            destinations,
        } = populated;
        let (services_list, dest_list) = (self.service_list(root)?, self.dest_list(root)?);
        let props_stale = self.apply_props(root, props)?;
        let services = self.apply_services(services_list, services, None)?;
        let destinations = self.apply_destinations(dest_list, destinations, None)?;
        Ok(Applied::new(
            root,
            props_stale || services.stale || destinations.stale,
        ))
    }

    fn apply_props(&mut self, root: NodeId, fetched: Fetch<BrokerProps>) -> Result<bool, TopologyError> {
        match fetched {
            Fetch::Fresh(props) => {
                if let Some(NodeData::BrokerRoot(broker)) = self.tree.data_mut(root) {
                    broker.props = props;
                }
                self.tree.clear_stale(root);
                Ok(false)
            }
            Fetch::Stale => {
                self.tree.mark_stale(root)?;
                Ok(true)
            }
        }
    }

    fn apply_services(
        &mut self,
        list: NodeId,
        fetched: Fetch<Vec<ServiceInfo>>,
        assumed: Option<ServiceState>,
    ) -> Result<Applied, TopologyError> {
        match fetched {
            Fetch::Fresh(services) => {
                self.tree
                    .replace_children(list, services.into_iter().map(NodeData::Service).collect())?;
                Ok(Applied::new(list, false))
            }
            Fetch::Stale => {
                if let Some(state) = assumed {
                    for child in self.tree.children(list).to_vec() {
                        self.assume_service_state(child, state);
                    }
                }
                self.tree.mark_stale(list)?;
                Ok(Applied::new(list, true))
            }
        }
    }

    fn apply_service(
        &mut self,
        root: NodeId,
        name: &str,
        fetched: Fetch<Option<ServiceInfo>>,
        assumed: Option<ServiceState>,
    ) -> Result<Applied, TopologyError> {
        let list = self.service_list(root)?;
        let existing = self.tree.find_service(root, name);
        match (fetched, existing) {
            (Fetch::Fresh(Some(info)), Some(node)) => {
                self.tree.set_data(node, NodeData::Service(info))?;
                Ok(Applied::new(node, false))
            }
            (Fetch::Fresh(Some(info)), None) => {
                let node = self.tree.insert(list, NodeData::Service(info))?;
                Ok(Applied::new(node, false))
            }
            (Fetch::Fresh(None), Some(node)) => {
                self.tree.remove(node)?;
                Ok(Applied::new(list, false))
            }
            (Fetch::Fresh(None), None) => Ok(Applied::new(list, false)),
            (Fetch::Stale, Some(node)) => {
                if let Some(state) = assumed {
                    self.assume_service_state(node, state);
                }
                self.tree.mark_stale(node)?;
                Ok(Applied::new(node, true))
            }
            (Fetch::Stale, None) => {
                self.tree.mark_stale(list)?;
                Ok(Applied::new(list, true))
            }
        }
    }

    fn assume_service_state(&mut self, node: NodeId, state: ServiceState) {
        if let Some(NodeData::Service(service)) = self.tree.data_mut(node) {
            if !service.is_admin() {
                service.state = state;
            }
        }
    }

    fn apply_destinations(
        &mut self,
        list: NodeId,
        fetched: Fetch<Vec<DestinationInfo>>,
        assumed: Option<DestState>,
    ) -> Result<Applied, TopologyError> {
        match fetched {
            Fetch::Fresh(dests) => {
                self.tree
                    .replace_children(list, dests.into_iter().map(NodeData::Destination).collect())?;
                Ok(Applied::new(list, false))
            }
            Fetch::Stale => {
                if let Some(state) = assumed {
                    for child in self.tree.children(list).to_vec() {
                        self.assume_destination(child, DestAssumption::State(state));
                    }
                }
                self.tree.mark_stale(list)?;
                Ok(Applied::new(list, true))
            }
        }
    }

    fn apply_destination(
        &mut self,
        root: NodeId,
        name: &str,
        dest_type: DestType,
        fetched: Fetch<Option<DestinationInfo>>,
        assume: DestAssumption,
    ) -> Result<Applied, TopologyError> {
        let list = self.dest_list(root)?;
        let existing = self.tree.find_destination(root, name, dest_type);
        match (fetched, existing) {
            (Fetch::Fresh(Some(info)), Some(node)) => {
                if self.tree.set_data(node, NodeData::Destination(info))? {
                    Ok(Applied::new(node, false))
                } else {
                    Ok(Applied::new(list, false))
                }
            }
            (Fetch::Fresh(Some(info)), None) => {
                if !is_listed(&info) {
                    return Ok(Applied::new(list, false));
                }
                let node = self.tree.insert(list, NodeData::Destination(info))?;
                Ok(Applied::new(node, false))
            }
            (Fetch::Fresh(None), Some(node)) => {
                self.tree.remove(node)?;
                Ok(Applied::new(list, false))
            }
            (Fetch::Fresh(None), None) => Ok(Applied::new(list, false)),
            (Fetch::Stale, Some(node)) => {
                self.assume_destination(node, assume);
                self.tree.mark_stale(node)?;
                Ok(Applied::new(node, true))
            }
            (Fetch::Stale, None) => {
                self.tree.mark_stale(list)?;
                Ok(Applied::new(list, true))
            }
        }
    }

    fn assume_destination(&mut self, node: NodeId, assume: DestAssumption) {
        let Some(NodeData::Destination(dest)) = self.tree.data_mut(node) else {
            return;
        };
        match assume {
            DestAssumption::Nothing => {}
            DestAssumption::State(state) => dest.state = state,
            DestAssumption::Purged => {
                dest.message_count = 0;
                dest.message_bytes = 0;
            }
            DestAssumption::Replace(info) => {
                if info.matches(&dest.name, dest.dest_type) {
                    *dest = info;
                }
            }
        }
    }

    fn apply_durables(&mut self, dest: NodeId, fetched: Fetch<Vec<DurableInfo>>) -> Result<bool, TopologyError> {
        match fetched {
            Fetch::Fresh(durables) => {
                self.tree
                    .replace_children(dest, durables.into_iter().map(NodeData::DurableSub).collect())?;
                Ok(false)
            }
            Fetch::Stale => {
                self.tree.mark_stale(dest)?;
                Ok(true)
            }
        }
    }

    // ── Late replies ─────────────────────────────────────────────────

    fn apply_late(&mut self, late: LateReply) {
        let Some(node) = late.node else {
            debug!(session = %late.session, op = %late.op, "late reply without a target node");
            return;
        };
        let Some(kind) = self.tree.get(node).map(|n| n.kind()) else {
            debug!(session = %late.session, node = %node, "late reply target is gone");
            return;
        };

        let applied = match (late.op, kind) {
            (AdminOp::GetBrokerProps, NodeKind::BrokerRoot) => {
                decode::<BrokerProps>(&late).map(|props| self.apply_props(node, Fetch::Fresh(props)).map(|_| ()))
            }
            (AdminOp::GetServices, NodeKind::ServiceListRoot) => decode::<Vec<ServiceInfo>>(&late)
                .map(|services| self.apply_services(node, Fetch::Fresh(services), None).map(|_| ())),
            (AdminOp::GetServices, NodeKind::Service) => decode::<Vec<ServiceInfo>>(&late)
                .map(|services| self.late_service(node, services)),
            (AdminOp::GetDestinations, NodeKind::DestListRoot) => decode::<Vec<DestinationInfo>>(&late)
                .map(|dests| self.apply_destinations(node, Fetch::Fresh(dests), None).map(|_| ())),
            (AdminOp::GetDestinations, NodeKind::Destination) => decode::<Vec<DestinationInfo>>(&late)
                .map(|dests| self.late_destination(node, dests)),
            (AdminOp::GetDurables, NodeKind::Destination) => decode::<Vec<DurableInfo>>(&late)
                .map(|durables| self.apply_durables(node, Fetch::Fresh(durables)).map(|_| ())),
            _ => {
                debug!(session = %late.session, op = %late.op, kind = %kind, "late reply does not fit its node");
                return;
            }
        };

        match applied {
            Some(Ok(())) => {
                debug!(session = %late.session, op = %late.op, node = %node, "applied late reply");
                self.publish_snapshot();
                let target = if self.tree.contains(node) {
                    node
                } else {
                    match self.tree.broker_root(late.session) {
                        Some(root) => root,
                        None => return,
                    }
                };
                self.publish_changed(late.session, target);
            }
            Some(Err(e)) => warn!(session = %late.session, error = %e, "cannot apply late reply"),
            None => {}
        }
    }

    fn late_service(&mut self, node: NodeId, services: Vec<ServiceInfo>) -> Result<(), TopologyError> {
        let Some(name) = self.tree.data(node).and_then(NodeData::as_service).map(|s| s.name.clone()) else {
            return Ok(());
        };
        match services.into_iter().find(|s| s.name == name) {
            Some(info) => self.tree.set_data(node, NodeData::Service(info)).map(|_| ()),
            None => self.tree.remove(node).map(|_| ()),
        }
    }

    fn late_destination(&mut self, node: NodeId, dests: Vec<DestinationInfo>) -> Result<(), TopologyError> {
        let Some((name, dest_type)) = self
            .tree
            .data(node)
            .and_then(NodeData::as_destination)
            .map(|d| (d.name.clone(), d.dest_type))
        else {
            return Ok(());
        };
        match dests.into_iter().find(|d| d.matches(&name, dest_type)) {
            Some(info) => self.tree.set_data(node, NodeData::Destination(info)).map(|_| ()),
            None => self.tree.remove(node).map(|_| ()),
        }
    }

    // ── Helpers ──────────────────────────────────────────────────────

    fn service_list(&self, root: NodeId) -> Result<NodeId, TopologyError> {
        self.tree
            .service_list(root)
            .ok_or(TopologyError::UnknownNode(root))
    }

    fn dest_list(&self, root: NodeId) -> Result<NodeId, TopologyError> {
        self.tree.dest_list(root).ok_or(TopologyError::UnknownNode(root))
    }

    fn is_destination(&self, node: NodeId) -> bool {
        self.tree.get(node).is_some_and(|n| n.kind() == NodeKind::Destination)
    }

    fn publish_snapshot(&self) {
        self.snapshot_tx.send_replace(Arc::new(self.tree.clone()));
    }

    fn publish_changed(&self, session: SessionId, node: NodeId) {
        let actions = self.tree.actions_along_path(node);
        self.bus.publish(Event::from_session(
            session,
            EventKind::TopologyChanged { node, actions },
        ));
    }
}

fn decode<T: DeserializeOwned>(late: &LateReply) -> Option<T> {
    match serde_json::from_value::<T>(late.payload.clone()) {
        Ok(value) => Some(value),
        Err(e) => {
            debug!(session = %late.session, op = %late.op, error = %e, "undecodable late reply");
            None
        }
    }
}
