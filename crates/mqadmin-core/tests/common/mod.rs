// Scripted broker for integration tests.
//
// Drives the broker half of a loopback pair from a shared `BrokerState`.
// Tests tweak the state (busy counts, silent ops, refusals) before or
// between intents and read back the request log.

#![allow(dead_code, clippy::unwrap_used)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use mqadmin_api::{
    AdminOp, Error as ApiError, LoopbackPeer, LoopbackTransport, PeerMessage, Reply, ReplySender,
    Request,
};
use mqadmin_core::command::requests::{
    DestinationPause, DestinationQuery, DestinationRef, DurableQuery, DurableRef, ServiceQuery,
    ServiceRef,
};
use mqadmin_core::{
    BrokerProps, DestState, DestType, DestinationInfo, DurableInfo, Event, EventBus, ServiceInfo,
    ServiceKind, ServiceState,
};
use secrecy::ExposeSecret;
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

pub const PASSWORD: &str = "secret";

#[derive(Debug, Default)]
pub struct BrokerState {
    pub services: Vec<ServiceInfo>,
    pub destinations: Vec<DestinationInfo>,
    pub durables: BTreeMap<String, Vec<DurableInfo>>,
    pub props: BrokerProps,
    /// Busy replies still owed per op before a real answer.
    pub busy: HashMap<AdminOp, u32>,
    /// Ops the broker never answers. Their requests land in `held`.
    pub silent: HashSet<AdminOp>,
    pub held: Vec<Request>,
    pub rejects: HashMap<AdminOp, (u16, String)>,
    /// Next handshakes to fail at the transport level.
    pub refuse_opens: u32,
    pub opens: u32,
    /// Payloads sent instead of the real answer, decodable or not.
    pub payloads: HashMap<AdminOp, Value>,
    /// The broker goes away when this op arrives, without answering.
    pub hang_up_on: Option<AdminOp>,
    pub log: Vec<AdminOp>,
}

impl BrokerState {
    pub fn standard() -> Self {
        let mut props = BrokerProps::new();
        props.insert("imqInstanceName".into(), "imqbroker".into());
        props.insert("imqVersion".into(), "4.5".into());

        let mut jms = ServiceInfo::new("jms", ServiceKind::Normal, ServiceState::Running);
        jms.port = Some(7677);
        let admin = ServiceInfo::new("admin", ServiceKind::Admin, ServiceState::Running);

        let mut temp = DestinationInfo::new("temporary_destination://queue/1", DestType::Queue);
        temp.temporary = true;

        Self {
            services: vec![jms, admin],
            destinations: vec![
                DestinationInfo::new("orders", DestType::Queue),
                DestinationInfo::new("prices", DestType::Topic),
                DestinationInfo::new("__JMQAdmin", DestType::Topic),
                temp,
            ],
            durables: BTreeMap::from([(
                "prices".to_owned(),
                vec![DurableInfo {
                    name: "ticker".into(),
                    client_id: Some("desk-1".into()),
                    dest_name: "prices".into(),
                    message_count: 12,
                    active: true,
                }],
            )]),
            props,
            ..Self::default()
        }
    }

    pub fn count(&self, op: AdminOp) -> usize {
        self.log.iter().filter(|logged| **logged == op).count()
    }
}

pub type SharedState = Arc<Mutex<BrokerState>>;

pub struct ScriptedBroker {
    pub state: SharedState,
    /// Answers held requests from the test body.
    pub replies: ReplySender,
    pub handle: JoinHandle<()>,
}

impl ScriptedBroker {
    /// Answer the oldest held request with `payload`.
    pub fn release(&self, payload: Value) -> Request {
        let request = self.state.lock().unwrap().held.remove(0);
        self.replies.send(Reply::ok(&request, payload)).unwrap();
        request
    }
}

/// A transport whose broker half is driven by `state`.
pub fn scripted(state: BrokerState) -> (Arc<LoopbackTransport>, ScriptedBroker) {
    let (transport, peer) = LoopbackTransport::pair();
    let state = Arc::new(Mutex::new(state));
    let replies = peer.reply_sender();
    let handle = tokio::spawn(run(peer, Arc::clone(&state)));
    (
        Arc::new(transport),
        ScriptedBroker {
            state,
            replies,
            handle,
        },
    )
}

async fn run(mut peer: LoopbackPeer, state: SharedState) {
    while let Some(message) = peer.recv().await {
        match message {
            PeerMessage::Open {
                username,
                password,
                respond,
            } => {
                let mut state = state.lock().unwrap();
                state.opens += 1;
                let verdict = if state.refuse_opens > 0 {
                    state.refuse_opens -= 1;
                    Err(ApiError::Connect {
                        reason: "connection refused".into(),
                    })
                } else if username == "admin" && password.expose_secret() == PASSWORD {
                    Ok(())
                } else {
                    Err(ApiError::InvalidLogin)
                };
                let _ = respond.send(verdict);
            }
            PeerMessage::Request(request) => {
                if state.lock().unwrap().hang_up_on == Some(request.op) {
                    return;
                }
                let reply = state.lock().unwrap().answer(&request);
                if let Some(reply) = reply {
                    let _ = peer.reply(reply);
                }
            }
            PeerMessage::Close => {}
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(request: &Request) -> T {
    serde_json::from_value(request.payload.clone()).unwrap()
}

impl BrokerState {
    fn answer(&mut self, request: &Request) -> Option<Reply> {
        let op = request.op;
        if op == AdminOp::Hello {
            return Some(Reply::ok(request, Value::Null));
        }
        self.log.push(op);

        if let Some(left) = self.busy.get_mut(&op) {
            if *left > 0 {
                *left -= 1;
                return Some(Reply::busy(request));
            }
        }
        if self.silent.contains(&op) {
            self.held.push(request.clone());
            return None;
        }
        if let Some((code, message)) = self.rejects.get(&op) {
            return Some(Reply::error(request, *code, message.clone()));
        }
        if let Some(payload) = self.payloads.get(&op) {
            return Some(Reply::ok(request, payload.clone()));
        }

        let payload = match op {
            AdminOp::Hello => Value::Null,
            AdminOp::GetBrokerProps => json!(self.props),
            AdminOp::UpdateBroker => {
                let update: mqadmin_core::command::requests::BrokerUpdate = decode(request);
                self.props.extend(update.props);
                Value::Null
            }
            AdminOp::PauseBroker | AdminOp::ResumeBroker => {
                let state = if op == AdminOp::PauseBroker {
                    ServiceState::Paused
                } else {
                    ServiceState::Running
                };
                for service in self.services.iter_mut().filter(|s| !s.is_admin()) {
                    service.state = state;
                }
                Value::Null
            }
            AdminOp::Shutdown => return None,
            AdminOp::GetServices => {
                let query: ServiceQuery = decode(request);
                let matching: Vec<&ServiceInfo> = self
                    .services
                    .iter()
                    .filter(|s| query.name.as_deref().is_none_or(|n| n == s.name))
                    .collect();
                json!(matching)
            }
            AdminOp::PauseService | AdminOp::ResumeService => {
                let target: ServiceRef = decode(request);
                let state = if op == AdminOp::PauseService {
                    ServiceState::Paused
                } else {
                    ServiceState::Running
                };
                match self.services.iter_mut().find(|s| s.name == target.name) {
                    Some(service) => service.state = state,
                    None => return Some(Reply::error(request, 404, "no such service")),
                }
                Value::Null
            }
            AdminOp::UpdateService => Value::Null,
            AdminOp::GetDestinations => {
                let query: DestinationQuery = decode(request);
                let matching: Vec<&DestinationInfo> = self
                    .destinations
                    .iter()
                    .filter(|d| query.matches(&d.name, d.dest_type))
                    .collect();
                json!(matching)
            }
            AdminOp::CreateDestination => {
                let info: DestinationInfo = decode(request);
                if self.destinations.iter().any(|d| d.matches(&info.name, info.dest_type)) {
                    return Some(Reply::error(request, 409, "destination exists"));
                }
                self.destinations.push(info);
                Value::Null
            }
            AdminOp::DestroyDestination => {
                let target: DestinationRef = decode(request);
                self.destinations
                    .retain(|d| !d.matches(&target.name, target.dest_type));
                Value::Null
            }
            AdminOp::PauseDestination => {
                let pause: DestinationPause = decode(request);
                let state = pause.pause_kind.resulting_state();
                for dest in self
                    .destinations
                    .iter_mut()
                    .filter(|d| pause.target.matches(&d.name, d.dest_type))
                {
                    dest.state = state;
                }
                Value::Null
            }
            AdminOp::ResumeDestination => {
                let query: DestinationQuery = decode(request);
                for dest in self
                    .destinations
                    .iter_mut()
                    .filter(|d| query.matches(&d.name, d.dest_type))
                {
                    dest.state = DestState::Running;
                }
                Value::Null
            }
            AdminOp::PurgeDestination => {
                let target: DestinationRef = decode(request);
                for dest in self
                    .destinations
                    .iter_mut()
                    .filter(|d| d.matches(&target.name, target.dest_type))
                {
                    dest.message_count = 0;
                    dest.message_bytes = 0;
                }
                Value::Null
            }
            AdminOp::UpdateDestination => {
                let info: DestinationInfo = decode(request);
                if let Some(dest) = self
                    .destinations
                    .iter_mut()
                    .find(|d| d.matches(&info.name, info.dest_type))
                {
                    *dest = info;
                }
                Value::Null
            }
            AdminOp::GetDurables => {
                let query: DurableQuery = decode(request);
                json!(self.durables.get(&query.dest_name).cloned().unwrap_or_default())
            }
            AdminOp::DestroyDurable | AdminOp::PurgeDurable => {
                let target: DurableRef = decode(request);
                for list in self.durables.values_mut() {
                    if op == AdminOp::DestroyDurable {
                        list.retain(|d| !d.matches(&target.name, target.client_id.as_deref()));
                    } else {
                        for durable in list
                            .iter_mut()
                            .filter(|d| d.matches(&target.name, target.client_id.as_deref()))
                        {
                            durable.message_count = 0;
                        }
                    }
                }
                Value::Null
            }
        };
        Some(Reply::ok(request, payload))
    }
}

/// Collects every event published on `bus`.
pub fn record(bus: &EventBus) -> broadcast::Receiver<Arc<Event>> {
    bus.channel(256).1
}

/// Everything received so far, without waiting.
pub fn drain(rx: &mut broadcast::Receiver<Arc<Event>>) -> Vec<Arc<Event>> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
