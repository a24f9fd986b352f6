#![allow(clippy::unwrap_used)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{BrokerState, PASSWORD, ScriptedBroker, drain, record, scripted};
use mqadmin_api::AdminOp;
use mqadmin_core::{
    Action, Command, CommandError, ConnectError, Controller, ControllerConfig, CoreError,
    Credentials, DestState, DestType, DestinationInfo, ErrorKind, Event, EventKind, Intent,
    NodeData, RefreshTarget, ServiceState, SessionConfig, SessionId, SessionState,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::sync::broadcast;

struct Fixture {
    controller: Controller,
    session: SessionId,
    broker: ScriptedBroker,
    events: broadcast::Receiver<Arc<Event>>,
}

async fn fixture(state: BrokerState) -> Fixture {
    let controller = Controller::new(ControllerConfig::default());
    let events = record(controller.bus());
    let (transport, broker) = scripted(state);
    let config = SessionConfig::new("local", "localhost", 7676)
        .with_credentials(Credentials::new("admin", PASSWORD));
    let session = controller.add_broker(config, transport).await.unwrap();
    Fixture {
        controller,
        session,
        broker,
        events,
    }
}

async fn connected(state: BrokerState) -> Fixture {
    let mut f = fixture(state).await;
    f.run(Command::Connect { credentials: None }).await.unwrap();
    drain(&mut f.events);
    f
}

impl Fixture {
    async fn run(&self, command: Command) -> Result<mqadmin_core::IntentOutcome, CoreError> {
        self.controller
            .execute(Intent::new(self.session, command))
            .await
    }

    fn root(&self) -> mqadmin_core::NodeId {
        self.controller.broker_node(self.session).unwrap()
    }

    fn service_names(&self) -> Vec<String> {
        let tree = self.controller.tree();
        let list = tree.service_list(self.root()).unwrap();
        tree.child_data(list)
            .filter_map(NodeData::as_service)
            .map(|s| s.name.clone())
            .collect()
    }

    fn destination_names(&self) -> Vec<String> {
        let tree = self.controller.tree();
        let list = tree.dest_list(self.root()).unwrap();
        tree.child_data(list)
            .filter_map(NodeData::as_destination)
            .map(|d| d.name.clone())
            .collect()
    }
}

fn kinds(events: &[Arc<Event>]) -> Vec<&EventKind> {
    events.iter().map(|event| &event.kind).collect()
}

fn topology_changes(events: &[Arc<Event>]) -> usize {
    events
        .iter()
        .filter(|event| matches!(event.kind, EventKind::TopologyChanged { .. }))
        .count()
}

// ── Connection ──────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn good_connect_populates_the_broker() {
    let mut f = fixture(BrokerState::standard()).await;
    assert!(matches!(
        kinds(&drain(&mut f.events))[0],
        EventKind::BrokerAdded { .. }
    ));
    f.run(Command::Connect { credentials: None }).await.unwrap();

    let session = f.controller.session(f.session).unwrap();
    assert_eq!(session.state(), SessionState::Connected);
    assert!(!session.is_busy());

    let events = drain(&mut f.events);
    assert!(matches!(kinds(&events)[0], EventKind::ConnectSucceeded));
    assert!(!events
        .iter()
        .any(|e| matches!(e.kind, EventKind::CommandSucceeded { .. })));

    assert_eq!(f.service_names(), vec!["jms", "admin"]);
    // Temporary and admin destinations stay out of the tree.
    assert_eq!(f.destination_names(), vec!["orders", "prices"]);

    let tree = f.controller.tree();
    let broker = tree.data(f.root()).and_then(NodeData::as_broker).unwrap();
    assert!(broker.connected);
    assert_eq!(broker.props.get("imqInstanceName").map(String::as_str), Some("imqbroker"));
    let actions = tree.actions_for(f.root());
    assert!(actions.contains(Action::Disconnect));
    assert!(actions.contains(Action::Pause));
    assert!(!actions.contains(Action::Connect));
}

#[tokio::test(start_paused = true)]
async fn bad_connect_leaves_the_tree_alone() {
    let mut f = fixture(BrokerState::standard()).await;
    drain(&mut f.events);
    let before = f.controller.tree().snapshot(f.root());

    let err = f
        .run(Command::Connect {
            credentials: Some(Credentials::new("admin", "wrong")),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Connect(ConnectError::InvalidCredentials)));

    let session = f.controller.session(f.session).unwrap();
    assert_eq!(session.state(), SessionState::Disconnected);

    let events = drain(&mut f.events);
    let failed = events
        .iter()
        .find_map(|e| match &e.kind {
            EventKind::ConnectFailed { reason } => Some(reason.kind),
            _ => None,
        })
        .unwrap();
    assert_eq!(failed, ErrorKind::InvalidCredentials);
    assert!(!events
        .iter()
        .any(|e| matches!(e.kind, EventKind::CommandFailed { .. })));

    let after = f.controller.tree().snapshot(f.root());
    assert_eq!(before.map(|v| v.data), after.map(|v| v.data));
    assert!(f.service_names().is_empty());
}

#[tokio::test(start_paused = true)]
async fn disconnect_clears_the_broker() {
    let f = connected(BrokerState::standard()).await;
    f.run(Command::Disconnect).await.unwrap();

    assert!(f.service_names().is_empty());
    assert!(f.destination_names().is_empty());
    let tree = f.controller.tree();
    let broker = tree.data(f.root()).and_then(NodeData::as_broker).unwrap();
    assert!(!broker.connected);
    assert!(broker.props.is_empty());
    assert!(tree.actions_for(f.root()).contains(Action::Connect));
}

#[tokio::test(start_paused = true)]
async fn commands_on_a_disconnected_broker_fail() {
    let mut f = fixture(BrokerState::standard()).await;
    drain(&mut f.events);

    let err = f.run(Command::PauseBroker).await.unwrap_err();
    assert!(matches!(err, CoreError::Command(CommandError::NotConnected)));
    let events = drain(&mut f.events);
    assert!(events.iter().any(|e| matches!(
        &e.kind,
        EventKind::CommandFailed { op: AdminOp::PauseBroker, error } if error.kind == ErrorKind::NotConnected
    )));
}

// ── Services ────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn pausing_a_service_flips_its_actions() {
    let mut f = connected(BrokerState::standard()).await;

    let outcome = f
        .run(Command::PauseService { name: "jms".into() })
        .await
        .unwrap();
    assert!(!outcome.stale);

    let tree = f.controller.tree();
    let jms = tree.find_service(f.root(), "jms").unwrap();
    assert_eq!(outcome.node, jms);
    assert_eq!(
        tree.data(jms).and_then(NodeData::as_service).unwrap().state,
        ServiceState::Paused
    );
    let actions = tree.actions_for(jms);
    assert!(actions.contains(Action::Resume));
    assert!(!actions.contains(Action::Pause));

    let events = drain(&mut f.events);
    let kinds = kinds(&events);
    assert!(matches!(
        kinds[0],
        EventKind::CommandSucceeded {
            op: AdminOp::PauseService
        }
    ));
    match kinds[1] {
        EventKind::TopologyChanged { node, actions } => {
            assert_eq!(*node, jms);
            // The service, then its list, then the broker root.
            let path: Vec<_> = actions.iter().map(|(id, _)| *id).collect();
            assert_eq!(path[0], jms);
            assert_eq!(path.last().copied(), Some(f.root()));
        }
        other => panic!("expected a topology change, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn pausing_the_broker_pauses_normal_services_only() {
    let f = connected(BrokerState::standard()).await;
    f.run(Command::PauseBroker).await.unwrap();

    let tree = f.controller.tree();
    let state_of = |name: &str| {
        let node = tree.find_service(f.root(), name).unwrap();
        tree.data(node).and_then(NodeData::as_service).unwrap().state
    };
    assert_eq!(state_of("jms"), ServiceState::Paused);
    assert_eq!(state_of("admin"), ServiceState::Running);
    let actions = tree.actions_for(f.root());
    assert!(actions.contains(Action::Resume));
    assert!(!actions.contains(Action::Pause));
}

#[tokio::test(start_paused = true)]
async fn refreshing_twice_gives_the_same_children_and_one_change_each() {
    let mut f = connected(BrokerState::standard()).await;

    f.run(Command::Refresh(RefreshTarget::ServiceList)).await.unwrap();
    let first = f.service_names();
    let first_events = drain(&mut f.events);

    f.run(Command::Refresh(RefreshTarget::ServiceList)).await.unwrap();
    let second = f.service_names();
    let second_events = drain(&mut f.events);

    assert_eq!(first, second);
    assert_eq!(topology_changes(&first_events), 1);
    assert_eq!(topology_changes(&second_events), 1);
}

#[tokio::test(start_paused = true)]
async fn unanswered_refresh_marks_the_list_stale_until_the_late_reply() {
    let f = connected(BrokerState::standard()).await;
    f.broker
        .state
        .lock()
        .unwrap()
        .silent
        .insert(AdminOp::GetServices);

    let outcome = f
        .run(Command::Refresh(RefreshTarget::ServiceList))
        .await
        .unwrap();
    assert!(outcome.stale);
    let list = f.controller.tree().service_list(f.root()).unwrap();
    assert_eq!(outcome.node, list);
    assert!(f.controller.tree().get(list).unwrap().is_stale());
    // Previous children survive the failed refresh.
    assert_eq!(f.service_names(), vec!["jms", "admin"]);

    // Silence is waited out, never resent.
    assert_eq!(f.broker.state.lock().unwrap().held.len(), 1);

    // The late answer no longer lists the admin service.
    f.broker
        .release(json!([{"name": "jms", "kind": "normal", "state": "running"}]));
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(!f.controller.tree().get(list).unwrap().is_stale());
    assert_eq!(f.service_names(), vec!["jms"]);
}

#[tokio::test(start_paused = true)]
async fn malformed_service_list_is_reported_and_keeps_the_session() {
    let mut f = connected(BrokerState::standard()).await;
    f.broker
        .state
        .lock()
        .unwrap()
        .payloads
        .insert(AdminOp::GetServices, json!("garbage"));

    let err = f
        .run(Command::Refresh(RefreshTarget::ServiceList))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Command(CommandError::ProtocolError { .. })));

    let events = drain(&mut f.events);
    assert!(events.iter().any(|e| matches!(
        &e.kind,
        EventKind::CommandFailed { op: AdminOp::GetServices, error } if error.kind == ErrorKind::ProtocolError
    )));
    assert_eq!(f.service_names(), vec!["jms", "admin"]);
    assert!(f.controller.session(f.session).unwrap().is_connected());
}

// ── Destinations ────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn create_and_destroy_a_destination() {
    let f = connected(BrokerState::standard()).await;

    let outcome = f
        .run(Command::CreateDestination {
            info: DestinationInfo::new("invoices", DestType::Queue),
        })
        .await
        .unwrap();
    assert_eq!(f.destination_names(), vec!["orders", "prices", "invoices"]);
    assert_eq!(
        Some(outcome.node),
        f.controller
            .tree()
            .find_destination(f.root(), "invoices", DestType::Queue)
    );

    f.run(Command::DestroyDestination {
        name: "invoices".into(),
        dest_type: DestType::Queue,
    })
    .await
    .unwrap();
    assert_eq!(f.destination_names(), vec!["orders", "prices"]);
}

#[tokio::test(start_paused = true)]
async fn rejected_command_reports_and_leaves_the_tree() {
    let mut f = connected(BrokerState::standard()).await;
    f.broker
        .state
        .lock()
        .unwrap()
        .rejects
        .insert(AdminOp::CreateDestination, (409, "destination exists".into()));

    let err = f
        .run(Command::CreateDestination {
            info: DestinationInfo::new("orders", DestType::Queue),
        })
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::Command(CommandError::Rejected { code: 409, .. })
    ));

    let events = drain(&mut f.events);
    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0].kind,
        EventKind::CommandFailed {
            op: AdminOp::CreateDestination,
            ..
        }
    ));
    assert_eq!(f.destination_names(), vec!["orders", "prices"]);
}

#[tokio::test(start_paused = true)]
async fn pausing_a_destination_enables_resume() {
    let f = connected(BrokerState::standard()).await;
    let outcome = f
        .run(Command::PauseDestination {
            name: "orders".into(),
            dest_type: DestType::Queue,
            pause_kind: mqadmin_core::PauseKind::All,
        })
        .await
        .unwrap();

    let tree = f.controller.tree();
    let orders = tree
        .find_destination(f.root(), "orders", DestType::Queue)
        .unwrap();
    assert_eq!(outcome.node, orders);
    assert_eq!(
        tree.data(orders).and_then(NodeData::as_destination).unwrap().state,
        DestState::Paused
    );
    assert!(tree.actions_for(orders).contains(Action::Resume));
    assert!(!tree.actions_for(orders).contains(Action::Pause));
}

#[tokio::test(start_paused = true)]
async fn refreshing_a_topic_lists_its_durables() {
    let f = connected(BrokerState::standard()).await;
    let outcome = f
        .run(Command::Refresh(RefreshTarget::Destination {
            name: "prices".into(),
            dest_type: DestType::Topic,
        }))
        .await
        .unwrap();

    let tree = f.controller.tree();
    let durables: Vec<_> = tree
        .child_data(outcome.node)
        .filter_map(NodeData::as_durable)
        .map(|d| d.name.clone())
        .collect();
    assert_eq!(durables, vec!["ticker"]);

    f.run(Command::DestroyDurable {
        name: "ticker".into(),
        client_id: Some("desk-1".into()),
        topic: "prices".into(),
    })
    .await
    .unwrap();
    assert_eq!(f.controller.tree().child_data(outcome.node).count(), 0);
}

// ── Queueing and lifecycle ──────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn full_queue_fails_fast() {
    let f = connected(BrokerState::standard()).await;
    f.broker
        .state
        .lock()
        .unwrap()
        .silent
        .insert(AdminOp::GetBrokerProps);

    let intent = || Intent::new(f.session, Command::QueryBroker);
    let in_flight = f.controller.submit(intent()).unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(f.controller.session(f.session).unwrap().is_busy());

    let queued: Vec<_> = (0..3).map(|_| f.controller.submit(intent()).unwrap()).collect();
    let err = f.controller.submit(intent()).unwrap_err();
    assert!(matches!(err, CoreError::QueueFull { session } if session == f.session));

    drop(queued);
    drop(in_flight);
}

#[tokio::test(start_paused = true)]
async fn losing_the_broker_while_loading_fails_the_connect() {
    let mut f = fixture(BrokerState {
        hang_up_on: Some(AdminOp::GetServices),
        ..BrokerState::standard()
    })
    .await;
    drain(&mut f.events);

    let err = f.run(Command::Connect { credentials: None }).await.unwrap_err();
    assert!(matches!(err, CoreError::Command(CommandError::ConnectionLost { .. })));

    let session = f.controller.session(f.session).unwrap();
    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(f.service_names().is_empty());
    let tree = f.controller.tree();
    let broker = tree.data(f.root()).and_then(NodeData::as_broker).unwrap();
    assert!(!broker.connected);
    assert!(drain(&mut f.events)
        .iter()
        .any(|e| matches!(e.kind, EventKind::ConnectionLost { .. })));
}

#[tokio::test(start_paused = true)]
async fn restart_reconnects_and_repopulates() {
    let mut f = connected(BrokerState::standard()).await;
    // The broker is still coming back up on the first reconnect attempt.
    f.broker.state.lock().unwrap().refuse_opens = 1;

    f.run(Command::Restart { credentials: None }).await.unwrap();

    let session = f.controller.session(f.session).unwrap();
    assert_eq!(session.state(), SessionState::Connected);
    assert_eq!(f.broker.state.lock().unwrap().opens, 3);
    assert_eq!(f.service_names(), vec!["jms", "admin"]);

    let events = drain(&mut f.events);
    assert!(events.iter().any(|e| matches!(
        e.kind,
        EventKind::ReconnectProgress { attempt: 1, max: 5 }
    )));
    assert!(events
        .iter()
        .any(|e| matches!(e.kind, EventKind::ConnectSucceeded)));
    assert!(events.iter().any(|e| matches!(
        e.kind,
        EventKind::CommandSucceeded {
            op: AdminOp::Shutdown
        }
    )));
}

#[tokio::test(start_paused = true)]
async fn removing_a_broker_drops_its_subtree() {
    let mut f = connected(BrokerState::standard()).await;
    let root = f.root();

    f.controller.remove_broker(f.session).await.unwrap();

    assert!(!f.controller.tree().contains(root));
    assert!(f.controller.session(f.session).is_none());
    assert!(f.controller.broker_configs().is_empty());
    let events = drain(&mut f.events);
    assert!(events
        .iter()
        .any(|e| matches!(e.kind, EventKind::BrokerRemoved)));

    let err = f
        .controller
        .submit(Intent::new(f.session, Command::QueryBroker))
        .unwrap_err();
    assert!(matches!(err, CoreError::UnknownSession(id) if id == f.session));
}

#[tokio::test(start_paused = true)]
async fn broker_configs_keep_insertion_order() {
    let f = fixture(BrokerState::standard()).await;
    let (transport, _second) = scripted(BrokerState::standard());
    f.controller
        .add_broker(SessionConfig::new("remote", "mq2", 7777), transport)
        .await
        .unwrap();

    let keys: Vec<_> = f
        .controller
        .broker_configs()
        .into_iter()
        .map(|c| c.key)
        .collect();
    assert_eq!(keys, vec!["local", "remote"]);
    assert_eq!(f.controller.tree().roots().len(), 2);
}

// ── Broker entries ──────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn duplicate_broker_name_is_refused() {
    let f = fixture(BrokerState::standard()).await;
    let (transport, _second) = scripted(BrokerState::standard());
    let err = f
        .controller
        .add_broker(SessionConfig::new("local", "mq2", 7777), transport)
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::BrokerExists { ref key } if key == "local"));
    assert_eq!(err.kind(), ErrorKind::BrokerExists);
    assert_eq!(f.controller.broker_configs().len(), 1);
    assert_eq!(f.controller.tree().roots().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn editing_a_disconnected_entry_updates_the_broker_node() {
    let mut f = fixture(BrokerState::standard()).await;
    drain(&mut f.events);

    let edited = SessionConfig::new("lab", "mq3", 7800)
        .with_credentials(Credentials::new("admin", PASSWORD));
    f.controller.update_broker_entry(f.session, edited).await.unwrap();

    let configs = f.controller.broker_configs();
    assert_eq!(configs.len(), 1);
    assert_eq!(configs[0].key, "lab");
    assert_eq!(configs[0].address(), "mq3:7800");

    let tree = f.controller.tree();
    let broker = tree.data(f.root()).and_then(NodeData::as_broker).unwrap();
    assert_eq!(broker.key, "lab");
    assert_eq!(broker.host, "mq3");
    assert_eq!(broker.port, 7800);
    assert_eq!(topology_changes(&drain(&mut f.events)), 1);

    // The edited entry still connects.
    f.run(Command::Connect { credentials: None }).await.unwrap();
    assert_eq!(f.service_names(), vec!["jms", "admin"]);
}

#[tokio::test(start_paused = true)]
async fn bad_edits_leave_the_entry_alone() {
    let f = fixture(BrokerState::standard()).await;
    let (transport, _second) = scripted(BrokerState::standard());
    f.controller
        .add_broker(SessionConfig::new("remote", "mq2", 7777), transport)
        .await
        .unwrap();

    let err = f
        .controller
        .update_broker_entry(f.session, SessionConfig::new("remote", "mq9", 7676))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::BrokerExists { ref key } if key == "remote"));

    let err = f
        .controller
        .update_broker_entry(f.session, SessionConfig::new("local", "localhost", 0))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::InvalidBrokerEntry { field: "port", .. }));

    let err = f
        .controller
        .update_broker_entry(f.session, SessionConfig::new("local", "bad host", 7676))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::InvalidBrokerEntry { field: "host", .. }));

    let local = &f.controller.broker_configs()[0];
    assert_eq!(local.key, "local");
    assert_eq!(local.address(), "localhost:7676");
    let tree = f.controller.tree();
    let broker = tree.data(f.root()).and_then(NodeData::as_broker).unwrap();
    assert_eq!((broker.host.as_str(), broker.port), ("localhost", 7676));
}

#[tokio::test(start_paused = true)]
async fn connected_entries_cannot_be_edited() {
    let f = connected(BrokerState::standard()).await;
    let err = f
        .controller
        .update_broker_entry(f.session, SessionConfig::new("local", "mq2", 7777))
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::SessionActive(id) if id == f.session));
    assert_eq!(f.controller.broker_configs()[0].address(), "localhost:7676");
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_accepting_intents() {
    let f = connected(BrokerState::standard()).await;
    f.controller.shutdown().await;

    let err = f
        .controller
        .submit(Intent::new(f.session, Command::QueryBroker))
        .unwrap_err();
    assert!(matches!(err, CoreError::ControllerStopped));
}
