// ── Session worker ──
//
// One task per broker session. Pulls queued intents in submission order,
// runs the admin calls they need, and hands the raw results to the
// topology owner. While idle with abandoned queries outstanding, it keeps
// reading the transport so late replies are not lost.

use std::sync::Arc;

use mqadmin_api::AdminOp;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::owner::{Outcome, OwnerMsg};
use crate::command::requests::{
    BrokerUpdate, DestinationPause, DestinationQuery, DestinationRef, DurableQuery, DurableRef,
    ServiceQuery, ServiceRef, ServiceUpdate, ShutdownRequest,
};
use crate::command::{Command, CommandEnvelope, RefreshTarget};
use crate::config::ControllerConfig;
use crate::correlator::{CallOptions, Correlator};
use crate::error::{CommandError, CoreError};
use crate::model::{
    BrokerProps, DestState, DestType, DestinationInfo, DurableInfo, NodeId, ServiceInfo,
    ServiceState,
};
use crate::session::Session;
use crate::topology::TopologyTree;

// ── Work results ─────────────────────────────────────────────────

/// Result of a query that is allowed to go unanswered.
#[derive(Debug, Clone)]
pub(crate) enum Fetch<T> {
    Fresh(T),
    Stale,
}

impl<T> Fetch<T> {
    pub(crate) fn map<U>(self, f: impl FnOnce(T) -> U) -> Fetch<U> {
        match self {
            Self::Fresh(value) => Fetch::Fresh(f(value)),
            Self::Stale => Fetch::Stale,
        }
    }

    pub(crate) fn is_stale(&self) -> bool {
        matches!(self, Self::Stale)
    }
}

/// Broker contents read after a connect or on a broker refresh.
#[derive(Debug, Clone)]
pub(crate) struct Populated {
    pub props: Fetch<BrokerProps>,
    pub services: Fetch<Vec<ServiceInfo>>,
    pub destinations: Fetch<Vec<DestinationInfo>>,
}

/// What the tree should show for a destination when its refresh went
/// unanswered.
#[derive(Debug, Clone)]
pub(crate) enum DestAssumption {
    Nothing,
    State(DestState),
    Purged,
    Replace(DestinationInfo),
}

/// Everything the topology owner needs to apply a successful intent.
#[derive(Debug, Clone)]
pub(crate) enum Work {
    Connected(Populated),
    Restarted(Populated),
    Broker(Populated),
    Disconnected,
    BrokerProps(Fetch<BrokerProps>),
    Services {
        fetched: Fetch<Vec<ServiceInfo>>,
        assumed: Option<ServiceState>,
    },
    Service {
        name: String,
        fetched: Fetch<Option<ServiceInfo>>,
        assumed: Option<ServiceState>,
    },
    Destinations {
        fetched: Fetch<Vec<DestinationInfo>>,
        assumed: Option<DestState>,
    },
    Destination {
        name: String,
        dest_type: DestType,
        fetched: Fetch<Option<DestinationInfo>>,
        durables: Option<Fetch<Vec<DurableInfo>>>,
        assume: DestAssumption,
    },
    DestinationCreated {
        info: DestinationInfo,
        stale: bool,
    },
    DestinationRemoved {
        name: String,
        dest_type: DestType,
    },
    Durables {
        topic: String,
        fetched: Fetch<Vec<DurableInfo>>,
    },
}

// ── SessionWorker ────────────────────────────────────────────────

pub(crate) struct SessionWorker {
    session: Arc<Session>,
    correlator: Correlator,
    jobs: mpsc::Receiver<CommandEnvelope>,
    owner_tx: mpsc::UnboundedSender<OwnerMsg>,
    tree: watch::Receiver<Arc<TopologyTree>>,
    config: ControllerConfig,
    cancel: CancellationToken,
}

impl SessionWorker {
    pub(crate) fn new(
        session: Arc<Session>,
        correlator: Correlator,
        jobs: mpsc::Receiver<CommandEnvelope>,
        owner_tx: mpsc::UnboundedSender<OwnerMsg>,
        tree: watch::Receiver<Arc<TopologyTree>>,
        config: ControllerConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            session,
            correlator,
            jobs,
            owner_tx,
            tree,
            config,
            cancel,
        }
    }

    pub(crate) async fn run(mut self) {
        debug!(session = %self.session.id(), "session worker started");
        loop {
            let draining = self.correlator.has_abandoned() && self.session.is_connected();
            let envelope = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                job = self.jobs.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
                () = self.correlator.drain_late(&self.session), if draining => continue,
            };
            self.handle(envelope).await;
        }
        debug!(session = %self.session.id(), "session worker stopped");
    }

    async fn handle(&mut self, envelope: CommandEnvelope) {
        let CommandEnvelope {
            id,
            command,
            response_tx,
        } = envelope;
        let session = Arc::clone(&self.session);
        debug!(session = %session.id(), intent = %id, op = ?command.op(), "intent in flight");

        let snapshot = Arc::clone(&self.tree.borrow());
        let result = {
            let mut exec = Exec {
                session: &session,
                correlator: &mut self.correlator,
                tree: snapshot,
                config: &self.config,
                cancel: &self.cancel,
            };
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => Err(CoreError::ControllerStopped),
                result = exec.run(&command) => result,
            }
        };
        if !session.is_connected() {
            self.correlator.clear_abandoned();
        }

        let (applied_tx, applied_rx) = oneshot::channel();
        let outcome = Outcome {
            session: session.id(),
            intent: id,
            command,
            result,
            connected: session.is_connected(),
            response_tx,
            applied_tx,
        };
        if self.owner_tx.send(OwnerMsg::Outcome(Box::new(outcome))).is_err() {
            return;
        }
        // The next intent must see this one's tree changes.
        let _ = applied_rx.await;
    }
}

// ── Intent execution ─────────────────────────────────────────────

struct Exec<'a> {
    session: &'a Session,
    correlator: &'a mut Correlator,
    tree: Arc<TopologyTree>,
    config: &'a ControllerConfig,
    cancel: &'a CancellationToken,
}

impl Exec<'_> {
    #[allow(clippy::too_many_lines)]
    async fn run(&mut self, command: &Command) -> Result<Work, CoreError> {
        let root = self
            .tree
            .broker_root(self.session.id())
            .ok_or(CoreError::UnknownSession(self.session.id()))?;

        let work = match command {
            // ── Connection ──
            Command::Connect { credentials } => {
                self.session.connect(credentials.as_ref()).await?;
                Work::Connected(self.populate_live(root).await?)
            }
            Command::Disconnect => {
                self.session.disconnect().await?;
                Work::Disconnected
            }
            Command::Shutdown => {
                self.call(AdminOp::Shutdown, &ShutdownRequest { restart: false })
                    .await?;
                self.session.force_close().await;
                Work::Disconnected
            }
            Command::Restart { credentials } => {
                self.call(AdminOp::Shutdown, &ShutdownRequest { restart: true })
                    .await?;
                self.session.force_close().await;

                let policy = self.session.config().reconnect;
                let deadline = self.config.reconnect_deadline.map(|d| Instant::now() + d);
                self.session
                    .reconnect(
                        credentials.as_ref(),
                        policy.attempts(),
                        policy.delay,
                        self.cancel,
                        deadline,
                    )
                    .await?;
                Work::Restarted(self.populate_live(root).await?)
            }

            // ── Broker ──
            Command::QueryBroker => {
                Work::BrokerProps(self.query(AdminOp::GetBrokerProps, &(), Some(root)).await?)
            }
            Command::UpdateBroker { props } => {
                self.call(
                    AdminOp::UpdateBroker,
                    &BrokerUpdate {
                        props: props.clone(),
                    },
                )
                .await?;
                Work::BrokerProps(self.follow_up(AdminOp::GetBrokerProps, &(), Some(root)).await)
            }
            Command::PauseBroker | Command::ResumeBroker => {
                let (op, assumed) = if matches!(command, Command::PauseBroker) {
                    (AdminOp::PauseBroker, ServiceState::Paused)
                } else {
                    (AdminOp::ResumeBroker, ServiceState::Running)
                };
                self.call(op, &()).await?;
                let list = self.tree.service_list(root);
                Work::Services {
                    fetched: self
                        .follow_up(AdminOp::GetServices, &ServiceQuery::default(), list)
                        .await,
                    assumed: Some(assumed),
                }
            }

            // ── Services ──
            Command::PauseService { name } | Command::ResumeService { name } => {
                let (op, assumed) = if matches!(command, Command::PauseService { .. }) {
                    (AdminOp::PauseService, ServiceState::Paused)
                } else {
                    (AdminOp::ResumeService, ServiceState::Running)
                };
                self.call(op, &ServiceRef { name: name.clone() }).await?;
                Work::Service {
                    name: name.clone(),
                    fetched: self.refresh_service(root, name, false).await?,
                    assumed: Some(assumed),
                }
            }
            Command::UpdateService { name, props } => {
                self.call(
                    AdminOp::UpdateService,
                    &ServiceUpdate {
                        name: name.clone(),
                        props: props.clone(),
                    },
                )
                .await?;
                Work::Service {
                    name: name.clone(),
                    fetched: self.refresh_service(root, name, false).await?,
                    assumed: None,
                }
            }

            // ── Destinations ──
            Command::CreateDestination { info } => {
                self.call(AdminOp::CreateDestination, info).await?;
                let fetched = self
                    .refresh_destination(root, &info.name, info.dest_type, false)
                    .await?;
                match fetched {
                    Fetch::Fresh(Some(fresh)) => Work::DestinationCreated {
                        info: fresh,
                        stale: false,
                    },
                    Fetch::Fresh(None) | Fetch::Stale => Work::DestinationCreated {
                        info: info.clone(),
                        stale: true,
                    },
                }
            }
            Command::DestroyDestination { name, dest_type } => {
                self.call(
                    AdminOp::DestroyDestination,
                    &DestinationRef {
                        name: name.clone(),
                        dest_type: *dest_type,
                    },
                )
                .await?;
                Work::DestinationRemoved {
                    name: name.clone(),
                    dest_type: *dest_type,
                }
            }
            Command::PauseDestination {
                name,
                dest_type,
                pause_kind,
            } => {
                let payload = DestinationPause {
                    target: DestinationQuery::one(name.clone(), *dest_type),
                    pause_kind: *pause_kind,
                };
                self.call(AdminOp::PauseDestination, &payload).await?;
                self.destination_work(
                    root,
                    name,
                    *dest_type,
                    DestAssumption::State(pause_kind.resulting_state()),
                )
                .await?
            }
            Command::ResumeDestination { name, dest_type } => {
                self.call(
                    AdminOp::ResumeDestination,
                    &DestinationQuery::one(name.clone(), *dest_type),
                )
                .await?;
                self.destination_work(root, name, *dest_type, DestAssumption::State(DestState::Running))
                    .await?
            }
            Command::PauseAllDestinations | Command::ResumeAllDestinations => {
                let assumed = if matches!(command, Command::PauseAllDestinations) {
                    self.call(AdminOp::PauseDestination, &DestinationPause::default())
                        .await?;
                    DestState::Paused
                } else {
                    self.call(AdminOp::ResumeDestination, &DestinationQuery::default())
                        .await?;
                    DestState::Running
                };
                let list = self.tree.dest_list(root);
                Work::Destinations {
                    fetched: self
                        .follow_up(AdminOp::GetDestinations, &DestinationQuery::default(), list)
                        .await,
                    assumed: Some(assumed),
                }
            }
            Command::PurgeDestination { name, dest_type } => {
                self.call(
                    AdminOp::PurgeDestination,
                    &DestinationRef {
                        name: name.clone(),
                        dest_type: *dest_type,
                    },
                )
                .await?;
                self.destination_work(root, name, *dest_type, DestAssumption::Purged)
                    .await?
            }
            Command::UpdateDestination { info } => {
                self.call(AdminOp::UpdateDestination, info).await?;
                self.destination_work(
                    root,
                    &info.name,
                    info.dest_type,
                    DestAssumption::Replace(info.clone()),
                )
                .await?
            }

            // ── Durables ──
            Command::DestroyDurable {
                name,
                client_id,
                topic,
            }
            | Command::PurgeDurable {
                name,
                client_id,
                topic,
            } => {
                let op = if matches!(command, Command::DestroyDurable { .. }) {
                    AdminOp::DestroyDurable
                } else {
                    AdminOp::PurgeDurable
                };
                self.call(
                    op,
                    &DurableRef {
                        name: name.clone(),
                        client_id: client_id.clone(),
                    },
                )
                .await?;
                let node = self.tree.find_destination(root, topic, DestType::Topic);
                Work::Durables {
                    topic: topic.clone(),
                    fetched: self.durables(topic, node, false).await?,
                }
            }

            // ── Refresh ──
            Command::Refresh(target) => match target {
                RefreshTarget::Broker => Work::Broker(self.populate(root, true).await?),
                RefreshTarget::ServiceList => {
                    let list = self.tree.service_list(root);
                    Work::Services {
                        fetched: self
                            .query(AdminOp::GetServices, &ServiceQuery::default(), list)
                            .await?,
                        assumed: None,
                    }
                }
                RefreshTarget::Service { name } => Work::Service {
                    name: name.clone(),
                    fetched: self.refresh_service(root, name, true).await?,
                    assumed: None,
                },
                RefreshTarget::DestinationList => {
                    let list = self.tree.dest_list(root);
                    Work::Destinations {
                        fetched: self
                            .query(AdminOp::GetDestinations, &DestinationQuery::default(), list)
                            .await?,
                        assumed: None,
                    }
                }
                RefreshTarget::Destination { name, dest_type } => {
                    let fetched = self.refresh_destination(root, name, *dest_type, true).await?;
                    let node = self.tree.find_destination(root, name, *dest_type);
                    let durables = if *dest_type == DestType::Topic {
                        Some(self.durables(name, node, true).await?)
                    } else {
                        None
                    };
                    Work::Destination {
                        name: name.clone(),
                        dest_type: *dest_type,
                        fetched,
                        durables,
                        assume: DestAssumption::Nothing,
                    }
                }
            },
        };
        Ok(work)
    }

    // ── Calls ────────────────────────────────────────────────────

    fn deadline(&self) -> Option<Instant> {
        self.config.command_deadline.map(|d| Instant::now() + d)
    }

    async fn call<P: Serialize + ?Sized>(
        &mut self,
        op: AdminOp,
        payload: &P,
    ) -> Result<Value, CommandError> {
        let payload = encode(payload)?;
        let options = CallOptions::command().with_deadline(self.deadline());
        self.correlator
            .call(self.session, op, payload, options)
            .await
    }

    /// Query whose missing reply degrades `node` to stale. Other failures
    /// propagate.
    async fn query<T: DeserializeOwned, P: Serialize + ?Sized>(
        &mut self,
        op: AdminOp,
        payload: &P,
        node: Option<NodeId>,
    ) -> Result<Fetch<T>, CommandError> {
        if let Some(node) = node {
            self.session.mark_associated(node);
        }
        let payload = encode(payload)?;
        let options = CallOptions::query().with_deadline(self.deadline());
        match self.correlator.call(self.session, op, payload, options).await {
            Ok(value) => serde_json::from_value(value)
                .map(Fetch::Fresh)
                .map_err(|e| CommandError::ProtocolError {
                    message: format!("undecodable {op} reply: {e}"),
                }),
            Err(e) if e.is_no_reply() => {
                warn!(session = %self.session.id(), op = %op, "no reply to query, marking stale");
                Ok(Fetch::Stale)
            }
            Err(e) => Err(e),
        }
    }

    /// Refresh after a command that already succeeded; never fails it.
    async fn follow_up<T: DeserializeOwned, P: Serialize + ?Sized>(
        &mut self,
        op: AdminOp,
        payload: &P,
        node: Option<NodeId>,
    ) -> Fetch<T> {
        match self.query(op, payload, node).await {
            Ok(fetched) => fetched,
            Err(e) => {
                warn!(session = %self.session.id(), op = %op, error = %e, "refresh after command failed");
                Fetch::Stale
            }
        }
    }

    /// Non-fatal follow-up, or a fatal query for explicit refreshes.
    async fn fetch<T: DeserializeOwned, P: Serialize + ?Sized>(
        &mut self,
        op: AdminOp,
        payload: &P,
        node: Option<NodeId>,
        explicit: bool,
    ) -> Result<Fetch<T>, CommandError> {
        if explicit {
            self.query(op, payload, node).await
        } else {
            Ok(self.follow_up(op, payload, node).await)
        }
    }

    async fn populate(&mut self, root: NodeId, explicit: bool) -> Result<Populated, CommandError> {
        let services_list = self.tree.service_list(root);
        let dest_list = self.tree.dest_list(root);
        Ok(Populated {
            props: self
                .fetch(AdminOp::GetBrokerProps, &(), Some(root), explicit)
                .await?,
            services: self
                .fetch(AdminOp::GetServices, &ServiceQuery::default(), services_list, explicit)
                .await?,
            destinations: self
                .fetch(AdminOp::GetDestinations, &DestinationQuery::default(), dest_list, explicit)
                .await?,
        })
    }

    /// Populate right after a (re)connect. Fetch failures only leave stale
    /// nodes, but losing the connection on the way fails the intent.
    async fn populate_live(&mut self, root: NodeId) -> Result<Populated, CoreError> {
        let populated = self.populate(root, false).await?;
        if !self.session.is_connected() {
            return Err(CommandError::ConnectionLost {
                reason: "connection dropped while loading the broker".into(),
            }
            .into());
        }
        Ok(populated)
    }

    async fn refresh_service(
        &mut self,
        root: NodeId,
        name: &str,
        explicit: bool,
    ) -> Result<Fetch<Option<ServiceInfo>>, CommandError> {
        let node = self
            .tree
            .find_service(root, name)
            .or_else(|| self.tree.service_list(root));
        let query = ServiceQuery {
            name: Some(name.to_owned()),
        };
        let fetched: Fetch<Vec<ServiceInfo>> =
            self.fetch(AdminOp::GetServices, &query, node, explicit).await?;
        Ok(fetched.map(|services| services.into_iter().find(|s| s.name == name)))
    }

    async fn refresh_destination(
        &mut self,
        root: NodeId,
        name: &str,
        dest_type: DestType,
        explicit: bool,
    ) -> Result<Fetch<Option<DestinationInfo>>, CommandError> {
        let node = self
            .tree
            .find_destination(root, name, dest_type)
            .or_else(|| self.tree.dest_list(root));
        let query = DestinationQuery::one(name, dest_type);
        let fetched: Fetch<Vec<DestinationInfo>> = self
            .fetch(AdminOp::GetDestinations, &query, node, explicit)
            .await?;
        Ok(fetched.map(|dests| dests.into_iter().find(|d| d.matches(name, dest_type))))
    }

    async fn durables(
        &mut self,
        topic: &str,
        node: Option<NodeId>,
        explicit: bool,
    ) -> Result<Fetch<Vec<DurableInfo>>, CommandError> {
        let query = DurableQuery {
            dest_name: topic.to_owned(),
        };
        self.fetch(AdminOp::GetDurables, &query, node, explicit).await
    }

    /// Follow-up for a command on a single destination.
    async fn destination_work(
        &mut self,
        root: NodeId,
        name: &str,
        dest_type: DestType,
        assume: DestAssumption,
    ) -> Result<Work, CommandError> {
        let fetched = self.refresh_destination(root, name, dest_type, false).await?;
        Ok(Work::Destination {
            name: name.to_owned(),
            dest_type,
            fetched,
            durables: None,
            assume,
        })
    }
}

fn encode<P: Serialize + ?Sized>(payload: &P) -> Result<Value, CommandError> {
    serde_json::to_value(payload).map_err(|e| CommandError::ProtocolError {
        message: format!("cannot encode request: {e}"),
    })
}
