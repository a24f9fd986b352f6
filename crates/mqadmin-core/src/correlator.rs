// ── Command correlator ──
//
// Request/reply over a session's transport. One call holds the session's
// busy flag from send until the reply is resolved, retries while the
// broker stays busy or silent, and translates broker statuses into
// `CommandError`s. Queries the caller gave up on are remembered so a
// reply that shows up later can still be used.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use mqadmin_api::{AdminOp, Reply, ReplyStatus, Request};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::config::RetryPolicy;
use crate::error::CommandError;
use crate::model::{Event, EventKind, NodeId, SessionId};
use crate::session::Session;

/// Abandoned queries kept around for late replies.
const MAX_ABANDONED: usize = 32;
/// Receive window used while an idle worker drains late replies.
const DRAIN_WINDOW: Duration = Duration::from_secs(60);

/// Per-call knobs.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallOptions {
    /// First receive window; the session's reply timeout when `None`.
    pub timeout: Option<Duration>,
    /// Hard bound on the whole call, retries included.
    pub deadline: Option<Instant>,
    /// Remember the request if it goes unanswered.
    pub query: bool,
}

impl CallOptions {
    pub fn command() -> Self {
        Self::default()
    }

    pub fn query() -> Self {
        Self {
            query: true,
            ..Self::default()
        }
    }

    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Reply to an abandoned query that arrived after the call gave up.
#[derive(Debug, Clone, PartialEq)]
pub struct LateReply {
    pub session: SessionId,
    pub op: AdminOp,
    /// Node associated with the session when the query was abandoned.
    pub node: Option<NodeId>,
    pub payload: Value,
}

#[derive(Debug)]
struct AbandonedQuery {
    correlation_id: Uuid,
    op: AdminOp,
    node: Option<NodeId>,
}

pub struct Correlator {
    retry: RetryPolicy,
    abandoned: VecDeque<AbandonedQuery>,
    late_tx: Option<mpsc::UnboundedSender<LateReply>>,
}

impl Correlator {
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            retry,
            abandoned: VecDeque::new(),
            late_tx: None,
        }
    }

    /// Forward usable late replies to `tx`.
    pub fn with_late_replies(mut self, tx: mpsc::UnboundedSender<LateReply>) -> Self {
        self.late_tx = Some(tx);
        self
    }

    pub fn has_abandoned(&self) -> bool {
        !self.abandoned.is_empty()
    }

    pub fn clear_abandoned(&mut self) {
        self.abandoned.clear();
    }

    /// Send `op` and wait for its reply.
    pub async fn call(
        &mut self,
        session: &Session,
        op: AdminOp,
        payload: Value,
        options: CallOptions,
    ) -> Result<Value, CommandError> {
        if !session.is_connected() {
            return Err(CommandError::NotConnected);
        }
        let Some(_busy) = session.begin_command() else {
            return Err(CommandError::SessionBusy);
        };

        let request = Request::new(op, payload);
        let correlation_id = request.correlation_id;
        let first_window = options.timeout.unwrap_or_else(|| session.reply_timeout());
        let started = Instant::now();

        let exchange = self.exchange(session, request, first_window);
        let result = match options.deadline {
            Some(at) => tokio::time::timeout_at(at, exchange)
                .await
                .unwrap_or_else(|_| {
                    Err(CommandError::Timeout {
                        timeout_ms: millis(at.saturating_duration_since(started)),
                    })
                }),
            None => exchange.await,
        };

        match &result {
            Err(e) if options.query && e.is_no_reply() => {
                self.remember(correlation_id, op, session.associated());
            }
            Err(CommandError::ConnectionLost { reason }) => {
                self.abandoned.clear();
                session.mark_lost(reason);
            }
            Ok(_) => debug!(session = %session.id(), op = %op, "reply resolved"),
            Err(e) => debug!(session = %session.id(), op = %op, error = %e, "call failed"),
        }
        result
    }

    /// Keep reading the transport while abandoned queries are
    /// outstanding. Returns once none are left or the transport fails.
    /// Safe to drop at any await point.
    pub async fn drain_late(&mut self, session: &Session) {
        while self.has_abandoned() {
            match session.transport().receive(DRAIN_WINDOW).await {
                Ok(Some(reply)) => self.route_foreign(session, reply),
                Ok(None) => {}
                Err(e) => {
                    debug!(session = %session.id(), error = %e, "stopped draining late replies");
                    self.abandoned.clear();
                    if e.is_closed() {
                        session.mark_lost(&e.to_string());
                    }
                    return;
                }
            }
        }
    }

    async fn exchange(
        &mut self,
        session: &Session,
        request: Request,
        first_window: Duration,
    ) -> Result<Value, CommandError> {
        let transport = Arc::clone(session.transport());
        transport.send(request.clone()).await?;
        debug!(
            session = %session.id(),
            op = %request.op,
            id = %request.correlation_id,
            "request sent"
        );

        let max = self.retry.max_retries.max(1);
        let mut window = first_window;
        for attempt in 1..=max {
            let resend = match self.await_reply(session, &request, window).await? {
                Some(reply) if reply.status == ReplyStatus::Busy => true,
                Some(reply) => return decode(&request, reply),
                None if request.op.reply_optional() => {
                    debug!(session = %session.id(), op = %request.op, "no reply, treated as success");
                    return Ok(Value::Null);
                }
                None => false,
            };
            if attempt == max {
                break;
            }

            window = self.retry.retry_timeout;
            session.bus().publish(Event::from_session(
                session.id(),
                EventKind::BrokerBusy {
                    attempt,
                    max,
                    timeout: window,
                },
            ));
            if resend {
                debug!(session = %session.id(), op = %request.op, attempt, "broker busy, resending");
                transport.send(request.clone()).await?;
            } else {
                debug!(session = %session.id(), op = %request.op, attempt, "no reply yet, still waiting");
            }
        }
        Err(CommandError::NoReplyGiveUp { attempts: max })
    }

    /// Wait up to `window` for the reply carrying `request`'s correlation
    /// id. Other replies seen meanwhile are routed or dropped.
    async fn await_reply(
        &mut self,
        session: &Session,
        request: &Request,
        window: Duration,
    ) -> Result<Option<Reply>, CommandError> {
        let until = Instant::now() + window;
        loop {
            let remaining = until.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            match session.transport().receive(remaining).await? {
                None => return Ok(None),
                Some(reply) if reply.correlation_id == request.correlation_id => {
                    return Ok(Some(reply));
                }
                Some(reply) => self.route_foreign(session, reply),
            }
        }
    }

    fn remember(&mut self, correlation_id: Uuid, op: AdminOp, node: Option<NodeId>) {
        if self.abandoned.len() >= MAX_ABANDONED {
            self.abandoned.pop_front();
        }
        debug!(op = %op, id = %correlation_id, "query abandoned, waiting for late reply");
        self.abandoned.push_back(AbandonedQuery {
            correlation_id,
            op,
            node,
        });
    }

    fn route_foreign(&mut self, session: &Session, reply: Reply) {
        let Some(index) = self
            .abandoned
            .iter()
            .position(|query| query.correlation_id == reply.correlation_id)
        else {
            debug!(session = %session.id(), id = %reply.correlation_id, "discarding reply with unknown correlation id");
            return;
        };
        let Some(query) = self.abandoned.remove(index) else {
            return;
        };
        if !reply.is_ok() || reply.op != query.op {
            debug!(session = %session.id(), op = %query.op, "late reply not usable");
            return;
        }

        debug!(session = %session.id(), op = %query.op, "late reply to abandoned query");
        if let Some(tx) = &self.late_tx {
            let _ = tx.send(LateReply {
                session: session.id(),
                op: query.op,
                node: query.node,
                payload: reply.payload,
            });
        }
    }
}

fn decode(request: &Request, reply: Reply) -> Result<Value, CommandError> {
    if reply.op != request.op {
        return Err(CommandError::ProtocolError {
            message: format!("expected a reply to {}, got {}", request.op, reply.op),
        });
    }
    match reply.status {
        ReplyStatus::Ok => Ok(reply.payload),
        ReplyStatus::Error { code } => Err(CommandError::Rejected {
            code,
            message: reply
                .error
                .unwrap_or_else(|| format!("{} failed", request.op)),
        }),
        ReplyStatus::Busy => Err(CommandError::ProtocolError {
            message: "busy status on a terminal reply".into(),
        }),
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
