use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::{EventListener, ListenerError};
use crate::model::{Event, EventKind};

/// Adapts a closure into a listener.
pub struct FnListener<F> {
    f: F,
}

impl<F> FnListener<F>
where
    F: Fn(&Event) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> EventListener for FnListener<F>
where
    F: Fn(&Event) + Send + Sync,
{
    fn on_event(&self, event: &Arc<Event>) -> Result<(), ListenerError> {
        (self.f)(event.as_ref());
        Ok(())
    }
}

/// Forwards events into a tokio broadcast channel.
///
/// Having no receivers is not an error; lagging receivers lose the oldest
/// events, as broadcast channels do.
pub struct ChannelListener {
    tx: broadcast::Sender<Arc<Event>>,
}

impl ChannelListener {
    pub fn new(capacity: usize) -> (Self, broadcast::Receiver<Arc<Event>>) {
        let (tx, rx) = broadcast::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Event>> {
        self.tx.subscribe()
    }
}

impl EventListener for ChannelListener {
    fn on_event(&self, event: &Arc<Event>) -> Result<(), ListenerError> {
        let _ = self.tx.send(Arc::clone(event));
        Ok(())
    }
}

/// Status log: every event as one tracing line.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingListener;

impl EventListener for TracingListener {
    fn on_event(&self, event: &Arc<Event>) -> Result<(), ListenerError> {
        let source = event
            .source
            .map_or_else(|| "-".to_owned(), |id| id.to_string());
        match &event.kind {
            EventKind::ConnectFailed { reason } => {
                warn!(session = %source, kind = %reason.kind, "{}", reason.message);
            }
            EventKind::CommandFailed { op, error } => {
                warn!(session = %source, op = %op, kind = %error.kind, "{}", error.message);
            }
            EventKind::ConnectionLost { reason } => {
                warn!(session = %source, "connection lost: {reason}");
            }
            EventKind::BrokerBusy {
                attempt,
                max,
                timeout,
            } => {
                info!(
                    session = %source,
                    "broker not responding, retrying [{attempt} of {max} attempts, timeout={} seconds]",
                    timeout.as_secs()
                );
            }
            EventKind::ReconnectProgress { attempt, max } => {
                info!(session = %source, attempt, max, "reconnect attempt failed");
            }
            EventKind::ConnectSucceeded => info!(session = %source, "connected"),
            EventKind::Disconnected => info!(session = %source, "disconnected"),
            EventKind::BrokerAdded { node } => info!(session = %source, node = %node, "broker added"),
            EventKind::BrokerRemoved => info!(session = %source, "broker removed"),
            EventKind::CommandSucceeded { op } => {
                debug!(session = %source, op = %op, "command succeeded");
            }
            EventKind::TopologyChanged { node, actions } => {
                debug!(session = %source, node = %node, affected = actions.len(), "topology changed");
            }
        }
        Ok(())
    }
}
