// ── Event bus ──
//
// Synchronous publish/subscribe for admin events. Session workers and the
// topology owner publish concurrently; the listener list is an
// `ArcSwap` snapshot so publishing never takes a lock. Listeners run on
// the publishing task in registration order, and one failing or
// panicking listener never keeps the event from the others.

mod listeners;

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwap;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::warn;

use crate::model::Event;

pub use listeners::{ChannelListener, FnListener, TracingListener};

/// Error a listener may report back to the bus. Logged, never propagated.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ListenerError(pub String);

/// Receives every published event.
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &Arc<Event>) -> Result<(), ListenerError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Clone)]
struct Registration {
    id: SubscriptionId,
    listener: Arc<dyn EventListener>,
}

struct BusInner {
    listeners: ArcSwap<Vec<Registration>>,
    next_id: AtomicU64,
}

/// Cheaply cloneable handle to one bus.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                listeners: ArcSwap::from_pointee(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn subscribe(&self, listener: Arc<dyn EventListener>) -> SubscriptionId {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let registration = Registration { id, listener };
        self.inner.listeners.rcu(|current| {
            let mut next = Vec::clone(current);
            next.push(registration.clone());
            next
        });
        id
    }

    /// Subscribe a closure.
    pub fn subscribe_fn<F>(&self, f: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.subscribe(Arc::new(FnListener::new(f)))
    }

    /// Forward events into a broadcast channel for async consumers.
    pub fn channel(&self, capacity: usize) -> (SubscriptionId, broadcast::Receiver<Arc<Event>>) {
        let (listener, rx) = ChannelListener::new(capacity);
        (self.subscribe(Arc::new(listener)), rx)
    }

    /// Returns `true` if the subscription existed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut removed = false;
        self.inner.listeners.rcu(|current| {
            let next: Vec<Registration> = current.iter().filter(|r| r.id != id).cloned().collect();
            removed = next.len() != current.len();
            next
        });
        removed
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.listeners.load().len()
    }

    /// Deliver `event` to every current listener and hand it back shared.
    pub fn publish(&self, event: Event) -> Arc<Event> {
        let event = Arc::new(event);
        let listeners = self.inner.listeners.load();
        for registration in listeners.iter() {
            let outcome = catch_unwind(AssertUnwindSafe(|| registration.listener.on_event(&event)));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    warn!(subscription = registration.id.0, %error, "event listener failed");
                }
                Err(_) => {
                    warn!(subscription = registration.id.0, "event listener panicked");
                }
            }
        }
        event
    }
}
