//! In-process publish/subscribe for session state changes.
//!
//! Events carry no payload; subscribers re-read the session store.
//! Delivery is synchronous and best-effort: nothing is queued or replayed.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

/// Broadcast topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Login, logout, or session teardown.
    SessionChanged,
    /// Active tenant switched.
    TenantChanged,
}

impl Topic {
    /// Event name used by the web front end for the same notification.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SessionChanged => "tabla:auth-state-change",
            Self::TenantChanged => "tabla:restaurant-change",
        }
    }
}

type Handler = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: AtomicU64,
    handlers: RwLock<HashMap<Topic, Vec<(u64, Handler)>>>,
}

/// Cloneable handle to a shared subscriber registry.
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<Registry>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = self.registry.handlers.read();
        f.debug_struct("EventBus")
            .field("subscribers", &handlers.values().map(Vec::len).sum::<usize>())
            .finish()
    }
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `topic`.
    ///
    /// The handler stays registered until [`Subscription::unsubscribe`] is
    /// called; dropping the returned value does not unsubscribe.
    pub fn subscribe(
        &self,
        topic: Topic,
        handler: impl Fn() + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry
            .handlers
            .write()
            .entry(topic)
            .or_default()
            .push((id, Arc::new(handler)));

        Subscription {
            registry: Arc::downgrade(&self.registry),
            topic,
            id,
        }
    }

    /// Invoke every handler registered for `topic`, in registration order.
    ///
    /// A panicking handler is logged and skipped; the rest still run.
    pub fn publish(&self, topic: Topic) {
        // Snapshot so handlers may subscribe or publish re-entrantly.
        let handlers: Vec<Handler> = self
            .registry
            .handlers
            .read()
            .get(&topic)
            .map(|list| list.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default();

        tracing::debug!(topic = topic.as_str(), subscribers = handlers.len(), "Publishing event");

        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler())).is_err() {
                tracing::error!(topic = topic.as_str(), "Event subscriber panicked");
            }
        }
    }

    #[must_use]
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.registry
            .handlers
            .read()
            .get(&topic)
            .map_or(0, Vec::len)
    }
}

/// Registration handle returned by [`EventBus::subscribe`].
#[derive(Debug)]
#[must_use = "keep the subscription to be able to unsubscribe"]
pub struct Subscription {
    registry: Weak<Registry>,
    topic: Topic,
    id: u64,
}

impl Subscription {
    /// Remove the handler. No-op if the bus is already gone.
    pub fn unsubscribe(self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        if let Some(list) = registry.handlers.write().get_mut(&self.topic) {
            list.retain(|(id, _)| *id != self.id);
        }
    }
}
