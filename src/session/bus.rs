// src/session/bus.rs

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tracing::trace;

use super::SessionEvent;
use crate::types::EventKind;

struct Subscriber {
    kinds: BTreeSet<EventKind>,
    tx: mpsc::UnboundedSender<SessionEvent>,
}

/// Typed event bus between the session and its listeners.
///
/// `publish` is synchronous and never blocks, so it can be called from the
/// session's own threads or callbacks. Each subscriber has an unbounded
/// queue; a slow listener never holds up the publisher.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to the given event kinds. Only events whose kind is in the
    /// set are delivered; there is no wildcard.
    pub fn subscribe(&self, kinds: impl IntoIterator<Item = EventKind>) -> Subscription {
        let kinds: BTreeSet<EventKind> = kinds.into_iter().collect();
        let (tx, rx) = mpsc::unbounded_channel();
        trace!(?kinds, "new event bus subscription");
        self.lock().push(Subscriber { kinds, tx });
        Subscription { rx }
    }

    /// Deliver `event` to every subscriber interested in its kind.
    ///
    /// Returns the number of subscribers the event was delivered to.
    pub fn publish(&self, event: SessionEvent) -> usize {
        let kind = event.kind();
        let mut subscribers = self.lock();

        // Prune subscribers whose receiving side is gone.
        subscribers.retain(|s| !s.tx.is_closed());

        let mut delivered = 0;
        for sub in subscribers.iter().filter(|s| s.kinds.contains(&kind)) {
            if sub.tx.send(event.clone()).is_ok() {
                delivered += 1;
            }
        }

        trace!(event = %kind, delivered, "published session event");
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Subscriber>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Receiving side of an [`EventBus`] subscription. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<SessionEvent>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<SessionEvent> {
        self.rx.try_recv().ok()
    }
}
