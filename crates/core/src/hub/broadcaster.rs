use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tracing::{debug, warn};
use uuid::Uuid;

use super::QueueEvent;
use crate::metrics::{HUB_EVENTS_PUBLISHED, HUB_SUBSCRIBERS, HUB_SUBSCRIBERS_DROPPED};

type Registry = HashMap<Uuid, mpsc::Sender<Arc<QueueEvent>>>;

struct HubInner {
    subscribers: Mutex<Registry>,
    buffer: usize,
}

impl HubInner {
    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn remove(&self, id: Uuid) -> bool {
        let removed = self.lock().remove(&id).is_some();
        if removed {
            HUB_SUBSCRIBERS.dec();
        }
        removed
    }
}

/// In-memory publish/subscribe hub.
///
/// This is cheaply cloneable; all clones share one subscriber set. Create it
/// once at startup and hand clones to every producer and consumer.
#[derive(Clone)]
pub struct EventHub {
    inner: Arc<HubInner>,
}

/// Delivery summary of one publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    /// Subscribers removed because their buffer was full or their receiver gone.
    pub dropped: usize,
}

impl EventHub {
    /// Create a hub whose subscribers buffer up to `buffer` events each.
    pub fn new(buffer: usize) -> Self {
        Self {
            inner: Arc::new(HubInner {
                subscribers: Mutex::new(HashMap::new()),
                buffer: buffer.max(1),
            }),
        }
    }

    /// Register a new subscriber.
    ///
    /// It receives every event published from now on, in publish order.
    /// Dropping the subscription unregisters it.
    pub fn register(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.inner.buffer);
        let id = Uuid::new_v4();
        self.inner.lock().insert(id, tx);
        HUB_SUBSCRIBERS.inc();
        debug!(subscriber = %id, "Registered hub subscriber");

        Subscription {
            id,
            rx,
            hub: Arc::downgrade(&self.inner),
        }
    }

    /// Remove a subscriber. Returns false if it was already gone.
    pub fn unregister(&self, id: Uuid) -> bool {
        let removed = self.inner.remove(id);
        if removed {
            debug!(subscriber = %id, "Unregistered hub subscriber");
        }
        removed
    }

    /// Deliver an event to every registered subscriber without waiting.
    ///
    /// A subscriber that cannot take the event immediately is dropped.
    pub fn publish(&self, event: QueueEvent) -> PublishReport {
        let event_type = event.event_type();
        let event = Arc::new(event);
        let mut report = PublishReport::default();

        {
            let mut subscribers = self.inner.lock();
            subscribers.retain(|id, tx| match tx.try_send(Arc::clone(&event)) {
                Ok(()) => {
                    report.delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    warn!(subscriber = %id, event_type, "Subscriber buffer full, dropping subscriber");
                    report.dropped += 1;
                    false
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(subscriber = %id, "Subscriber gone, removing");
                    report.dropped += 1;
                    false
                }
            });
        }

        HUB_EVENTS_PUBLISHED.with_label_values(&[event_type]).inc();
        if report.dropped > 0 {
            HUB_SUBSCRIBERS_DROPPED.inc_by(report.dropped as u64);
            HUB_SUBSCRIBERS.sub(report.dropped as i64);
        }
        report
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().len()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(crate::config::HubConfig::default().subscriber_buffer)
    }
}

/// Receiving end of a hub registration.
pub struct Subscription {
    id: Uuid,
    rx: mpsc::Receiver<Arc<QueueEvent>>,
    hub: Weak<HubInner>,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Wait for the next event.
    ///
    /// Returns `None` once the subscriber has been dropped by the hub (or the
    /// hub is gone) and the buffered events are drained.
    pub async fn recv(&mut self) -> Option<Arc<QueueEvent>> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Result<Arc<QueueEvent>, TryRecvError> {
        self.rx.try_recv()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.remove(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
