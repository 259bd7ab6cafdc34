//! Process-local fan-out of committed stock events.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Mutex, MutexGuard};

use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::bus::{EventBus, Subscription};
use crate::envelope::EventEnvelope;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InMemoryBusError {
    #[error("subscriber registry lock poisoned")]
    Poisoned,
}

type Filter<M> = Box<dyn Fn(&M) -> bool + Send + Sync>;

struct Subscriber<M> {
    sender: mpsc::Sender<M>,
    filter: Option<Filter<M>>,
}

impl<M> Subscriber<M> {
    fn wants(&self, message: &M) -> bool {
        self.filter.as_ref().is_none_or(|f| f(message))
    }
}

/// Broadcast bus used by the engine to announce committed transitions.
///
/// Delivery is synchronous and in publish order. Each subscriber may carry a
/// filter; messages it rejects are not queued for it. Subscribers whose
/// receiving end was dropped are removed on the next publish that reaches them.
pub struct InMemoryEventBus<M> {
    subscribers: Mutex<Vec<Subscriber<M>>>,
    published: AtomicU64,
}

impl<M> InMemoryEventBus<M> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to the messages for which `filter` returns true.
    pub fn subscribe_where(&self, filter: impl Fn(&M) -> bool + Send + Sync + 'static) -> Subscription<M> {
        self.register(Some(Box::new(filter)))
    }

    /// Subscribers still registered. Dropped ones linger until a publish.
    pub fn subscriber_count(&self) -> usize {
        self.registry().map(|s| s.len()).unwrap_or(0)
    }

    /// Messages accepted by `publish` since the bus was created.
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    fn registry(&self) -> Result<MutexGuard<'_, Vec<Subscriber<M>>>, InMemoryBusError> {
        self.subscribers.lock().map_err(|_| InMemoryBusError::Poisoned)
    }

    fn register(&self, filter: Option<Filter<M>>) -> Subscription<M> {
        let (sender, receiver) = mpsc::channel();
        // A poisoned registry yields a subscription that never receives.
        if let Ok(mut subs) = self.registry() {
            subs.push(Subscriber { sender, filter });
        }
        Subscription::new(receiver)
    }
}

impl InMemoryEventBus<EventEnvelope<JsonValue>> {
    /// Subscribe to the envelopes of one aggregate type, e.g. `"inventory.count"`.
    pub fn subscribe_to(&self, aggregate_type: impl Into<String>) -> Subscription<EventEnvelope<JsonValue>> {
        let aggregate_type = aggregate_type.into();
        self.subscribe_where(move |envelope| envelope.aggregate_type() == aggregate_type)
    }
}

impl<M> Default for InMemoryEventBus<M> {
    fn default() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            published: AtomicU64::new(0),
        }
    }
}

impl<M> fmt::Debug for InMemoryEventBus<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryEventBus")
            .field("subscribers", &self.subscriber_count())
            .field("published", &self.published_count())
            .finish()
    }
}

impl<M> EventBus<M> for InMemoryEventBus<M>
where
    M: Clone + Send + 'static,
{
    type Error = InMemoryBusError;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        let mut subs = self.registry()?;
        subs.retain(|sub| !sub.wants(&message) || sub.sender.send(message.clone()).is_ok());
        self.published.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn subscribe(&self) -> Subscription<M> {
        self.register(None)
    }
}
