use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};
use tracing::{debug, error, warn};

use crate::error::WardenResult;
use crate::models::{Event, EventType};

/// Receives published events on the publisher's thread. Handlers must return
/// quickly; anything slow belongs on a task the handler spawns or enqueues.
pub trait EventHandler: Send + Sync {
    fn name(&self) -> &str;

    fn handle(&self, event: &Event) -> WardenResult<()>;
}

/// Adapter so plain closures can subscribe.
pub struct FnHandler<F> {
    name: String,
    f: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&Event) -> WardenResult<()> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> EventHandler for FnHandler<F>
where
    F: Fn(&Event) -> WardenResult<()> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn handle(&self, event: &Event) -> WardenResult<()> {
        (self.f)(event)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum EventFilter {
    #[default]
    All,
    Types(HashSet<EventType>),
}

impl EventFilter {
    pub fn only(event_type: impl Into<EventType>) -> Self {
        EventFilter::Types(HashSet::from([event_type.into()]))
    }

    pub fn any_of<I, T>(types: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<EventType>,
    {
        EventFilter::Types(types.into_iter().map(Into::into).collect())
    }

    pub fn matches(&self, event_type: &EventType) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Types(types) => types.contains(event_type),
        }
    }
}

struct Subscriber {
    id: u64,
    filter: EventFilter,
    handler: Arc<dyn EventHandler>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventBusStats {
    pub published: u64,
    pub deliveries: u64,
    pub handler_failures: u64,
}

#[derive(Default)]
struct BusInner {
    subscribers: RwLock<Vec<Subscriber>>,
    next_id: AtomicU64,
    published: AtomicU64,
    deliveries: AtomicU64,
    handler_failures: AtomicU64,
}

impl BusInner {
    fn remove(&self, id: u64) -> bool {
        let mut subscribers = match self.subscribers.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        subscribers.len() < before
    }
}

/// In-process publish/subscribe hub. Cloning yields another handle to the
/// same bus.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

/// Handle returned by [`EventBus::subscribe`].
#[must_use = "dropping a Subscription does not unsubscribe; call unsubscribe() or keep it"]
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    bus: Weak<BusInner>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Stop receiving events. Returns false if the bus is gone or the
    /// subscription was already removed.
    pub fn unsubscribe(self) -> bool {
        match self.bus.upgrade() {
            Some(inner) => inner.remove(self.id),
            None => false,
        }
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, filter: EventFilter, handler: Arc<dyn EventHandler>) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(handler = %handler.name(), subscription = id, "Subscribing to event bus");

        let mut subscribers = match self.inner.subscribers.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        subscribers.push(Subscriber {
            id,
            filter,
            handler,
        });

        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    pub fn subscribe_fn<F>(&self, name: &str, filter: EventFilter, f: F) -> Subscription
    where
        F: Fn(&Event) -> WardenResult<()> + Send + Sync + 'static,
    {
        self.subscribe(filter, Arc::new(FnHandler::new(name, f)))
    }

    pub fn subscriber_count(&self) -> usize {
        match self.inner.subscribers.read() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Deliver `event` to every matching subscriber in registration order.
    ///
    /// A handler that errors or panics is logged and skipped; the remaining
    /// handlers still run and nothing is reported back to the publisher.
    /// Returns the number of handlers that received the event.
    pub fn publish(&self, event: &Event) -> usize {
        self.inner.published.fetch_add(1, Ordering::Relaxed);

        // Snapshot so handlers may (un)subscribe while being called.
        let targets: Vec<Arc<dyn EventHandler>> = {
            let subscribers = match self.inner.subscribers.read() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            subscribers
                .iter()
                .filter(|s| s.filter.matches(&event.event_type))
                .map(|s| s.handler.clone())
                .collect()
        };

        debug!(
            event_type = %event.event_type,
            entity_id = %event.entity_id,
            subscribers = targets.len(),
            "Publishing event"
        );

        for handler in &targets {
            self.inner.deliveries.fetch_add(1, Ordering::Relaxed);
            match catch_unwind(AssertUnwindSafe(|| handler.handle(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    self.inner.handler_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        handler = %handler.name(),
                        event_type = %event.event_type,
                        error_code = e.error_code(),
                        "Event handler failed: {}",
                        e
                    );
                }
                Err(_) => {
                    self.inner.handler_failures.fetch_add(1, Ordering::Relaxed);
                    error!(
                        handler = %handler.name(),
                        event_type = %event.event_type,
                        "Event handler panicked"
                    );
                }
            }
        }

        targets.len()
    }

    pub fn stats(&self) -> EventBusStats {
        EventBusStats {
            published: self.inner.published.load(Ordering::Relaxed),
            deliveries: self.inner.deliveries.load(Ordering::Relaxed),
            handler_failures: self.inner.handler_failures.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .field("stats", &self.stats())
            .finish()
    }
}
