use std::any::TypeId;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use agora_ring::WritePolicy;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::error::BusError;
use crate::event::{ComponentId, Envelope, EventPayload};
use crate::filter::FilterChain;
use crate::participant::{Agent, Consumer, EventConsumer, EventProducer, Producer};
use crate::queue::EventQueue;

/// How long the delivery worker sleeps on the queue's condition variable
/// before re-checking the stop flag.
const IDLE_WAIT: Duration = Duration::from_millis(100);

/// Options recognized at bus construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusConfig {
    /// Spawn the background delivery worker; `publish` then enqueues
    /// instead of dispatching on the caller's thread.
    pub async_delivery: bool,
    /// Bounded capacity of the delivery queue. Must be at least 1.
    pub queue_capacity: usize,
    /// Overflow behaviour of the delivery queue.
    pub write_policy: WritePolicy,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            async_delivery: false,
            queue_capacity: 1024,
            write_policy: WritePolicy::Rotate,
        }
    }
}

/// Who is registered, and which consumer wants which event type.
///
/// One lock over all three maps: registrations are writers, dispatch walks
/// are readers.
#[derive(Default)]
struct Registry {
    producers: HashMap<ComponentId, Arc<dyn EventProducer>>,
    consumers: HashMap<ComponentId, Arc<dyn EventConsumer>>,
    interests: HashMap<TypeId, Vec<ComponentId>>,
}

/// State shared between the bus handle, its participants (via weak links)
/// and the delivery worker.
pub(crate) struct BusInner {
    registry: RwLock<Registry>,
    filters: FilterChain,
    queue: EventQueue,
    running: AtomicBool,
    async_delivery: bool,
}

/// Central event bus: participant registry plus dispatch engine.
///
/// In sync mode `publish` dispatches on the caller's thread before
/// returning. In async mode it enqueues into the bounded delivery queue
/// and a single background worker drains it; dropping (or
/// [`shutdown`](EventBus::shutdown)ting) the bus stops the worker after
/// the event it is currently delivering and discards the rest of the
/// queue.
///
/// Handlers may publish further events on the same bus, but must not
/// register or unregister participants from inside a handler - that would
/// deadlock against the dispatch walk's shared registry lock.
pub struct EventBus {
    inner: Arc<BusInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl EventBus {
    /// Create a bus with the given options.
    ///
    /// # Panics
    ///
    /// Panics if `config.queue_capacity` is zero, or if the delivery
    /// worker thread cannot be spawned.
    pub fn new(config: BusConfig) -> Self {
        let inner = Arc::new(BusInner {
            registry: RwLock::new(Registry::default()),
            filters: FilterChain::new(),
            queue: EventQueue::new(config.queue_capacity, config.write_policy),
            running: AtomicBool::new(true),
            async_delivery: config.async_delivery,
        });
        let worker = if config.async_delivery {
            let inner = Arc::clone(&inner);
            let handle = thread::Builder::new()
                .name("agora-bus-delivery".into())
                .spawn(move || delivery_loop(inner))
                .expect("failed to spawn bus delivery worker");
            Some(handle)
        } else {
            None
        };
        Self {
            inner,
            worker: Mutex::new(worker),
        }
    }

    /// Register a producer; an existing registration under the same id is
    /// replaced.
    pub fn register_producer(&self, producer: Arc<dyn EventProducer>) {
        let id = producer.id().to_owned();
        self.inner.registry.write().producers.insert(id, producer);
    }

    /// Remove a producer registration. Unknown ids are ignored.
    pub fn unregister_producer(&self, id: &str) {
        self.inner.registry.write().producers.remove(id);
    }

    /// Register a consumer; an existing registration under the same id is
    /// replaced.
    pub fn register_consumer(&self, consumer: Arc<dyn EventConsumer>) {
        let id = consumer.id().to_owned();
        self.inner.registry.write().consumers.insert(id, consumer);
    }

    /// Remove a consumer registration. Unknown ids are ignored; events
    /// published after this returns no longer reach the consumer.
    pub fn unregister_consumer(&self, id: &str) {
        self.inner.registry.write().consumers.remove(id);
    }

    /// Record that `consumer_id` wants broadcasts of the payload type
    /// `E`. Registrations append; duplicates are kept and produce
    /// duplicate delivery.
    pub fn register_interest<E: EventPayload>(&self, consumer_id: &str) {
        self.inner
            .register_interest(consumer_id.to_owned(), TypeId::of::<E>());
    }

    /// Tag-level variant of [`register_interest`](EventBus::register_interest)
    /// for callers that already hold a type tag.
    pub fn register_interest_tag(&self, consumer_id: &str, tag: TypeId) {
        self.inner.register_interest(consumer_id.to_owned(), tag);
    }

    /// Construct and publish an event.
    ///
    /// Stamps `source`, `target` and the current instant, then either
    /// dispatches inline (sync mode) or enqueues for the worker (async
    /// mode). The only error is [`BusError::QueueFull`], produced when the
    /// queue refuses the event under the `Reject` policy; publishing on a
    /// stopped bus is a WARN-logged no-op.
    pub fn publish<E: EventPayload>(
        &self,
        source: &str,
        target: Option<&str>,
        payload: E,
    ) -> Result<(), BusError> {
        self.inner
            .publish_envelope(Envelope::new(source, target, payload))
    }

    /// Attach a consumer: bind its core to this bus, register it, then run
    /// its `register_interests` hook. Handlers added before attachment get
    /// their interests replayed so pre- and post-attach registration
    /// behave identically.
    pub fn attach_consumer<C: Consumer>(&self, consumer: &Arc<C>) {
        consumer.consumer_core().bind(&self.inner);
        self.register_consumer(Arc::clone(consumer) as Arc<dyn EventConsumer>);
        consumer.consumer_core().replay_interests(&self.inner);
        consumer.register_interests();
    }

    /// Attach a producer: bind its core to this bus and register it.
    pub fn attach_producer<P: Producer>(&self, producer: &Arc<P>) {
        producer.producer_core().bind(&self.inner);
        self.register_producer(Arc::clone(producer) as Arc<dyn EventProducer>);
    }

    /// Attach an agent in both roles with one call.
    pub fn attach_agent<A: Agent>(&self, agent: &Arc<A>) {
        agent.agent_core().producer().bind(&self.inner);
        agent.agent_core().consumer().bind(&self.inner);
        self.register_producer(Arc::clone(agent) as Arc<dyn EventProducer>);
        self.register_consumer(Arc::clone(agent) as Arc<dyn EventConsumer>);
        agent.agent_core().consumer().replay_interests(&self.inner);
        Agent::register_interests(agent.as_ref());
    }

    /// The delivery queue, for inspection and capacity queries.
    pub fn event_queue(&self) -> &EventQueue {
        &self.inner.queue
    }

    /// Whether the bus still accepts events.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Stop the bus: no further events are accepted, the worker finishes
    /// the event it is delivering and exits, and undelivered queued events
    /// are discarded. Idempotent. Must not be called from inside a
    /// handler running on the delivery worker.
    pub fn shutdown(&self) {
        if !self.inner.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.inner.queue.close();
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                error!("bus delivery worker exited with a panic");
            }
        }
    }

    pub(crate) fn filter_chain(&self) -> &FilterChain {
        &self.inner.filters
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl BusInner {
    pub(crate) fn register_interest(&self, consumer_id: ComponentId, tag: TypeId) {
        self.registry
            .write()
            .interests
            .entry(tag)
            .or_default()
            .push(consumer_id);
    }

    pub(crate) fn publish_envelope(&self, event: Envelope) -> Result<(), BusError> {
        if !self.running.load(Ordering::Acquire) {
            warn!(
                "event {} from `{}` dropped: bus is stopped",
                event.type_name(),
                event.meta().source
            );
            return Ok(());
        }
        if self.async_delivery {
            let source = event.meta().source.clone();
            let type_name = event.type_name();
            if self.queue.write(event) {
                Ok(())
            } else if !self.running.load(Ordering::Acquire) {
                // Lost the race against shutdown; same no-op as above.
                warn!(
                    "event {} from `{}` dropped: bus is stopped",
                    type_name, source
                );
                Ok(())
            } else {
                Err(BusError::QueueFull { source })
            }
        } else {
            self.deliver(&event);
            Ok(())
        }
    }

    /// Dispatch one event to its target, or to every interested consumer
    /// in interest-registration order.
    fn deliver(&self, event: &Envelope) {
        let filters = self.filters.snapshot();
        // Recursive read: handlers may publish on this bus from inside the
        // dispatch walk, and a plain `read` could deadlock behind a queued
        // writer.
        let registry = self.registry.read_recursive();
        match &event.meta().target {
            Some(target) => {
                debug!(
                    "delivering {} from `{}` to `{}`",
                    event.type_name(),
                    event.meta().source,
                    target
                );
                if let Some(consumer) = registry.consumers.get(target) {
                    if consumer.can_handle(event.tag())
                        && self.filters.allows(&filters, target, event)
                    {
                        self.invoke(consumer.as_ref(), event);
                    }
                }
            }
            None => {
                debug!(
                    "delivering {} from `{}` (broadcast)",
                    event.type_name(),
                    event.meta().source
                );
                if let Some(interested) = registry.interests.get(&event.tag()) {
                    for id in interested {
                        if let Some(consumer) = registry.consumers.get(id) {
                            if self.filters.allows(&filters, id, event) {
                                self.invoke(consumer.as_ref(), event);
                            } else {
                                debug!("filtered out {} for `{}`", event.type_name(), id);
                            }
                        }
                    }
                }
            }
        }
    }

    /// Run one handler, containing panics so a faulty subscriber cannot
    /// starve the others or kill the delivery worker.
    fn invoke(&self, consumer: &dyn EventConsumer, event: &Envelope) {
        let outcome = catch_unwind(AssertUnwindSafe(|| consumer.handle_event(event)));
        if outcome.is_err() {
            error!(
                "handler on `{}` panicked handling {} (source `{}`, target `{}`)",
                consumer.id(),
                event.type_name(),
                event.meta().source,
                event.meta().target.as_deref().unwrap_or("<broadcast>")
            );
        }
    }
}

/// Background worker: wait for the queue to fill, then drain everything
/// available, checking the stop flag between events.
fn delivery_loop(inner: Arc<BusInner>) {
    while inner.running.load(Ordering::Acquire) {
        let Some(event) = inner.queue.read(true, IDLE_WAIT) else {
            continue;
        };
        inner.deliver(&event);
        drop(event);
        while inner.running.load(Ordering::Acquire) {
            match inner.queue.read(false, Duration::ZERO) {
                Some(event) => inner.deliver(&event),
                None => break,
            }
        }
        debug!(
            "delivery queue at {}/{}",
            inner.queue.available(),
            inner.queue.capacity()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_sync_rotate() {
        let config = BusConfig::default();
        assert!(!config.async_delivery);
        assert_eq!(config.queue_capacity, 1024);
        assert_eq!(config.write_policy, WritePolicy::Rotate);
    }

    #[test]
    fn sync_bus_reports_running_until_shutdown() {
        let bus = EventBus::new(BusConfig::default());
        assert!(bus.is_running());
        bus.shutdown();
        assert!(!bus.is_running());
        bus.shutdown(); // idempotent
        assert!(!bus.is_running());
    }

    #[test]
    fn queue_is_exposed_with_configured_capacity() {
        let bus = EventBus::new(BusConfig {
            queue_capacity: 17,
            ..BusConfig::default()
        });
        assert_eq!(bus.event_queue().capacity(), 17);
    }
}
