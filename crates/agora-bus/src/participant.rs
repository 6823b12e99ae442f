use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use crate::bus::BusInner;
use crate::error::BusError;
use crate::event::{ComponentId, Envelope, EventMeta, EventPayload};

//─────────────────────────────
//  Bus-facing contracts
//─────────────────────────────

/// What the bus needs from anything receiving events.
///
/// Object-safe; the registry stores `Arc<dyn EventConsumer>`. Most types
/// get this for free by implementing [`Consumer`] (or [`Agent`]) over a
/// [`ConsumerCore`].
pub trait EventConsumer: Send + Sync {
    /// Stable identifier within the bus.
    fn id(&self) -> &str;
    /// Whether this consumer has a handler for the given type tag.
    fn can_handle(&self, tag: TypeId) -> bool;
    /// Deliver one event. Unknown types must be a no-op.
    fn handle_event(&self, event: &Envelope);
}

/// What the bus needs from anything publishing events.
pub trait EventProducer: Send + Sync {
    /// Stable identifier within the bus.
    fn id(&self) -> &str;
}

//─────────────────────────────
//  Reusable participant state
//─────────────────────────────

type ErasedHandler = Arc<dyn Fn(&Envelope) + Send + Sync>;

/// Consumer-side state: the id, the per-type handler table and a weak
/// link to the attached bus.
///
/// Handlers for the same payload type accumulate - registering twice
/// yields two invocations per delivery. The table is guarded by its own
/// mutex; `dispatch` snapshots the handler list before invoking, so
/// concurrent `register_handler` calls never block a delivery in
/// progress. Note that on an attached core `register_handler` also
/// registers interest with the bus, so it falls under the same rule as
/// any other registration: not from inside a handler.
pub struct ConsumerCore {
    id: ComponentId,
    handlers: Mutex<HashMap<TypeId, Vec<ErasedHandler>>>,
    bus: RwLock<Weak<BusInner>>,
}

impl ConsumerCore {
    /// Create an unattached core with the given id.
    pub fn new(id: impl Into<ComponentId>) -> Self {
        Self {
            id: id.into(),
            handlers: Mutex::new(HashMap::new()),
            bus: RwLock::new(Weak::new()),
        }
    }

    /// The consumer's id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Append a typed handler.
    ///
    /// The handler is erased and keyed by `E`'s type tag; when the core is
    /// already attached to a bus, interest in `E` is registered there as
    /// well, so the consumer starts receiving matching broadcasts at once.
    pub fn register_handler<E: EventPayload>(
        &self,
        handler: impl Fn(&EventMeta, &E) + Send + Sync + 'static,
    ) {
        let tag = TypeId::of::<E>();
        let erased: ErasedHandler = Arc::new(move |event: &Envelope| {
            if let Some(payload) = event.downcast_ref::<E>() {
                handler(event.meta(), payload);
            }
        });
        self.handlers.lock().entry(tag).or_default().push(erased);
        if let Some(bus) = self.bus.read().upgrade() {
            bus.register_interest(self.id.clone(), tag);
        }
    }

    /// Whether a handler exists for the tag.
    pub fn can_handle(&self, tag: TypeId) -> bool {
        self.handlers.lock().contains_key(&tag)
    }

    /// Invoke every handler registered for the event's type, in
    /// registration order. Unknown types are a no-op.
    pub fn dispatch(&self, event: &Envelope) {
        let snapshot: Vec<ErasedHandler> = match self.handlers.lock().get(&event.tag()) {
            Some(list) => list.clone(),
            None => return,
        };
        for handler in snapshot {
            handler(event);
        }
    }

    pub(crate) fn bind(&self, bus: &Arc<BusInner>) {
        *self.bus.write() = Arc::downgrade(bus);
    }

    /// Register interest for every handler added before attachment, one
    /// registration per handler entry, matching what post-attach
    /// registration would have produced.
    pub(crate) fn replay_interests(&self, bus: &Arc<BusInner>) {
        // Snapshot first: the registry lock must never be requested while
        // the handler table is held, or a concurrent dispatch could
        // deadlock taking the two in the opposite order.
        let entries: Vec<(TypeId, usize)> = self
            .handlers
            .lock()
            .iter()
            .map(|(tag, handlers)| (*tag, handlers.len()))
            .collect();
        for (tag, count) in entries {
            for _ in 0..count {
                bus.register_interest(self.id.clone(), tag);
            }
        }
    }
}

/// Producer-side state: the id and a weak link to the attached bus.
pub struct ProducerCore {
    id: ComponentId,
    bus: RwLock<Weak<BusInner>>,
}

impl ProducerCore {
    /// Create an unattached core with the given id.
    pub fn new(id: impl Into<ComponentId>) -> Self {
        Self {
            id: id.into(),
            bus: RwLock::new(Weak::new()),
        }
    }

    /// The producer's id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Publish an event, stamping this producer's id as the source.
    ///
    /// Fails with [`BusError::NotAttached`] when the core was never
    /// attached or the bus has been dropped.
    pub fn publish<E: EventPayload>(
        &self,
        target: Option<&str>,
        payload: E,
    ) -> Result<(), BusError> {
        let bus = self
            .bus
            .read()
            .upgrade()
            .ok_or_else(|| BusError::NotAttached(self.id.clone()))?;
        bus.publish_envelope(Envelope::new(&self.id, target, payload))
    }

    pub(crate) fn bind(&self, bus: &Arc<BusInner>) {
        *self.bus.write() = Arc::downgrade(bus);
    }
}

/// Combined producer and consumer state sharing one id.
///
/// Agents that publish from inside their own handlers keep the core in an
/// `Arc` and hand clones to the closures.
pub struct AgentCore {
    consumer: ConsumerCore,
    producer: ProducerCore,
}

impl AgentCore {
    /// Create an unattached agent core.
    pub fn new(id: impl Into<ComponentId>) -> Self {
        let id = id.into();
        Self {
            consumer: ConsumerCore::new(id.clone()),
            producer: ProducerCore::new(id),
        }
    }

    /// The agent's id.
    pub fn id(&self) -> &str {
        self.consumer.id()
    }

    /// Consumer half.
    pub fn consumer(&self) -> &ConsumerCore {
        &self.consumer
    }

    /// Producer half.
    pub fn producer(&self) -> &ProducerCore {
        &self.producer
    }

    /// Shorthand for `consumer().register_handler`.
    pub fn register_handler<E: EventPayload>(
        &self,
        handler: impl Fn(&EventMeta, &E) + Send + Sync + 'static,
    ) {
        self.consumer.register_handler(handler);
    }

    /// Shorthand for `producer().publish`.
    pub fn publish<E: EventPayload>(
        &self,
        target: Option<&str>,
        payload: E,
    ) -> Result<(), BusError> {
        self.producer.publish(target, payload)
    }
}

//─────────────────────────────
//  User-facing participant traits
//─────────────────────────────

/// Implement over an embedded [`ConsumerCore`] to become a consumer.
///
/// The blanket impl derives [`EventConsumer`] by delegating to the core.
/// `register_interests` runs when the consumer is attached to a bus;
/// declare handlers there (closures capture clones of the participant's
/// inner state, not the participant itself).
pub trait Consumer: Send + Sync + 'static {
    /// The embedded consumer state.
    fn consumer_core(&self) -> &ConsumerCore;

    /// Attachment hook; the default declares nothing.
    fn register_interests(&self) {}
}

/// Implement over an embedded [`ProducerCore`] to become a producer.
pub trait Producer: Send + Sync + 'static {
    /// The embedded producer state.
    fn producer_core(&self) -> &ProducerCore;

    /// Publish an event with this producer's id as the source.
    fn publish<E: EventPayload>(&self, target: Option<&str>, payload: E) -> Result<(), BusError>
    where
        Self: Sized,
    {
        self.producer_core().publish(target, payload)
    }
}

/// Both roles at once, sharing the [`AgentCore`]'s id.
///
/// Blanket impls derive [`Consumer`] and [`Producer`], so one
/// [`EventBus::attach_agent`](crate::EventBus::attach_agent) call wires
/// both directions. An agent publishing a type it also subscribes to will
/// receive its own event unless the filtered bus suppresses it.
pub trait Agent: Send + Sync + 'static {
    /// The embedded agent state.
    fn agent_core(&self) -> &AgentCore;

    /// Attachment hook; the default declares nothing.
    fn register_interests(&self) {}
}

impl<T: Agent> Consumer for T {
    fn consumer_core(&self) -> &ConsumerCore {
        self.agent_core().consumer()
    }

    fn register_interests(&self) {
        Agent::register_interests(self);
    }
}

impl<T: Agent> Producer for T {
    fn producer_core(&self) -> &ProducerCore {
        self.agent_core().producer()
    }
}

impl<T: Consumer> EventConsumer for T {
    fn id(&self) -> &str {
        self.consumer_core().id()
    }

    fn can_handle(&self, tag: TypeId) -> bool {
        self.consumer_core().can_handle(tag)
    }

    fn handle_event(&self, event: &Envelope) {
        self.consumer_core().dispatch(event)
    }
}

impl<T: Producer> EventProducer for T {
    fn id(&self) -> &str {
        self.producer_core().id()
    }
}
