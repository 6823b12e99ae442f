use std::any::{Any, TypeId};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable identifier of a producer, consumer or agent within one bus.
///
/// Uniqueness is enforced last-write-wins: registering a second participant
/// under an existing id replaces the first.
pub type ComponentId = String;

/// Marker for types that can travel through the bus as event payloads.
///
/// Blanket-implemented for every `Any + Send + Sync` type; the concrete
/// type's [`TypeId`] doubles as the dispatch tag, so two payloads share a
/// tag iff they are the same concrete type.
pub trait EventPayload: Any + Send + Sync {}

impl<T: Any + Send + Sync> EventPayload for T {}

/// Source, target and publish instant of an event.
///
/// Written exactly once by the publishing path before any consumer can
/// observe the event. An empty `source` means the publisher is anonymous;
/// `target: None` means broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMeta {
    /// Component that published the event (empty = anonymous).
    pub source: ComponentId,
    /// Single addressee, or `None` to broadcast to every interested
    /// consumer.
    pub target: Option<ComponentId>,
    /// Wall-clock instant stamped at publish.
    pub timestamp: DateTime<Utc>,
}

impl EventMeta {
    /// Whether the event goes to every interested consumer.
    pub fn is_broadcast(&self) -> bool {
        self.target.is_none()
    }
}

/// Bus-owned event carrier: metadata plus a type-tagged boxed payload.
///
/// Envelopes belong to the bus from publish until the last matching
/// handler returns; handlers only ever see `&Envelope` borrows and cannot
/// retain the event past their own return.
pub struct Envelope {
    meta: EventMeta,
    tag: TypeId,
    type_name: &'static str,
    payload: Box<dyn Any + Send + Sync>,
}

impl Envelope {
    /// Wrap a payload, stamping source, target and the current instant.
    pub fn new<E: EventPayload>(source: &str, target: Option<&str>, payload: E) -> Self {
        Self {
            meta: EventMeta {
                source: source.to_owned(),
                target: target.map(str::to_owned),
                timestamp: Utc::now(),
            },
            tag: TypeId::of::<E>(),
            type_name: std::any::type_name::<E>(),
            payload: Box::new(payload),
        }
    }

    /// Source, target and timestamp.
    pub fn meta(&self) -> &EventMeta {
        &self.meta
    }

    /// Dispatch tag of the concrete payload type.
    pub fn tag(&self) -> TypeId {
        self.tag
    }

    /// Human-readable payload type name, for logs only.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Whether the payload is an `E`.
    pub fn is<E: EventPayload>(&self) -> bool {
        self.tag == TypeId::of::<E>()
    }

    /// Borrow the payload as its concrete type.
    pub fn downcast_ref<E: EventPayload>(&self) -> Option<&E> {
        self.payload.downcast_ref::<E>()
    }
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("meta", &self.meta)
            .field("type", &self.type_name)
            .finish()
    }
}
