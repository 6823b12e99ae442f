#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **agora-bus** – Typed, concurrent, in-process event bus.
//!
//! The bus mediates communication between loosely coupled participants:
//! producers publish typed events, consumers declare interest per payload
//! type and receive matching events, and agents do both. Dispatch is
//! type-safe (payloads are routed by their concrete type), optionally
//! asynchronous through a bounded ring-buffered queue with an explicit
//! overflow policy, and optionally screened by a filter chain - including
//! a built-in self-message filter so agents can ignore their own
//! broadcasts.
//!
//! Events carry their publisher's id, an optional target (`None`
//! broadcasts) and a publish timestamp; the bus owns each event from
//! publish until the last handler returns. Logging goes through the
//! [`tracing`] facade.
//!
//! ```
//! use std::sync::Arc;
//! use agora_bus::{BusConfig, Consumer, ConsumerCore, EventBus};
//! use parking_lot::Mutex;
//!
//! #[derive(Debug)]
//! struct Reading {
//!     celsius: i64,
//! }
//!
//! struct Display {
//!     core: ConsumerCore,
//!     seen: Arc<Mutex<Vec<i64>>>,
//! }
//!
//! impl Consumer for Display {
//!     fn consumer_core(&self) -> &ConsumerCore {
//!         &self.core
//!     }
//!
//!     fn register_interests(&self) {
//!         let seen = self.seen.clone();
//!         self.core.register_handler::<Reading>(move |_meta, reading| {
//!             seen.lock().push(reading.celsius);
//!         });
//!     }
//! }
//!
//! let bus = EventBus::new(BusConfig::default());
//! let display = Arc::new(Display {
//!     core: ConsumerCore::new("display"),
//!     seen: Arc::default(),
//! });
//! bus.attach_consumer(&display);
//! bus.publish("sensor", None, Reading { celsius: 21 }).unwrap();
//! assert_eq!(display.seen.lock().as_slice(), &[21]);
//! ```

mod bus;
mod error;
mod event;
mod filter;
mod filtered;
mod participant;
mod queue;

pub use bus::{BusConfig, EventBus};
pub use error::BusError;
pub use event::{ComponentId, Envelope, EventMeta, EventPayload};
pub use filter::{EventFilter, SelfMessageFilter};
pub use filtered::FilteredEventBus;
pub use participant::{
    Agent, AgentCore, Consumer, ConsumerCore, EventConsumer, EventProducer, Producer,
    ProducerCore,
};
pub use queue::{DropCallback, EventQueue};

pub use agora_ring::WritePolicy;
