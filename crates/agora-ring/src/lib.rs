#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **agora-ring** – Bounded ring buffer with explicit overflow policies.
//!
//! This crate provides the storage primitive underneath the Agora event
//! queue: a fixed-capacity circular buffer whose behaviour on overflow is
//! chosen up front via [`WritePolicy`]. It sits at the bottom of the crate
//! graph and knows nothing about events, buses or logging; the only hook to
//! the outside world is an optional drop callback fired when a write
//! discards unread items.
//!
//! All operations are serialized by one internal mutex; readers may block
//! on a condition variable signalled by writers, with a bounded timeout.

mod buffer;
mod policy;

pub use buffer::{DropHook, RingBuffer};
pub use policy::WritePolicy;
