use crate::event::ComponentId;
use std::fmt;

/// Errors surfaced by bus operations.
#[derive(Debug)]
pub enum BusError {
    /// A participant tried to publish before being attached to a bus, or
    /// after its bus was dropped.
    NotAttached(ComponentId),

    /// The delivery queue refused the event under the `Reject` policy.
    QueueFull {
        /// Publisher of the rejected event.
        source: ComponentId,
    },
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusError::NotAttached(id) => {
                write!(f, "participant `{id}` is not attached to an event bus")
            }
            BusError::QueueFull { source } => {
                write!(f, "delivery queue full, event from `{source}` was rejected")
            }
        }
    }
}

impl std::error::Error for BusError {}
