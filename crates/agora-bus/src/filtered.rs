use std::ops::Deref;
use std::sync::Arc;

use crate::bus::{BusConfig, EventBus};
use crate::filter::{EventFilter, SelfMessageFilter};

/// An [`EventBus`] that screens every pending delivery through a filter
/// chain.
///
/// Generic filters run in registration order, then the embedded
/// [`SelfMessageFilter`]; the delivery proceeds only if every predicate
/// allows it. This applies to targeted and broadcast dispatch alike. The
/// full bus surface is available through `Deref`.
pub struct FilteredEventBus {
    bus: EventBus,
}

impl FilteredEventBus {
    /// Create a filtering bus with the given options.
    ///
    /// # Panics
    ///
    /// Same conditions as [`EventBus::new`].
    pub fn new(config: BusConfig) -> Self {
        Self {
            bus: EventBus::new(config),
        }
    }

    /// Append a filter to the chain.
    pub fn add_filter(&self, filter: Arc<dyn EventFilter>) {
        self.bus.filter_chain().add(filter);
    }

    /// Remove every generic filter. The self-message filter is embedded
    /// and keeps its current state.
    pub fn clear_filters(&self) {
        self.bus.filter_chain().clear();
    }

    /// Handle to the embedded self-message filter, for toggling
    /// suppression.
    pub fn self_message_filter(&self) -> &SelfMessageFilter {
        self.bus.filter_chain().self_filter()
    }
}

impl Deref for FilteredEventBus {
    type Target = EventBus;

    fn deref(&self) -> &EventBus {
        &self.bus
    }
}
