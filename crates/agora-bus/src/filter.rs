use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::event::Envelope;

/// Delivery predicate consulted before a pending delivery proceeds.
///
/// Filters see the candidate consumer's id and the event; returning
/// `false` suppresses that single delivery without affecting other
/// consumers. Implementations must be stateless or synchronize their own
/// state - the bus may evaluate them from several threads at once.
pub trait EventFilter: Send + Sync {
    /// Return `true` if `event` should reach the consumer.
    fn should_deliver(&self, consumer_id: &str, event: &Envelope) -> bool;
}

/// Suppresses events whose source equals the candidate consumer's id.
///
/// Inactive by default, so agents hear their own broadcasts until the
/// flag is switched on. Toggling is atomic and takes effect for the next
/// delivery decision.
pub struct SelfMessageFilter {
    active: AtomicBool,
}

impl SelfMessageFilter {
    /// Create the filter with the given initial state.
    pub fn new(active: bool) -> Self {
        Self {
            active: AtomicBool::new(active),
        }
    }

    /// Enable or disable self-message suppression.
    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    /// Whether suppression is currently enabled.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

impl EventFilter for SelfMessageFilter {
    fn should_deliver(&self, consumer_id: &str, event: &Envelope) -> bool {
        !self.is_active() || event.meta().source != consumer_id
    }
}

/// Ordered filter list plus the embedded self-message filter.
///
/// Mutation takes the chain's own mutex; evaluation works on a snapshot
/// taken outside it, so filter code can never deadlock against the chain.
pub(crate) struct FilterChain {
    filters: Mutex<Vec<Arc<dyn EventFilter>>>,
    self_filter: SelfMessageFilter,
}

impl FilterChain {
    pub(crate) fn new() -> Self {
        Self {
            filters: Mutex::new(Vec::new()),
            self_filter: SelfMessageFilter::new(false),
        }
    }

    pub(crate) fn add(&self, filter: Arc<dyn EventFilter>) {
        self.filters.lock().push(filter);
    }

    pub(crate) fn clear(&self) {
        self.filters.lock().clear();
    }

    pub(crate) fn self_filter(&self) -> &SelfMessageFilter {
        &self.self_filter
    }

    /// Copy of the generic filters, in registration order.
    pub(crate) fn snapshot(&self) -> Vec<Arc<dyn EventFilter>> {
        self.filters.lock().clone()
    }

    /// Evaluate a snapshot followed by the self-message filter.
    pub(crate) fn allows(
        &self,
        snapshot: &[Arc<dyn EventFilter>],
        consumer_id: &str,
        event: &Envelope,
    ) -> bool {
        snapshot
            .iter()
            .all(|filter| filter.should_deliver(consumer_id, event))
            && self.self_filter.should_deliver(consumer_id, event)
    }
}
