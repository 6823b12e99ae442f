use std::sync::Arc;
use std::time::Duration;

use agora_ring::{RingBuffer, WritePolicy};
use parking_lot::Mutex;
use tracing::warn;

use crate::event::Envelope;

/// User hook observing how many queued events an overflowing write
/// discarded.
pub type DropCallback = Box<dyn Fn(usize) + Send>;

/// Bounded FIFO of in-flight events feeding the async delivery worker.
///
/// A thin binding of [`RingBuffer<Envelope>`] to the configured overflow
/// policy (`Rotate` by default at the bus level). Every drop is logged at
/// WARN with the discarded count and forwarded to the optional user
/// callback.
pub struct EventQueue {
    ring: RingBuffer<Envelope>,
    callback: Arc<Mutex<Option<DropCallback>>>,
}

impl EventQueue {
    /// Create a queue holding up to `capacity` events.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize, policy: WritePolicy) -> Self {
        let ring = RingBuffer::new(capacity, policy);
        let callback: Arc<Mutex<Option<DropCallback>>> = Arc::new(Mutex::new(None));
        let on_drop = Arc::clone(&callback);
        ring.set_drop_hook(move |count| {
            warn!("dropped {} queued event(s) to make room", count);
            if let Some(cb) = on_drop.lock().as_ref() {
                cb(count);
            }
        });
        Self { ring, callback }
    }

    /// Enqueue an event. `false` means the `Reject` policy refused it (or
    /// the queue is closed).
    pub fn write(&self, event: Envelope) -> bool {
        self.ring.write_one(event)
    }

    /// Dequeue the oldest event. When `blocking`, waits up to `timeout`
    /// for an event or for the queue to close.
    pub fn read(&self, blocking: bool, timeout: Duration) -> Option<Envelope> {
        self.ring.read_one(blocking, timeout)
    }

    /// Number of undelivered events.
    pub fn available(&self) -> usize {
        self.ring.available()
    }

    /// Bound chosen at construction.
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Discard every undelivered event.
    pub fn clear(&self) {
        self.ring.clear();
    }

    /// Install the drop callback. Replaces any previous one; the WARN log
    /// is emitted regardless.
    pub fn set_drop_callback(&self, callback: impl Fn(usize) + Send + 'static) {
        *self.callback.lock() = Some(Box::new(callback));
    }

    /// Stop accepting writes and wake any blocked reader.
    pub(crate) fn close(&self) {
        self.ring.close();
    }
}
