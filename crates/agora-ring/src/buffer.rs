use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::WritePolicy;

/// Callback invoked with the number of unread items a write discarded.
///
/// Runs on the writer's thread, after the buffer's internal mutex has been
/// released, so the hook may log or take other locks without inversion
/// risk.
pub type DropHook = Box<dyn Fn(usize) + Send>;

/// Mutable buffer state. Everything in here is guarded by the one mutex in
/// [`RingBuffer`]; `read_pos`/`write_pos` advance modulo capacity and the
/// slots between them (wrapping) are always occupied.
struct State<T> {
    slots: Vec<Option<T>>,
    read_pos: usize,
    write_pos: usize,
    len: usize,
    closed: bool,
}

/// Bounded circular buffer with a configurable [`WritePolicy`].
///
/// Writers are serialized against each other and against readers by an
/// internal mutex, so each writer's items land contiguously and stay in
/// FIFO order modulo drops; the relative order of items from distinct
/// writers is unspecified. A blocking [`read`](RingBuffer::read) waits on
/// a condition variable until data arrives, the buffer is
/// [`close`](RingBuffer::close)d, or the timeout expires.
pub struct RingBuffer<T> {
    state: Mutex<State<T>>,
    readable: Condvar,
    capacity: usize,
    policy: WritePolicy,
    drop_hook: Mutex<Option<DropHook>>,
}

impl<T> RingBuffer<T> {
    /// Create a buffer holding up to `capacity` items.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize, policy: WritePolicy) -> Self {
        assert!(capacity >= 1, "ring buffer capacity must be at least 1");
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            state: Mutex::new(State {
                slots,
                read_pos: 0,
                write_pos: 0,
                len: 0,
                closed: false,
            }),
            readable: Condvar::new(),
            capacity,
            policy,
            drop_hook: Mutex::new(None),
        }
    }

    /// Append a batch of items.
    ///
    /// Returns `true` iff every item of the batch is now stored. Under
    /// [`WritePolicy::Reject`] a batch that does not fit is refused whole
    /// and the buffer is left untouched. Under `Rotate`/`Reset` the write
    /// always succeeds: the oldest (`Rotate`) or all (`Reset`) unread
    /// items are discarded first and the drop hook is invoked with the
    /// discarded count. A batch larger than the whole capacity keeps only
    /// its newest `capacity` items; the skipped ones count as dropped.
    ///
    /// Writes to a closed buffer return `false`.
    pub fn write(&self, items: Vec<T>) -> bool {
        let count = items.len();
        if count == 0 {
            return true;
        }
        let dropped;
        {
            let mut state = self.state.lock();
            if state.closed {
                return false;
            }
            if state.len + count > self.capacity {
                match self.policy {
                    WritePolicy::Reject => return false,
                    WritePolicy::Rotate => {
                        let excess = state.len + count - self.capacity;
                        let from_buffer = excess.min(state.len);
                        for _ in 0..from_buffer {
                            let pos = state.read_pos;
                            state.slots[pos] = None;
                            state.read_pos = (pos + 1) % self.capacity;
                            state.len -= 1;
                        }
                        dropped = Some(excess);
                    }
                    WritePolicy::Reset => {
                        let unread = state.len;
                        for slot in state.slots.iter_mut() {
                            *slot = None;
                        }
                        state.read_pos = state.write_pos;
                        state.len = 0;
                        dropped = Some(unread + count.saturating_sub(self.capacity));
                    }
                }
            } else {
                dropped = None;
            }

            // Oversized batches only retain their newest `capacity` items.
            let skip = count.saturating_sub(self.capacity);
            for item in items.into_iter().skip(skip) {
                let pos = state.write_pos;
                state.slots[pos] = Some(item);
                state.write_pos = (pos + 1) % self.capacity;
            }
            state.len += count - skip;
            debug_assert!(state.len <= self.capacity);
        }
        if let Some(n) = dropped {
            if let Some(hook) = self.drop_hook.lock().as_ref() {
                hook(n);
            }
        }
        if count > 1 {
            self.readable.notify_all();
        } else {
            self.readable.notify_one();
        }
        true
    }

    /// Append a single item. See [`write`](RingBuffer::write).
    pub fn write_one(&self, item: T) -> bool {
        self.write(vec![item])
    }

    /// Remove and return up to `max` items in FIFO order.
    ///
    /// When `blocking` is true and the buffer is empty, waits up to
    /// `timeout` for a writer or for [`close`](RingBuffer::close); an
    /// empty vec is returned on timeout. When `blocking` is false an empty
    /// buffer yields an empty vec immediately.
    pub fn read(&self, max: usize, blocking: bool, timeout: Duration) -> Vec<T> {
        let mut state = self.state.lock();
        if blocking && state.len == 0 && !state.closed {
            let deadline = Instant::now() + timeout;
            while state.len == 0 && !state.closed {
                if self.readable.wait_until(&mut state, deadline).timed_out() {
                    break;
                }
            }
        }
        let take = state.len.min(max);
        let mut out = Vec::with_capacity(take);
        for _ in 0..take {
            let pos = state.read_pos;
            // Slots between read_pos and write_pos are always occupied.
            if let Some(item) = state.slots[pos].take() {
                out.push(item);
            }
            state.read_pos = (pos + 1) % self.capacity;
            state.len -= 1;
        }
        out
    }

    /// Remove and return the oldest item, if any.
    pub fn read_one(&self, blocking: bool, timeout: Duration) -> Option<T> {
        self.read(1, blocking, timeout).pop()
    }

    /// Number of unread items.
    pub fn available(&self) -> usize {
        self.state.lock().len
    }

    /// Free slots remaining before the next write overflows.
    pub fn remaining_capacity(&self) -> usize {
        self.capacity - self.available()
    }

    /// Total capacity chosen at construction.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Overflow policy chosen at construction.
    pub fn policy(&self) -> WritePolicy {
        self.policy
    }

    /// Discard every unread item.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        for slot in state.slots.iter_mut() {
            *slot = None;
        }
        state.read_pos = state.write_pos;
        state.len = 0;
    }

    /// Close the buffer: further writes fail and blocked readers wake up
    /// immediately. Unread items remain readable.
    pub fn close(&self) {
        {
            let mut state = self.state.lock();
            state.closed = true;
        }
        self.readable.notify_all();
    }

    /// Whether [`close`](RingBuffer::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Install the hook invoked with the count of items discarded by an
    /// overflowing write. Replaces any previous hook.
    pub fn set_drop_hook(&self, hook: impl Fn(usize) + Send + 'static) {
        *self.drop_hook.lock() = Some(Box::new(hook));
    }
}

impl<T: Clone> RingBuffer<T> {
    /// Copy of the oldest unread item without consuming it.
    pub fn peek_one(&self) -> Option<T> {
        let state = self.state.lock();
        if state.len == 0 {
            return None;
        }
        state.slots[state.read_pos].clone()
    }
}
