//! Shared fixtures for the integration suites: test payloads, recording
//! participants with bounded waits, a rendezvous gate for pinning the
//! delivery worker, and a log capture for asserting on warn/error lines.

#![allow(dead_code)]

use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use agora_bus::{Agent, AgentCore, Consumer, ConsumerCore, EventMeta};
use parking_lot::{Condvar, Mutex};
use tracing_subscriber::fmt::MakeWriter;

#[derive(Debug, Clone, PartialEq)]
pub struct TestEvent {
    pub value: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OtherEvent {
    pub label: &'static str,
}

#[derive(Debug)]
pub struct EchoRequest {
    pub value: i32,
}

#[derive(Debug)]
pub struct EchoReply {
    pub value: i32,
}

/// Thread-safe record of received events with bounded waiting.
#[derive(Default)]
pub struct Inbox {
    events: Mutex<Vec<(EventMeta, i32)>>,
    arrived: Condvar,
}

impl Inbox {
    pub fn push(&self, meta: EventMeta, value: i32) {
        self.events.lock().push((meta, value));
        self.arrived.notify_all();
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn values(&self) -> Vec<i32> {
        self.events.lock().iter().map(|(_, v)| *v).collect()
    }

    pub fn metas(&self) -> Vec<EventMeta> {
        self.events.lock().iter().map(|(m, _)| m.clone()).collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    /// Wait until at least `n` events have arrived. `false` on timeout.
    pub fn wait_for(&self, n: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut events = self.events.lock();
        while events.len() < n {
            if self.arrived.wait_until(&mut events, deadline).timed_out() {
                return events.len() >= n;
            }
        }
        true
    }
}

/// One-shot rendezvous point between a test and a handler.
#[derive(Default)]
pub struct Gate {
    open: Mutex<bool>,
    cv: Condvar,
}

impl Gate {
    pub fn open(&self) {
        *self.open.lock() = true;
        self.cv.notify_all();
    }

    /// Wait until the gate opens. `false` on timeout.
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut open = self.open.lock();
        while !*open {
            if self.cv.wait_until(&mut open, deadline).timed_out() {
                return *open;
            }
        }
        true
    }
}

/// Consumer recording every `TestEvent` it receives.
pub struct RecordingConsumer {
    core: ConsumerCore,
    pub inbox: Arc<Inbox>,
}

impl RecordingConsumer {
    pub fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            core: ConsumerCore::new(id),
            inbox: Arc::new(Inbox::default()),
        })
    }
}

impl Consumer for RecordingConsumer {
    fn consumer_core(&self) -> &ConsumerCore {
        &self.core
    }

    fn register_interests(&self) {
        let inbox = self.inbox.clone();
        self.core.register_handler::<TestEvent>(move |meta, event| {
            inbox.push(meta.clone(), event.value);
        });
    }
}

/// Agent recording every `TestEvent`; the producer half publishes under
/// the same id, so self-message scenarios work out of the box.
pub struct RecordingAgent {
    core: AgentCore,
    pub inbox: Arc<Inbox>,
}

impl RecordingAgent {
    pub fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            core: AgentCore::new(id),
            inbox: Arc::new(Inbox::default()),
        })
    }
}

impl Agent for RecordingAgent {
    fn agent_core(&self) -> &AgentCore {
        &self.core
    }

    fn register_interests(&self) {
        let inbox = self.inbox.clone();
        self.core.register_handler::<TestEvent>(move |meta, event| {
            inbox.push(meta.clone(), event.value);
        });
    }
}

/// Agent that answers every `EchoRequest` broadcast with an `EchoReply`,
/// publishing from inside its own handler.
pub struct EchoAgent {
    core: Arc<AgentCore>,
}

impl EchoAgent {
    pub fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            core: Arc::new(AgentCore::new(id)),
        })
    }
}

impl Agent for EchoAgent {
    fn agent_core(&self) -> &AgentCore {
        &self.core
    }

    fn register_interests(&self) {
        let core = self.core.clone();
        self.core.register_handler::<EchoRequest>(move |_meta, request| {
            let _ = core.publish(None, EchoReply {
                value: request.value,
            });
        });
    }
}

/// Consumer recording `EchoReply` values.
pub struct ReplyConsumer {
    core: ConsumerCore,
    pub inbox: Arc<Inbox>,
}

impl ReplyConsumer {
    pub fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            core: ConsumerCore::new(id),
            inbox: Arc::new(Inbox::default()),
        })
    }
}

impl Consumer for ReplyConsumer {
    fn consumer_core(&self) -> &ConsumerCore {
        &self.core
    }

    fn register_interests(&self) {
        let inbox = self.inbox.clone();
        self.core.register_handler::<EchoReply>(move |meta, reply| {
            inbox.push(meta.clone(), reply.value);
        });
    }
}

/// Captures everything the core logs through `tracing` on this thread.
#[derive(Clone, Default)]
pub struct LogCapture {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl LogCapture {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buf.lock()).into_owned()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.contents().contains(needle)
    }
}

pub struct LogWriter(Arc<Mutex<Vec<u8>>>);

impl io::Write for LogWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> LogWriter {
        LogWriter(self.buf.clone())
    }
}

/// Install a thread-local subscriber capturing DEBUG and up; keep the
/// guard alive for the duration of the assertions.
pub fn capture_logs() -> (LogCapture, tracing::subscriber::DefaultGuard) {
    let capture = LogCapture::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(capture.clone())
        .with_max_level(tracing::Level::DEBUG)
        .finish();
    let guard = tracing::subscriber::set_default(subscriber);
    (capture, guard)
}
