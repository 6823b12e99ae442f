//! Asynchronous delivery: the background worker, queue overflow under
//! each policy, shutdown semantics and fault containment off-thread.

mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use agora_bus::{
    BusConfig, BusError, Consumer, ConsumerCore, EventBus, Producer, WritePolicy,
};
use anyhow::Result;

use common::{Gate, Inbox, RecordingAgent, RecordingConsumer, TestEvent};

const WAIT: Duration = Duration::from_secs(5);

fn async_bus(queue_capacity: usize, write_policy: WritePolicy) -> EventBus {
    EventBus::new(BusConfig {
        async_delivery: true,
        queue_capacity,
        write_policy,
    })
}

/// Consumer whose handler records the event, then parks on a gate. Used
/// to hold the delivery worker mid-event.
struct Blocking {
    core: ConsumerCore,
    inbox: Arc<Inbox>,
    entered: Arc<Gate>,
    release: Arc<Gate>,
}

impl Blocking {
    fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            core: ConsumerCore::new(id),
            inbox: Arc::new(Inbox::default()),
            entered: Arc::new(Gate::default()),
            release: Arc::new(Gate::default()),
        })
    }
}

impl Consumer for Blocking {
    fn consumer_core(&self) -> &ConsumerCore {
        &self.core
    }

    fn register_interests(&self) {
        let inbox = self.inbox.clone();
        let entered = self.entered.clone();
        let release = self.release.clone();
        self.core.register_handler::<TestEvent>(move |meta, event| {
            inbox.push(meta.clone(), event.value);
            entered.open();
            release.wait(WAIT);
        });
    }
}

#[test]
fn async_delivery_reaches_consumer() -> Result<()> {
    let bus = async_bus(64, WritePolicy::Rotate);
    let c1 = RecordingConsumer::new("c1");
    bus.attach_consumer(&c1);

    bus.publish("producer-1", Some("c1"), TestEvent { value: 42 })?;

    assert!(c1.inbox.wait_for(1, WAIT));
    assert_eq!(c1.inbox.values(), vec![42]);
    assert_eq!(c1.inbox.metas()[0].source, "producer-1");
    Ok(())
}

#[test]
fn async_broadcast_reaches_agent() -> Result<()> {
    let bus = async_bus(64, WritePolicy::Rotate);
    let agent = RecordingAgent::new("a1");
    bus.attach_agent(&agent);

    agent.publish(None, TestEvent { value: 8 })?;

    assert!(agent.inbox.wait_for(1, WAIT));
    assert_eq!(agent.inbox.metas()[0].source, "a1");
    Ok(())
}

#[test]
fn concurrent_async_publishers_all_deliver() -> Result<()> {
    let bus = Arc::new(async_bus(256, WritePolicy::Reject));
    let c1 = RecordingConsumer::new("c1");
    bus.attach_consumer(&c1);

    let mut publishers = Vec::new();
    for p in 0..4 {
        let bus = bus.clone();
        publishers.push(thread::spawn(move || {
            for i in 0..10 {
                bus.publish(
                    &format!("producer-{p}"),
                    None,
                    TestEvent { value: p * 10 + i },
                )
                .unwrap();
            }
        }));
    }
    for publisher in publishers {
        publisher.join().unwrap();
    }

    assert!(c1.inbox.wait_for(40, WAIT));
    let mut values = c1.inbox.values();
    values.sort_unstable();
    assert_eq!(values, (0..40).collect::<Vec<_>>());
    Ok(())
}

#[test]
fn reject_policy_surfaces_queue_full() -> Result<()> {
    let bus = async_bus(1, WritePolicy::Reject);
    let blocking = Blocking::new("slow");
    bus.attach_consumer(&blocking);

    // First event is dequeued and pins the worker inside the handler.
    bus.publish("src", None, TestEvent { value: 1 })?;
    assert!(blocking.entered.wait(WAIT));

    // Second fills the single queue slot; third must be rejected.
    bus.publish("src", None, TestEvent { value: 2 })?;
    let err = bus.publish("src", None, TestEvent { value: 3 }).unwrap_err();
    assert!(matches!(err, BusError::QueueFull { source } if source == "src"));

    blocking.release.open();
    assert!(blocking.inbox.wait_for(2, WAIT));
    assert_eq!(blocking.inbox.values(), vec![1, 2]);
    Ok(())
}

#[test]
fn shutdown_discards_pending_events() -> Result<()> {
    let bus = Arc::new(async_bus(8, WritePolicy::Reject));
    let blocking = Blocking::new("slow");
    bus.attach_consumer(&blocking);

    bus.publish("src", None, TestEvent { value: 1 })?;
    assert!(blocking.entered.wait(WAIT));
    bus.publish("src", None, TestEvent { value: 2 })?;
    bus.publish("src", None, TestEvent { value: 3 })?;

    // Shut down while the worker is mid-event; it must finish that event
    // and drop the rest of the queue.
    let shutdown = {
        let bus = bus.clone();
        thread::spawn(move || bus.shutdown())
    };
    let deadline = std::time::Instant::now() + WAIT;
    while bus.is_running() && std::time::Instant::now() < deadline {
        thread::yield_now();
    }
    assert!(!bus.is_running());
    blocking.release.open();
    shutdown.join().unwrap();

    assert!(!bus.is_running());
    assert_eq!(blocking.inbox.values(), vec![1]);
    Ok(())
}

#[test]
fn dropping_the_bus_joins_the_worker() -> Result<()> {
    let c1 = RecordingConsumer::new("c1");
    {
        let bus = async_bus(16, WritePolicy::Rotate);
        bus.attach_consumer(&c1);
        bus.publish("src", None, TestEvent { value: 1 })?;
        assert!(c1.inbox.wait_for(1, WAIT));
    } // Drop joins the worker; falling out of scope must not hang.

    assert_eq!(c1.inbox.len(), 1);
    Ok(())
}

#[test]
fn worker_survives_handler_panic() -> Result<()> {
    struct Faulty {
        core: ConsumerCore,
    }
    impl Consumer for Faulty {
        fn consumer_core(&self) -> &ConsumerCore {
            &self.core
        }
        fn register_interests(&self) {
            self.core
                .register_handler::<TestEvent>(|_, _| panic!("boom"));
        }
    }

    let bus = async_bus(16, WritePolicy::Rotate);
    let faulty = Arc::new(Faulty {
        core: ConsumerCore::new("faulty"),
    });
    let healthy = RecordingConsumer::new("healthy");
    bus.attach_consumer(&faulty);
    bus.attach_consumer(&healthy);

    bus.publish("src", None, TestEvent { value: 1 })?;
    bus.publish("src", None, TestEvent { value: 2 })?;

    assert!(healthy.inbox.wait_for(2, WAIT));
    assert_eq!(healthy.inbox.values(), vec![1, 2]);
    Ok(())
}
