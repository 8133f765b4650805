//! Shared test fixtures: an in-process transport whose readiness and
//! responses are driven by the test.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use conductor_client::{ClientError, EventBus, EventKind, Result, RpcTransport, TransportEvent};
use serde_json::Value;

/// How the mock answers calls.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Answer immediately with this value
    Respond(Value),
    /// Answer with the request params
    Echo,
    /// Fail with a transport error carrying this message
    Fail(String),
    /// Answer after a delay
    Delay(Duration, Value),
    /// Never answer
    Hang,
}

pub struct MockTransport {
    ready: AtomicBool,
    closed: AtomicBool,
    events: EventBus,
    behavior: Mutex<Behavior>,
    calls: Mutex<Vec<(String, Value)>>,
    in_flight: Arc<AtomicUsize>,
}

impl MockTransport {
    pub fn new(ready: bool, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            ready: AtomicBool::new(ready),
            closed: AtomicBool::new(false),
            events: EventBus::new(),
            behavior: Mutex::new(behavior),
            calls: Mutex::new(Vec::new()),
            in_flight: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn ready(behavior: Behavior) -> Arc<Self> {
        Self::new(true, behavior)
    }

    pub fn not_ready(behavior: Behavior) -> Arc<Self> {
        Self::new(false, behavior)
    }

    pub fn dyn_ref(self: &Arc<Self>) -> Arc<dyn RpcTransport> {
        Arc::clone(self) as Arc<dyn RpcTransport>
    }

    /// Become ready and announce it.
    pub fn open(&self) {
        self.ready.store(true, Ordering::SeqCst);
        self.events.emit(TransportEvent::Opened);
    }

    /// Drop readiness without closing, as a socket that went away would.
    pub fn disconnect(&self) {
        self.ready.store(false, Ordering::SeqCst);
        self.events.emit(TransportEvent::Closed);
    }

    pub fn fail(&self, detail: &str) {
        self.events.emit(TransportEvent::Error(detail.to_string()));
    }

    /// Deliver a raw inbound frame.
    pub fn push_message(&self, raw: &str) {
        self.events.emit(TransportEvent::Message(raw.to_string()));
    }

    pub fn set_behavior(&self, behavior: Behavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls that started and whose futures have not yet finished or been dropped.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn listeners(&self, kind: EventKind) -> usize {
        self.events.listener_count(kind)
    }
}

struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn start(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl RpcTransport for MockTransport {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn events(&self) -> &EventBus {
        &self.events
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        self.calls
            .lock()
            .unwrap()
            .push((method.to_string(), params.clone()));
        let _in_flight = InFlight::start(&self.in_flight);

        let behavior = self.behavior.lock().unwrap().clone();
        match behavior {
            Behavior::Respond(value) => Ok(value),
            Behavior::Echo => Ok(params),
            Behavior::Fail(message) => Err(ClientError::Transport(message)),
            Behavior::Delay(delay, value) => {
                tokio::time::sleep(delay).await;
                Ok(value)
            }
            Behavior::Hang => std::future::pending().await,
        }
    }

    async fn close(&self) -> Result<()> {
        self.ready.store(false, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        self.events.emit(TransportEvent::Closed);
        Ok(())
    }
}

/// Yield until `cond` holds, so spawned tasks get a chance to run.
pub async fn settle(mut cond: impl FnMut() -> bool) {
    for _ in 0..100 {
        if cond() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}
