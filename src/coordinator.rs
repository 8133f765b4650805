//! Readiness-gated calls with timeouts
//!
//! `call_when_connected` never hands a call to the transport before the
//! transport reports ready. A call issued early is parked on a one-shot
//! `Opened` listener and forwarded when the socket opens.
//!
//! # Phases
//!
//! ```text
//!   not ready ──[connect timer]──► Opened ──[response timer]──► response
//!   ready ─────────────────────────────────[response timer]──► response
//! ```
//!
//! Each pending call owns a single timer slot. Moving from the connect phase
//! to the response phase clears the connect timer and arms the response timer
//! under the slot lock, so the two are never live together.
//!
//! Four things can finish a call: the response, the connect timer, the
//! response timer, or a transport failure. They all race on one
//! `CompletionGate`; the loser results are dropped. Whatever wins, the slot is
//! emptied, the `Opened` listener is removed and the in-flight transport call
//! is aborted before the caller resumes.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{ClientError, Result};
use crate::events::{EventKind, ListenerId};
use crate::gate::CompletionGate;
use crate::timer::{Timer, TimerKind, TimerRegistry};
use crate::transport::RpcTransport;

/// Issue `method(payload)` once `transport` is ready, bounded by `timeout`.
///
/// `timeout` bounds each phase separately: waiting for readiness, then
/// waiting for the response. `None` disables both bounds.
///
/// # Errors
/// - `ConnectTimeout` if the transport does not open in time
/// - `ResponseTimeout` if the forwarded call is not answered in time
/// - whatever the transport's call returned, unchanged
pub async fn call_when_connected(
    transport: Arc<dyn RpcTransport>,
    timers: &TimerRegistry,
    method: &str,
    payload: Value,
    timeout: Option<Duration>,
) -> Result<Value> {
    let (gate, rx) = CompletionGate::channel();
    let call = Arc::new(PendingCall {
        transport: Arc::clone(&transport),
        timers: timers.clone(),
        method: method.to_string(),
        payload,
        timeout,
        gate,
        timer: Mutex::new(None),
        in_flight: Mutex::new(None),
    });

    let mut cleanup = Cleanup {
        call: Arc::clone(&call),
        listener: None,
    };

    if transport.is_ready() {
        call.forward(&mut call.slot());
    } else {
        debug!(method = %method, "Socket not ready, queueing call until open");
        *call.slot() = call.arm(TimerKind::Connect);

        let queued = Arc::clone(&call);
        let id = transport
            .events()
            .once(EventKind::Opened, move |_| queued.on_opened());
        cleanup.listener = Some(id);

        // The socket may have opened between the readiness check and the
        // registration; if so our listener missed it.
        if transport.is_ready() && transport.events().off(id) {
            call.on_opened();
        }
    }

    let result = rx.await.unwrap_or(Err(ClientError::ConnectionClosed));
    drop(cleanup);

    if let Err(ref e) = result {
        if e.is_timeout() {
            warn!(method = %method, error = %e, "Call timed out");
        } else {
            debug!(method = %method, error = %e, "Call failed");
        }
    }
    result
}

struct PendingCall {
    transport: Arc<dyn RpcTransport>,
    timers: TimerRegistry,
    method: String,
    payload: Value,
    timeout: Option<Duration>,
    gate: CompletionGate<Result<Value>>,
    /// The connect timer or the response timer, never both
    timer: Mutex<Option<Timer>>,
    in_flight: Mutex<Option<JoinHandle<()>>>,
}

impl PendingCall {
    fn slot(&self) -> MutexGuard<'_, Option<Timer>> {
        self.timer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn arm(&self, kind: TimerKind) -> Option<Timer> {
        let after = self.timeout?;
        let gate = self.gate.clone();
        let method = self.method.clone();
        let payload = self.payload.to_string();

        Some(self.timers.arm(kind, after, move || {
            let err = match kind {
                TimerKind::Connect => ClientError::ConnectTimeout { method, payload },
                TimerKind::Response => ClientError::ResponseTimeout { method, payload },
            };
            gate.complete(Err(err));
        }))
    }

    /// Arm the response timer into `slot` and hand the call to the transport.
    fn forward(self: &Arc<Self>, slot: &mut Option<Timer>) {
        *slot = self.arm(TimerKind::Response);

        let call = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let result = call
                .transport
                .call(&call.method, call.payload.clone())
                .await;
            if let Some(timer) = call.slot().take() {
                timer.clear();
            }
            call.gate.complete(result);
        });

        *self
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(handle);
    }

    fn on_opened(self: &Arc<Self>) {
        let mut slot = self.slot();
        if self.gate.is_completed() {
            return;
        }
        if let Some(timer) = slot.take() {
            // Fired but not yet completed the gate: the timeout still wins
            if !timer.clear() {
                return;
            }
        }
        debug!(method = %self.method, "Socket opened, forwarding queued call");
        self.forward(&mut slot);
    }
}

/// Releases everything a pending call holds. Runs on every exit path,
/// including the caller dropping the future.
struct Cleanup {
    call: Arc<PendingCall>,
    listener: Option<ListenerId>,
}

impl Drop for Cleanup {
    fn drop(&mut self) {
        if let Some(id) = self.listener.take() {
            self.call.transport.events().off(id);
        }
        if let Some(timer) = self.call.slot().take() {
            timer.clear();
        }
        if let Some(handle) = self
            .call
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
        {
            handle.abort();
        }
    }
}
