//! Connection Handle
//!
//! What `connect` hands back once the transport has opened. It builds
//! callers for the two call shapes and registers signal listeners.
//!
//! # Call Shapes
//!
//! ```text
//! connection.call(["admin", "dna", "list"])?   method "admin/dna/list"
//! connection.call_zome("inst", "zome", "fn")   method "call", payload ZomeCall
//! ```
//!
//! Both return a factory; `.timeout(override)` turns it into a reusable
//! `Caller`, and `Caller::call(payload)` issues the request through
//! `call_when_connected`.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use crate::config::TimeoutPolicy;
use crate::coordinator::call_when_connected;
use crate::error::{ClientError, Result};
use crate::events::{EventKind, TransportEvent};
use crate::timer::TimerRegistry;
use crate::transport::RpcTransport;

/// Outer method name for zome calls.
pub const ZOME_CALL_METHOD: &str = "call";

/// The envelope sent as the payload of a zome call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZomeCall {
    pub instance_id: String,
    pub zome: String,
    pub function: String,
    pub args: Value,
}

/// A ready connection to a conductor interface.
///
/// Cheap to clone; clones share the transport and timer registry.
#[derive(Clone)]
pub struct Connection {
    transport: Arc<dyn RpcTransport>,
    timers: TimerRegistry,
    timeout: TimeoutPolicy,
}

impl Connection {
    pub(crate) fn new(transport: Arc<dyn RpcTransport>, timeout: TimeoutPolicy) -> Self {
        Self {
            transport,
            timers: TimerRegistry::new(),
            timeout,
        }
    }

    /// Build a factory for a generic method call.
    ///
    /// A single segment is used verbatim; several are joined with `/`.
    ///
    /// # Errors
    /// `InvalidMethod` if no segments are given.
    pub fn call<I, S>(&self, segments: I) -> Result<CallFactory>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let segments: Vec<String> = segments
            .into_iter()
            .map(|s| s.as_ref().to_string())
            .collect();
        if segments.is_empty() {
            return Err(ClientError::InvalidMethod(
                "at least one method segment is required".into(),
            ));
        }

        Ok(CallFactory {
            connection: self.clone(),
            method: segments.join("/"),
        })
    }

    /// Build a factory for a zome call on `instance_id`.
    pub fn call_zome(
        &self,
        instance_id: impl Into<String>,
        zome: impl Into<String>,
        function: impl Into<String>,
    ) -> ZomeCallFactory {
        ZomeCallFactory {
            connection: self.clone(),
            instance_id: instance_id.into(),
            zome: zome.into(),
            function: function.into(),
        }
    }

    /// Register a callback for server-pushed signals.
    ///
    /// Every inbound frame is parsed; the callback sees only messages with a
    /// `signal` or `instance_stats` field. Call responses never reach it.
    /// Registrations are additive and run in registration order.
    pub fn on_signal<F>(&self, callback: F)
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.transport
            .events()
            .on(EventKind::Message, move |event| {
                if let TransportEvent::Message(raw) = event {
                    if let Some(msg) = parse_signal(raw) {
                        callback(msg);
                    }
                }
            });
    }

    /// Signals as a channel, for consumers that prefer to `recv().await`.
    pub fn signals(&self) -> mpsc::UnboundedReceiver<Value> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.on_signal(move |msg| {
            let _ = tx.send(msg);
        });
        rx
    }

    /// Close the underlying transport.
    pub async fn close(&self) -> Result<()> {
        self.transport.close().await
    }

    /// The underlying transport, for advanced use.
    pub fn transport(&self) -> &Arc<dyn RpcTransport> {
        &self.transport
    }

    pub fn timers(&self) -> &TimerRegistry {
        &self.timers
    }

    pub fn timeout_policy(&self) -> TimeoutPolicy {
        self.timeout
    }

    fn caller(&self, target: Target, override_ms: Option<u64>) -> Caller {
        Caller {
            connection: self.clone(),
            target,
            timeout: self.timeout.resolve(override_ms),
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("ready", &self.transport.is_ready())
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Factory for a generic method call; see `Connection::call`.
#[derive(Debug, Clone)]
pub struct CallFactory {
    connection: Connection,
    method: String,
}

impl CallFactory {
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Bind a timeout override in milliseconds (`None` or 0 uses the
    /// connection default).
    pub fn timeout(&self, override_ms: Option<u64>) -> Caller {
        self.connection
            .caller(Target::Method(self.method.clone()), override_ms)
    }
}

/// Factory for a zome call; see `Connection::call_zome`.
#[derive(Debug, Clone)]
pub struct ZomeCallFactory {
    connection: Connection,
    instance_id: String,
    zome: String,
    function: String,
}

impl ZomeCallFactory {
    /// Bind a timeout override in milliseconds (`None` or 0 uses the
    /// connection default).
    pub fn timeout(&self, override_ms: Option<u64>) -> Caller {
        self.connection.caller(
            Target::Zome {
                instance_id: self.instance_id.clone(),
                zome: self.zome.clone(),
                function: self.function.clone(),
            },
            override_ms,
        )
    }
}

#[derive(Debug, Clone)]
enum Target {
    Method(String),
    Zome {
        instance_id: String,
        zome: String,
        function: String,
    },
}

/// A bound call, reusable for any number of payloads.
#[derive(Debug, Clone)]
pub struct Caller {
    connection: Connection,
    target: Target,
    timeout: Option<Duration>,
}

impl Caller {
    /// The effective timeout for each phase of this call.
    pub fn effective_timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Issue the call with `payload` and wait for the raw response.
    pub async fn call<P: Serialize>(&self, payload: P) -> Result<Value> {
        let payload = serde_json::to_value(payload)?;
        let (method, params) = match &self.target {
            Target::Method(method) => (method.as_str(), payload),
            Target::Zome {
                instance_id,
                zome,
                function,
            } => {
                let envelope = ZomeCall {
                    instance_id: instance_id.clone(),
                    zome: zome.clone(),
                    function: function.clone(),
                    args: payload,
                };
                (ZOME_CALL_METHOD, serde_json::to_value(envelope)?)
            }
        };

        call_when_connected(
            Arc::clone(&self.connection.transport),
            &self.connection.timers,
            method,
            params,
            self.timeout,
        )
        .await
    }
}

/// Parse a raw inbound frame and keep it only if it is a signal.
pub fn parse_signal(raw: &str) -> Option<Value> {
    if raw.is_empty() {
        return None;
    }
    let msg: Value = match serde_json::from_str(raw) {
        Ok(msg) => msg,
        Err(e) => {
            debug!(error = %e, "Ignoring unparseable inbound message");
            return None;
        }
    };
    is_signal(&msg).then_some(msg)
}

fn is_signal(msg: &Value) -> bool {
    ["signal", "instance_stats"]
        .iter()
        .any(|key| msg.get(key).is_some_and(|v| !v.is_null()))
}
