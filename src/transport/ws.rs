//! WebSocket Transport
//!
//! A persistent JSON-RPC 2.0 connection to a conductor interface.
//!
//! One background task owns the socket. It connects, flips `ready`, emits
//! `Opened`, then pumps outbound requests and inbound frames until the socket
//! drops. Every inbound text frame is emitted raw as `Message` before being
//! matched against pending calls by id. On disconnect it clears `ready`,
//! fails whatever was in flight, emits `Closed`, and reconnects according to
//! `WsClientConfig`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, http::HeaderValue, protocol::Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, info, warn};

use super::rpc::{RpcRequest, RpcResponse};
use super::RpcTransport;
use crate::error::{ClientError, Result};
use crate::events::{EventBus, TransportEvent};

/// Options passed through to the WebSocket adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WsClientConfig {
    /// Start connecting as soon as the transport is created
    #[serde(default = "default_true")]
    pub autoconnect: bool,

    /// Reconnect after the socket drops or a connect attempt fails
    #[serde(default = "default_true")]
    pub reconnect: bool,

    /// Delay between reconnection attempts
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval_ms: u64,

    /// Consecutive failed attempts before giving up (0 = unlimited)
    #[serde(default = "default_max_reconnects")]
    pub max_reconnects: u32,

    /// Origin header sent with the upgrade request
    #[serde(default = "default_origin")]
    pub origin: String,
}

fn default_true() -> bool {
    true
}

fn default_reconnect_interval() -> u64 {
    1000
}

fn default_max_reconnects() -> u32 {
    5
}

fn default_origin() -> String {
    "http://localhost".to_string()
}

impl Default for WsClientConfig {
    fn default() -> Self {
        Self {
            autoconnect: true,
            reconnect: true,
            reconnect_interval_ms: default_reconnect_interval(),
            max_reconnects: default_max_reconnects(),
            origin: default_origin(),
        }
    }
}

type PendingMap = HashMap<u64, oneshot::Sender<Result<Value>>>;

/// An encoded request on its way to the connection task.
struct Outbound {
    id: u64,
    text: String,
}

/// State shared between the transport handle and its connection task.
struct Shared {
    ready: AtomicBool,
    closing: AtomicBool,
    shutdown: Notify,
    events: EventBus,
    pending: Mutex<PendingMap>,
}

impl Shared {
    fn new() -> Self {
        Self {
            ready: AtomicBool::new(false),
            closing: AtomicBool::new(false),
            shutdown: Notify::new(),
            events: EventBus::new(),
            pending: Mutex::new(HashMap::new()),
        }
    }

    fn pending(&self) -> MutexGuard<'_, PendingMap> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn resolve(&self, id: u64, result: Result<Value>) {
        if let Some(tx) = self.pending().remove(&id) {
            let _ = tx.send(result);
        }
    }

    fn fail_pending(&self) {
        let drained: Vec<_> = self.pending().drain().collect();
        for (id, tx) in drained {
            debug!(id = id, "Failing pending request on disconnect");
            let _ = tx.send(Err(ClientError::ConnectionClosed));
        }
    }

    fn handle_text(&self, text: String) {
        let response = RpcResponse::parse(&text);
        self.events.emit(TransportEvent::Message(text));
        if let Some(response) = response {
            self.resolve(response.id, response.result);
        }
    }
}

/// Removes a pending entry if the caller stops waiting.
struct PendingGuard<'a> {
    shared: &'a Shared,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.shared.pending().remove(&self.id);
    }
}

/// JSON-RPC 2.0 client over a persistent WebSocket.
pub struct WsTransport {
    url: String,
    config: WsClientConfig,
    shared: Arc<Shared>,
    next_id: AtomicU64,
    commands: mpsc::UnboundedSender<Outbound>,
    startup: Mutex<Option<mpsc::UnboundedReceiver<Outbound>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl WsTransport {
    /// Create a transport for `url`.
    ///
    /// With `autoconnect` (the default) the connection task starts
    /// immediately, so this must be called inside a tokio runtime.
    pub fn new(url: impl Into<String>, config: WsClientConfig) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let transport = Self {
            url: url.into(),
            config,
            shared: Arc::new(Shared::new()),
            next_id: AtomicU64::new(1),
            commands,
            startup: Mutex::new(Some(rx)),
            task: Mutex::new(None),
        };

        if transport.config.autoconnect {
            transport.connect();
        }
        transport
    }

    /// Start the connection task. No-op if it was already started.
    pub fn connect(&self) {
        let Some(commands) = self
            .startup
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
        else {
            return;
        };

        let handle = tokio::spawn(connection_loop(
            self.url.clone(),
            self.config.clone(),
            Arc::clone(&self.shared),
            commands,
        ));
        *self
            .task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(handle);
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl RpcTransport for WsTransport {
    fn is_ready(&self) -> bool {
        self.shared.ready.load(Ordering::SeqCst)
    }

    fn events(&self) -> &EventBus {
        &self.shared.events
    }

    fn start(&self) {
        self.connect();
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        if !self.is_ready() {
            return Err(ClientError::NotReady);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let text = RpcRequest::new(id, method, &params).encode()?;

        let (tx, rx) = oneshot::channel();
        self.shared.pending().insert(id, tx);
        let _guard = PendingGuard {
            shared: &self.shared,
            id,
        };

        debug!(id = id, method = %method, "Sending request");
        self.commands
            .send(Outbound { id, text })
            .map_err(|_| ClientError::ConnectionClosed)?;

        rx.await.map_err(|_| ClientError::ConnectionClosed)?
    }

    async fn close(&self) -> Result<()> {
        self.shared.closing.store(true, Ordering::SeqCst);
        self.shared.shutdown.notify_one();

        let handle = self
            .task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            handle
                .await
                .map_err(|e| ClientError::Transport(format!("Connection task failed: {}", e)))?;
        }
        Ok(())
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        if let Some(handle) = self
            .task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
        {
            handle.abort();
        }
    }
}

/// Why a connected socket stopped pumping.
#[derive(Debug, PartialEq, Eq)]
enum Exit {
    /// `close()` was called
    Shutdown,
    /// The socket dropped on its own
    Disconnected,
}

async fn connection_loop(
    url: String,
    config: WsClientConfig,
    shared: Arc<Shared>,
    mut commands: mpsc::UnboundedReceiver<Outbound>,
) {
    let mut failures = 0u32;

    'reconnect: loop {
        if shared.closing.load(Ordering::SeqCst) {
            break;
        }

        debug!(url = %url, "Connecting to WebSocket");
        let attempt = tokio::select! {
            res = open_socket(&url, &config.origin) => res,
            _ = shared.shutdown.notified() => break,
        };

        match attempt {
            Ok(ws) => {
                failures = 0;
                let (mut sink, mut stream) = ws.split();

                shared.ready.store(true, Ordering::SeqCst);
                debug!(url = %url, "WebSocket connected");
                shared.events.emit(TransportEvent::Opened);

                let exit = loop {
                    tokio::select! {
                        _ = shared.shutdown.notified() => {
                            let _ = sink.send(Message::Close(None)).await;
                            let _ = sink.close().await;
                            break Exit::Shutdown;
                        }
                        cmd = commands.recv() => match cmd {
                            Some(Outbound { id, text }) => {
                                if let Err(e) = sink.send(Message::Text(text)).await {
                                    warn!(id = id, error = %e, "Failed to send request");
                                    shared.resolve(
                                        id,
                                        Err(ClientError::Transport(format!("Failed to send: {}", e))),
                                    );
                                    break Exit::Disconnected;
                                }
                            }
                            // Every sender is gone: the transport was dropped
                            None => break Exit::Shutdown,
                        },
                        msg = stream.next() => match msg {
                            Some(Ok(Message::Text(text))) => shared.handle_text(text),
                            Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                                Ok(text) => shared.handle_text(text),
                                Err(_) => debug!("Ignoring non-UTF-8 binary frame"),
                            },
                            Some(Ok(Message::Close(frame))) => {
                                info!(frame = ?frame, "Conductor closed connection");
                                break Exit::Disconnected;
                            }
                            // Pong is handled automatically by tungstenite
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                error!(error = %e, "WebSocket error");
                                shared.events.emit(TransportEvent::Error(e.to_string()));
                                break Exit::Disconnected;
                            }
                            None => break Exit::Disconnected,
                        },
                    }
                };

                shared.ready.store(false, Ordering::SeqCst);
                shared.fail_pending();
                shared.events.emit(TransportEvent::Closed);

                if exit == Exit::Shutdown {
                    break;
                }
            }
            Err(e) => {
                failures += 1;
                warn!(url = %url, error = %e, attempt = failures, "WebSocket connect failed");
                shared.events.emit(TransportEvent::Error(e.to_string()));
            }
        }

        if !config.reconnect || shared.closing.load(Ordering::SeqCst) {
            break;
        }
        if config.max_reconnects > 0 && failures >= config.max_reconnects {
            error!(
                url = %url,
                attempts = failures,
                "Max reconnection attempts exceeded, giving up"
            );
            break;
        }

        let delay = tokio::time::sleep(Duration::from_millis(config.reconnect_interval_ms));
        tokio::pin!(delay);
        loop {
            tokio::select! {
                _ = &mut delay => break,
                _ = shared.shutdown.notified() => break 'reconnect,
                cmd = commands.recv() => match cmd {
                    Some(Outbound { id, .. }) => shared.resolve(id, Err(ClientError::NotReady)),
                    None => break 'reconnect,
                },
            }
        }
    }

    finish(&shared, &mut commands);
    debug!(url = %url, "Connection task ended");
}

/// Answer every request still queued or pending once the task stops.
///
/// A caller can pass the readiness check just before the socket drops and
/// enqueue after the last `fail_pending`. Closing the channel first means any
/// later send fails at the caller, and anything already queued is drained here.
fn finish(shared: &Shared, commands: &mut mpsc::UnboundedReceiver<Outbound>) {
    shared.ready.store(false, Ordering::SeqCst);
    commands.close();
    while let Ok(Outbound { id, .. }) = commands.try_recv() {
        shared.resolve(id, Err(ClientError::ConnectionClosed));
    }
    shared.fail_pending();
}

type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

async fn open_socket(url: &str, origin: &str) -> Result<Socket> {
    let mut request = url
        .into_client_request()
        .map_err(|e| ClientError::Connection(format!("Invalid WebSocket URL {}: {}", url, e)))?;
    let origin = HeaderValue::from_str(origin)
        .map_err(|e| ClientError::Config(format!("Invalid origin header: {}", e)))?;
    request.headers_mut().insert("Origin", origin);

    let (ws, _) = connect_async(request)
        .await
        .map_err(|e| ClientError::Connection(format!("WebSocket connect failed: {}", e)))?;
    Ok(ws)
}
