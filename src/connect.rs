//! Connection bootstrap
//!
//! `connect` only returns once the transport has opened at least once.
//! There is no handle that isn't ready yet; if you have a `Connection`, the
//! socket has been up.

use std::sync::Arc;

use tracing::info;

use crate::client::Connection;
use crate::config::{ConnectOpts, TimeoutPolicy};
use crate::discovery::discover_url;
use crate::error::{ClientError, Result, CONNECTION_FAILED_MESSAGE};
use crate::events::{EventKind, TransportEvent};
use crate::gate::CompletionGate;
use crate::transport::{RpcTransport, WsClientConfig, WsTransport};

/// Connect to a conductor interface over WebSocket.
///
/// Uses `opts.url` when set, otherwise discovers the interface from
/// `opts.discovery_base_url`.
///
/// # Errors
/// - `Discovery` if no URL was given and discovery failed
/// - `Connection` if the transport reports an error before first opening
pub async fn connect(opts: ConnectOpts) -> Result<Connection> {
    let url = match opts.url {
        Some(ref url) => url.clone(),
        None => discover_url(&opts.discovery_base_url).await?,
    };

    info!(url = %url, timeout_ms = opts.timeout_ms, "Connecting to conductor");
    // Started by connect_transport once its listeners are registered
    let ws_config = WsClientConfig {
        autoconnect: false,
        ..opts.ws_client.clone()
    };
    let transport = Arc::new(WsTransport::new(url, ws_config));
    connect_transport(transport, opts.timeout_policy()).await
}

/// Wait for `transport` to open and wrap it in a `Connection`.
///
/// Works with any `RpcTransport`. Lifecycle events are logged for the whole
/// life of the transport; the first `Error` before opening fails the
/// connection. The transport is started after the listeners are in place.
pub async fn connect_transport(
    transport: Arc<dyn RpcTransport>,
    timeout: TimeoutPolicy,
) -> Result<Connection> {
    let events = transport.events();
    events.on(EventKind::Opened, |_| info!("WS open"));
    events.on(EventKind::Closed, |_| info!("WS closed"));

    let (gate, rx) = CompletionGate::channel();

    let failed = gate.clone();
    let error_listener = events.on(EventKind::Error, move |event| {
        let detail = match event {
            TransportEvent::Error(detail) if !detail.is_empty() => detail.clone(),
            _ => CONNECTION_FAILED_MESSAGE.to_string(),
        };
        failed.complete(Err(ClientError::Connection(detail)));
    });

    let opened = gate.clone();
    let handle = Arc::clone(&transport);
    let open_listener = events.once(EventKind::Opened, move |_| {
        opened.complete(Ok(Connection::new(handle, timeout)));
    });

    if transport.is_ready() && events.off(open_listener) {
        gate.complete(Ok(Connection::new(Arc::clone(&transport), timeout)));
    } else {
        transport.start();
    }

    let result = rx.await.unwrap_or(Err(ClientError::ConnectionClosed));
    events.off(error_listener);
    events.off(open_listener);
    result
}
