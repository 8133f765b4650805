//! Transport Adapter
//!
//! The coordinator only needs four things from a transport: whether it is
//! ready, a raw one-shot call, its event bus, and a way to close it. Anything
//! implementing `RpcTransport` can sit underneath a `Connection`.
//!
//! | Module | Responsibility                                   |
//! |--------|--------------------------------------------------|
//! | `ws`   | JSON-RPC 2.0 over a persistent WebSocket         |
//! | `rpc`  | JSON-RPC 2.0 request/response framing            |

mod rpc;
mod ws;

pub use ws::{WsClientConfig, WsTransport};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::events::EventBus;

/// A persistent RPC connection to a conductor interface.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    /// Whether calls can be issued right now.
    fn is_ready(&self) -> bool;

    /// Lifecycle (`Opened`, `Closed`, `Error`) and raw `Message` events.
    fn events(&self) -> &EventBus;

    /// Begin connecting if the transport is not already doing so.
    fn start(&self) {}

    /// Issue one call and wait for its response.
    ///
    /// No timeout is applied here; that is the coordinator's job.
    async fn call(&self, method: &str, params: Value) -> Result<Value>;

    /// Close the connection and stop any reconnection.
    async fn close(&self) -> Result<()>;
}
