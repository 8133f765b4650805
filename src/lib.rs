//! Conductor Client
//!
//! A WebSocket client for Holochain conductor interfaces. It keeps one
//! persistent JSON-RPC connection and exposes:
//!
//! - generic method calls (`call`)
//! - zome calls wrapped in the `call` envelope (`call_zome`)
//! - server-pushed signals (`on_signal`, `signals`)
//!
//! Calls issued while the socket is not yet open are queued until it opens.
//! Waiting for the socket and waiting for the response are each bounded by
//! the call's timeout.
//!
//! # Architecture
//!
//! | Module        | Responsibility                                       |
//! |---------------|------------------------------------------------------|
//! | `transport`   | WebSocket connect/send/receive, JSON-RPC framing     |
//! | `events`      | Lifecycle and message listeners (`on` / `once`)      |
//! | `gate`        | First-completion-wins slot for a pending call        |
//! | `timer`       | Connect/response timers with leak accounting         |
//! | `coordinator` | Readiness-gated, timeout-bounded calls               |
//! | `client`      | The `Connection` handle and call factories           |
//! | `connect`     | URL resolution and waiting for first readiness       |
//! | `discovery`   | `_dna_connections.json` lookup                       |
//!
//! # Usage
//!
//! ```rust,no_run
//! use conductor_client::{connect, ConnectOpts};
//! use serde_json::json;
//!
//! # async fn example() -> conductor_client::Result<()> {
//! let conn = connect(ConnectOpts::with_url("ws://localhost:3401")).await?;
//!
//! let instances = conn.call(["info", "instances"])?.timeout(None).call(json!({})).await?;
//!
//! let post = conn
//!     .call_zome("blog-instance", "blog", "create_post")
//!     .timeout(Some(10_000))
//!     .call(json!({"content": "hello"}))
//!     .await?;
//!
//! conn.on_signal(|signal| println!("signal: {}", signal));
//! conn.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod connect;
pub mod coordinator;
pub mod discovery;
pub mod error;
pub mod events;
pub mod gate;
pub mod timer;
pub mod transport;

pub use client::{parse_signal, CallFactory, Caller, Connection, ZomeCall, ZomeCallFactory};
pub use config::{ConnectOpts, TimeoutPolicy, DEFAULT_TIMEOUT_MS};
pub use connect::{connect, connect_transport};
pub use coordinator::call_when_connected;
pub use error::{ClientError, Result};
pub use events::{EventBus, EventKind, ListenerId, TransportEvent};
pub use timer::{TimerKind, TimerRegistry};
pub use transport::{RpcTransport, WsClientConfig, WsTransport};
