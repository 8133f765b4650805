//! JSON-RPC 2.0 Framing
//!
//! Single responsibility: encode outgoing requests and recognise responses
//! among inbound text frames.
//!
//! ## Request
//! ```text
//! { "jsonrpc": "2.0", "method": "call", "params": { ... }, "id": 7 }
//! ```
//!
//! ## Response
//! ```text
//! { "jsonrpc": "2.0", "id": 7, "result": ... }
//! { "jsonrpc": "2.0", "id": 7, "error": { "code": -32601, "message": "...", "data": ... } }
//! ```
//!
//! Frames without an `id` (signals, notifications) are not responses.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ClientError;

#[derive(Debug, Clone, Serialize)]
pub(crate) struct RpcRequest<'a> {
    pub jsonrpc: &'static str,
    pub method: &'a str,
    pub params: &'a Value,
    pub id: u64,
}

impl<'a> RpcRequest<'a> {
    pub(crate) fn new(id: u64, method: &'a str, params: &'a Value) -> Self {
        Self {
            jsonrpc: "2.0",
            method,
            params,
            id,
        }
    }

    pub(crate) fn encode(&self) -> Result<String, ClientError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

/// A decoded response, correlated by id.
#[derive(Debug)]
pub(crate) struct RpcResponse {
    pub id: u64,
    pub result: Result<Value, ClientError>,
}

impl RpcResponse {
    /// Try to read a text frame as a response.
    ///
    /// Returns None for anything that is not a response to one of our
    /// requests: invalid JSON, frames without a numeric `id`, or frames
    /// carrying neither `result` nor `error`.
    pub(crate) fn parse(text: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(text).ok()?;
        let frame = value.as_object()?;
        let id = frame.get("id")?.as_u64()?;

        let result = if let Some(error) = frame.get("error").filter(|e| !e.is_null()) {
            Err(match serde_json::from_value::<RpcErrorObject>(error.clone()) {
                Ok(err) => ClientError::Rpc {
                    code: err.code,
                    message: err.message,
                    data: err.data,
                },
                Err(_) => ClientError::Transport(error.to_string()),
            })
        } else {
            Ok(frame.get("result")?.clone())
        };

        Some(Self { id, result })
    }
}
