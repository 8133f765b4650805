//! Error types for conductor-client

use serde_json::Value;
use thiserror::Error;

/// Fixed message surfaced when the conductor interface cannot be discovered.
pub const DISCOVERY_FAILED_MESSAGE: &str = "Could not auto-detect DNA interface from conductor. \
Ensure the web UI is hosted by a Holochain Conductor or manually specify url as parameter to connect";

/// Fallback message when the transport reports an error without details.
pub const CONNECTION_FAILED_MESSAGE: &str =
    "Could not establish websocket connection with requested url";

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("{}", DISCOVERY_FAILED_MESSAGE)]
    Discovery,

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Timeout while waiting for ws to connect. method: {method}, payload: {payload}")]
    ConnectTimeout { method: String, payload: String },

    #[error("Timeout occurred during ws call. method: {method}, payload: {payload}")]
    ResponseTimeout { method: String, payload: String },

    #[error("RPC error {code}: {message}")]
    Rpc {
        code: i64,
        message: String,
        data: Option<Value>,
    },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Socket not ready")]
    NotReady,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Invalid method: {0}")]
    InvalidMethod(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ClientError {
    /// True for either of the two coordinator timeouts.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            ClientError::ConnectTimeout { .. } | ClientError::ResponseTimeout { .. }
        )
    }
}

/// Result type for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_messages_are_distinct() {
        let connect = ClientError::ConnectTimeout {
            method: "info/instances".into(),
            payload: "{}".into(),
        };
        let response = ClientError::ResponseTimeout {
            method: "info/instances".into(),
            payload: "{}".into(),
        };

        assert!(connect.to_string().contains("waiting for ws to connect"));
        assert!(response.to_string().contains("during ws call"));
        assert!(connect.to_string().contains("info/instances"));
        assert!(connect.is_timeout() && response.is_timeout());
        assert!(!ClientError::NotReady.is_timeout());
    }

    #[test]
    fn test_discovery_message() {
        assert!(ClientError::Discovery
            .to_string()
            .starts_with("Could not auto-detect DNA interface"));
    }
}
