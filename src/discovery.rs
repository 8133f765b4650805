//! Conductor interface discovery
//!
//! A web UI served by a Holochain conductor can fetch
//! `/_dna_connections.json` from its host. The document names the port of
//! the DNA interface:
//!
//! ```text
//! { "dna_interface": { "driver": { "port": 3401, ... }, ... } }
//! ```

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{ClientError, Result};

/// Well-known path of the discovery document.
pub const CONDUCTOR_CONFIG_PATH: &str = "/_dna_connections.json";

/// Fetch the discovery document from `base_url` and build the interface URL.
///
/// # Errors
/// `ClientError::Discovery` on any failure: unreachable host, non-success
/// status, invalid JSON, or a missing/invalid port.
pub async fn discover_url(base_url: &str) -> Result<String> {
    let url = format!("{}{}", base_url.trim_end_matches('/'), CONDUCTOR_CONFIG_PATH);
    debug!(url = %url, "Fetching conductor interface config");

    let document = match fetch(&url).await {
        Ok(document) => document,
        Err(e) => {
            warn!(url = %url, error = %e, "Conductor interface discovery failed");
            return Err(ClientError::Discovery);
        }
    };

    let port = port_from_document(&document).ok_or_else(|| {
        warn!(url = %url, "Discovery document has no usable dna_interface.driver.port");
        ClientError::Discovery
    })?;

    Ok(url_for_port(port))
}

async fn fetch(url: &str) -> Result<Value> {
    let document = reqwest::get(url)
        .await?
        .error_for_status()?
        .json::<Value>()
        .await?;
    Ok(document)
}

/// Read `dna_interface.driver.port`, accepting a number or a numeric string.
pub fn port_from_document(document: &Value) -> Option<u16> {
    let port = document.pointer("/dna_interface/driver/port")?;
    match port {
        Value::Number(n) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Default local interface URL for a discovered port.
pub fn url_for_port(port: u16) -> String {
    format!("ws://localhost:{}", port)
}
