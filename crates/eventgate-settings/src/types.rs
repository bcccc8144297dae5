//! Settings types with compiled defaults.

use serde::{Deserialize, Serialize};

/// Root settings document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GateSettings {
    /// Listener and dispatch settings.
    pub server: ServerSettings,
    /// HTTP bridge settings.
    pub bridge: BridgeSettings,
    /// Diagnostic logging settings.
    pub log: LogSettings,
}

/// Listener and dispatch settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listener port (WebSocket endpoint and HTTP bridge share it).
    pub port: u16,
    /// Grace period after disconnect before a session is evicted, in ms.
    pub keep_alive_ms: u64,
    /// Interval between reaper sweeps, in ms.
    pub reap_interval_ms: u64,
    /// Publish a change event for every handled mutating request.
    pub publish_changes: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            keep_alive_ms: 6000,
            reap_interval_ms: 500,
            publish_changes: false,
        }
    }
}

/// HTTP bridge settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BridgeSettings {
    /// Serve the HTTP-to-event bridge routes.
    pub enabled: bool,
    /// Shared secret required in the `x-server-secret` header.
    pub secret: Option<String>,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            secret: None,
        }
    }
}

/// Diagnostic logging settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LogSettings {
    /// Default tracing filter directive, e.g. `info` or `eventgate=debug`.
    pub level: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
