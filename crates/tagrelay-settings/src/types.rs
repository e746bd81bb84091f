//! Settings types.
//!
//! All structs use `#[serde(default)]` so a partial settings file only has
//! to name the values it changes.

use serde::{Deserialize, Serialize};
use tagrelay_core::logging::LogFormat;

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// Listener settings.
    pub server: ServerSettings,
    /// Edge → root uplink settings.
    pub uplink: UplinkSettings,
    /// Per-recipient delivery settings.
    pub delivery: DeliverySettings,
    /// Logging settings.
    pub logging: LoggingSettings,
}

/// Listener network settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address for both listeners.
    pub host: String,
    /// Port of the streaming (websocket) endpoint.
    pub websocket_port: u16,
    /// Port of the post endpoint, `/health` and `/metrics`.
    pub rest_port: u16,
    /// Max inbound websocket message size in bytes.
    pub max_message_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            websocket_port: 8001,
            rest_port: 8002,
            max_message_size: 16 * 1024 * 1024, // 16 MB
        }
    }
}

/// Uplink settings. Only meaningful on edge instances.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UplinkSettings {
    /// Streaming endpoint of the root instance. Absent on the root itself.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_url: Option<String>,
    /// Attribute keys the root routes on; uplink signatures keep only these.
    pub root_attributes: Vec<String>,
    /// Keepalive ping interval in seconds.
    pub ping_interval_secs: u64,
    /// Reconnect attempts after the first uplink is lost.
    pub max_retries: u32,
    /// Delay before each reconnect attempt in milliseconds (0 disables).
    pub reconnect_backoff_ms: u64,
}

impl UplinkSettings {
    /// Whether this instance is the root of the relay tree.
    pub fn is_root(&self) -> bool {
        self.parent_url
            .as_deref()
            .is_none_or(|url| url.trim().is_empty())
    }
}

impl Default for UplinkSettings {
    fn default() -> Self {
        Self {
            parent_url: None,
            root_attributes: vec!["customer".to_string()],
            ping_interval_secs: 10,
            max_retries: 2,
            reconnect_backoff_ms: 1_000,
        }
    }
}

/// Per-recipient delivery settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeliverySettings {
    /// Extra attempts after a write conflict.
    pub write_retries: u32,
    /// Upper bound of the random wait before a conflict retry, in milliseconds.
    pub max_jitter_ms: u64,
    /// How long a writer waits for a connection's write lock, in milliseconds.
    pub write_lock_timeout_ms: u64,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            write_retries: 2,
            max_jitter_ms: 120,
            write_lock_timeout_ms: 2_000,
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}
