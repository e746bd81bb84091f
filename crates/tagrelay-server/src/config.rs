//! Server configuration, resolved from [`RelaySettings`].

use std::time::Duration;

use tagrelay_settings::RelaySettings;
use thiserror::Error;
use url::Url;

use crate::fanout::DeliveryConfig;
use crate::uplink::UplinkConfig;

/// Configuration errors that settings validation cannot catch.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The parent URL does not parse.
    #[error("invalid parent url {url:?}: {source}")]
    InvalidParentUrl {
        /// The configured value.
        url: String,
        /// Parser failure.
        #[source]
        source: url::ParseError,
    },
    /// The parent URL is not a websocket (or http) URL.
    #[error("unsupported parent url scheme {0:?}, expected ws, wss, http or https")]
    UnsupportedScheme(String),
}

/// Configuration for the relay server.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind both listeners to.
    pub host: String,
    /// Port of the streaming endpoint (`0` for auto-assign).
    pub websocket_port: u16,
    /// Port of the post endpoint (`0` for auto-assign).
    pub rest_port: u16,
    /// Max inbound websocket message size in bytes.
    pub max_message_size: usize,
    /// How long a writer waits for a connection's write lock.
    pub write_lock_timeout: Duration,
    /// Per-recipient delivery retries.
    pub delivery: DeliveryConfig,
    /// Uplink to the root; `None` on the root itself.
    pub uplink: Option<UplinkConfig>,
}

impl ServerConfig {
    /// Resolve settings into a server configuration.
    pub fn from_settings(settings: &RelaySettings) -> Result<Self, ConfigError> {
        let uplink = match settings.uplink.parent_url.as_deref() {
            Some(raw) if !settings.uplink.is_root() => {
                let parent_url = parse_parent_url(raw)?;
                Some(UplinkConfig::from_settings(parent_url, &settings.uplink))
            }
            _ => None,
        };
        Ok(Self {
            host: settings.server.host.clone(),
            websocket_port: settings.server.websocket_port,
            rest_port: settings.server.rest_port,
            max_message_size: settings.server.max_message_size,
            write_lock_timeout: Duration::from_millis(settings.delivery.write_lock_timeout_ms),
            delivery: DeliveryConfig::from(&settings.delivery),
            uplink,
        })
    }

    /// Whether this instance is the root of the relay tree.
    pub fn is_root(&self) -> bool {
        self.uplink.is_none()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        let settings = RelaySettings::default();
        Self {
            host: settings.server.host,
            websocket_port: settings.server.websocket_port,
            rest_port: settings.server.rest_port,
            max_message_size: settings.server.max_message_size,
            write_lock_timeout: Duration::from_millis(settings.delivery.write_lock_timeout_ms),
            delivery: DeliveryConfig::from(&settings.delivery),
            uplink: None,
        }
    }
}

/// Parse the root's streaming URL, mapping `http(s)` to `ws(s)`.
pub fn parse_parent_url(raw: &str) -> Result<Url, ConfigError> {
    let mut url = Url::parse(raw.trim()).map_err(|source| ConfigError::InvalidParentUrl {
        url: raw.to_string(),
        source,
    })?;
    let scheme = match url.scheme() {
        "ws" | "http" => "ws",
        "wss" | "https" => "wss",
        other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
    };
    if url.scheme() != scheme && url.set_scheme(scheme).is_err() {
        return Err(ConfigError::UnsupportedScheme(url.scheme().to_string()));
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_mirror_settings() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.websocket_port, 8001);
        assert_eq!(cfg.rest_port, 8002);
        assert_eq!(cfg.write_lock_timeout, Duration::from_secs(2));
        assert_eq!(cfg.delivery.write_retries, 2);
        assert!(cfg.is_root());
    }

    #[test]
    fn parent_url_makes_edge() {
        let mut settings = RelaySettings::default();
        settings.uplink.parent_url = Some("ws://root:8001/v1/waitfornotification".into());
        let cfg = ServerConfig::from_settings(&settings).unwrap();
        assert!(!cfg.is_root());
        let uplink = cfg.uplink.unwrap();
        assert_eq!(uplink.parent_url.host_str(), Some("root"));
        assert_eq!(uplink.root_attributes, vec!["customer".to_string()]);
        assert_eq!(uplink.ping_interval, Duration::from_secs(10));
        assert_eq!(uplink.reconnect_backoff, Duration::from_secs(1));
    }

    #[test]
    fn blank_parent_url_is_root() {
        let mut settings = RelaySettings::default();
        settings.uplink.parent_url = Some("  ".into());
        assert!(ServerConfig::from_settings(&settings).unwrap().is_root());
    }

    #[test]
    fn invalid_parent_url_is_error() {
        let mut settings = RelaySettings::default();
        settings.uplink.parent_url = Some("not a url".into());
        let err = ServerConfig::from_settings(&settings).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidParentUrl { .. }));
    }

    #[test]
    fn http_scheme_mapped_to_ws() {
        assert_eq!(
            parse_parent_url("http://root:8001/v1/waitfornotification")
                .unwrap()
                .scheme(),
            "ws"
        );
        assert_eq!(parse_parent_url("https://root/x").unwrap().scheme(), "wss");
        assert_eq!(parse_parent_url("ws://root/x").unwrap().scheme(), "ws");
    }

    #[test]
    fn other_schemes_rejected() {
        let err = parse_parent_url("ftp://root/x").unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedScheme(s) if s == "ftp"));
    }
}
