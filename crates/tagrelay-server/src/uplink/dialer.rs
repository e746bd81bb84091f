//! Dialing the root's streaming endpoint.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tagrelay_core::Attributes;
use url::Url;

use crate::transport::tungstenite_ws;
use crate::transport::{Transport, TransportError};

/// Opens uplink transports.
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Connect to `url`.
    async fn dial(&self, url: &Url) -> Result<Arc<dyn Transport>, TransportError>;
}

/// Dials real websockets with `tokio-tungstenite`.
pub struct WsDialer {
    write_lock_timeout: Duration,
}

impl WsDialer {
    /// Create a dialer whose transports use `write_lock_timeout`.
    pub fn new(write_lock_timeout: Duration) -> Self {
        Self { write_lock_timeout }
    }
}

#[async_trait]
impl Dialer for WsDialer {
    async fn dial(&self, url: &Url) -> Result<Arc<dyn Transport>, TransportError> {
        let (stream, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))?;
        Ok(Arc::new(tungstenite_ws::from_stream(
            stream,
            self.write_lock_timeout,
        )))
    }
}

/// The parent URL with `signature` appended as url-encoded query pairs.
pub fn build_dial_url(parent: &Url, signature: &Attributes) -> Url {
    let mut url = parent.clone();
    if !signature.is_empty() {
        let mut query = url.query_pairs_mut();
        for (key, value) in signature.iter() {
            let _ = query.append_pair(key, value);
        }
    }
    url
}
