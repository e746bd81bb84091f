//! `/health` endpoint.

use std::time::Instant;

use serde::Serialize;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// `"root"` or `"edge"`.
    pub role: String,
    /// Local client connections.
    pub incoming_connections: usize,
    /// Uplinks to the root.
    pub outgoing_connections: usize,
}

/// Build a health response from live counters.
pub fn health_check(
    start_time: Instant,
    is_root: bool,
    incoming: usize,
    outgoing: usize,
) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        uptime_secs: start_time.elapsed().as_secs(),
        role: if is_root { "root" } else { "edge" }.into(),
        incoming_connections: incoming,
        outgoing_connections: outgoing,
    }
}
