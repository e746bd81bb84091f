//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Call once at startup before any metrics are recorded.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants to avoid typos across modules.

/// Connections registered total (counter, labels: registry).
pub const CONNECTIONS_OPENED_TOTAL: &str = "relay_connections_opened_total";
/// Connections removed total (counter, labels: registry).
pub const CONNECTIONS_CLOSED_TOTAL: &str = "relay_connections_closed_total";
/// Live connections (gauge, labels: registry).
pub const CONNECTIONS_ACTIVE: &str = "relay_connections_active";
/// Notifications decoded total (counter, labels: source).
pub const NOTIFICATIONS_RECEIVED_TOTAL: &str = "relay_notifications_received_total";
/// Successful per-recipient deliveries (counter).
pub const DELIVERIES_TOTAL: &str = "relay_deliveries_total";
/// Failed per-recipient deliveries (counter, labels: mode).
pub const DELIVERY_FAILURES_TOTAL: &str = "relay_delivery_failures_total";
/// Write lock conflicts that triggered a retry (counter).
pub const WRITE_CONFLICTS_TOTAL: &str = "relay_write_conflicts_total";
/// Uplink dial attempts (counter, labels: outcome).
pub const UPLINK_DIALS_TOTAL: &str = "relay_uplink_dials_total";
/// Uplink disconnects, including failed dials (counter).
pub const UPLINK_DISCONNECTS_TOTAL: &str = "relay_uplink_disconnects_total";
/// Uplinks given up after exhausting retries (counter).
pub const UPLINK_ISOLATIONS_TOTAL: &str = "relay_uplink_isolations_total";
