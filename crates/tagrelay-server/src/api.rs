//! HTTP handlers for the streaming endpoint, the post endpoint, `/health`
//! and `/metrics`.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::ws::{WebSocketUpgrade, rejection::WebSocketUpgradeRejection};
use axum::extract::{Path, RawQuery, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tagrelay_core::{Attributes, DecodeError, decode_notification};
use thiserror::Error;
use tracing::debug;

use crate::fanout::FanOutError;
use crate::health::{self, HealthResponse};
use crate::metrics::NOTIFICATIONS_RECEIVED_TOTAL;
use crate::openapi;
use crate::registry::ConnectionId;
use crate::server::RelayState;
use crate::session;
use crate::transport::axum_ws;

/// Errors returned to HTTP callers. All map to `400 Bad Request`.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The streaming request carried no attributes.
    #[error("at least one attribute is required")]
    NoAttributes,
    /// The posted body is not a valid envelope.
    #[error(transparent)]
    Decode(#[from] DecodeError),
    /// Synchronous delivery failed for some recipients.
    #[error(transparent)]
    Delivery(#[from] FanOutError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        debug!(error = %self, "rejecting request");
        (StatusCode::BAD_REQUEST, self.to_string()).into_response()
    }
}

/// Attributes from a raw query string. Empty keys are skipped and the first
/// value of a repeated key wins.
pub fn query_attributes(query: Option<&str>) -> Attributes {
    let pairs = url::form_urlencoded::parse(query.unwrap_or_default().as_bytes());
    Attributes::from_query_pairs(pairs)
}

/// `GET /v1/waitfornotification?k=v&...` and `GET /waitfornotification?k=v&...`
pub async fn wait_for_notification(
    State(state): State<RelayState>,
    RawQuery(query): RawQuery,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let attributes = query_attributes(query.as_deref());
    accept(state, attributes, upgrade)
}

/// `GET /waitfornotification/{key}`: registers the single attribute `{key: ""}`.
pub async fn wait_for_notification_legacy(
    State(state): State<RelayState>,
    Path(key): Path<String>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let attributes = Attributes::from_query_pairs([(key, String::new())]);
    accept(state, attributes, upgrade)
}

fn accept(
    state: RelayState,
    attributes: Attributes,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if attributes.is_empty() {
        return ApiError::NoAttributes.into_response();
    }
    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => return rejection.into_response(),
    };
    let write_lock_timeout = state.config.write_lock_timeout;
    upgrade
        .max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| async move {
            let transport = Arc::new(axum_ws::from_socket(socket, write_lock_timeout));
            session::serve_local(state, attributes, transport).await;
        })
}

/// `POST /v1/sendnotification` and `POST /sendnotification`
pub async fn send_notification(
    State(state): State<RelayState>,
    body: Bytes,
) -> Result<Json<Vec<ConnectionId>>, ApiError> {
    let notification = decode_notification(body)?;
    metrics::counter!(NOTIFICATIONS_RECEIVED_TOTAL, "source" => "rest").increment(1);
    let ids = state.fanout.deliver(notification).await?;
    Ok(Json(ids))
}

/// `GET /health`
pub async fn health_handler(State(state): State<RelayState>) -> Json<HealthResponse> {
    let outgoing = state.uplink.as_ref().map_or(0, |u| u.uplink_count());
    Json(health::health_check(
        state.start_time,
        state.config.is_root(),
        state.incoming.len(),
        outgoing,
    ))
}

/// `GET /openapi/v2/swagger.json`
pub async fn openapi_handler() -> Json<serde_json::Value> {
    Json(openapi::document())
}

/// `GET /metrics`
pub async fn metrics_handler(State(state): State<RelayState>) -> Response {
    match &state.metrics {
        Some(handle) => crate::metrics::render(handle).into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}
