//! Per-connection read loop.
//!
//! The same loop serves local clients and uplinks: control frames are
//! answered, data frames are decoded into notifications and fanned out to
//! the local registry.

use std::sync::Arc;

use bytes::Bytes;
use tagrelay_core::{Attributes, decode_notification};
use tracing::{debug, info, instrument, warn};

use crate::fanout::FanOut;
use crate::metrics::NOTIFICATIONS_RECEIVED_TOTAL;
use crate::registry::Connection;
use crate::server::RelayState;
use crate::transport::{Frame, Transport, TransportError};

/// Why a read loop stopped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEnd {
    /// The peer sent a close frame, or the transport was closed.
    Closed,
    /// The transport failed.
    TransportError(String),
    /// A data frame could not be decoded into a notification.
    Rejected(String),
    /// A frame of unknown type arrived.
    UnknownFrame,
}

/// Read frames from `connection` until it ends, fanning data frames out
/// through `fanout`.
///
/// Fan-out errors are logged and do not end the loop.
pub async fn pump_frames(connection: &Connection, fanout: &FanOut, source: &'static str) -> SessionEnd {
    let transport = connection.transport();
    loop {
        let frame = match transport.read_frame().await {
            Ok(frame) => frame,
            Err(TransportError::Closed) => return SessionEnd::Closed,
            Err(e) => return SessionEnd::TransportError(e.to_string()),
        };

        let data = match frame {
            Frame::Close => return SessionEnd::Closed,
            Frame::Unknown => return SessionEnd::UnknownFrame,
            Frame::Pong(_) => continue,
            Frame::Ping(data) => {
                match transport.write_frame(Frame::Pong(data)).await {
                    Ok(()) => {}
                    Err(e) if e.is_retryable() => {
                        debug!(conn_id = connection.id(), "pong skipped, writer busy");
                    }
                    Err(e) => return SessionEnd::TransportError(e.to_string()),
                }
                continue;
            }
            Frame::Text(text) => Bytes::from(text),
            Frame::Binary(data) => data,
        };

        let notification = match decode_notification(data) {
            Ok(notification) => notification,
            Err(e) => return SessionEnd::Rejected(e.to_string()),
        };
        metrics::counter!(NOTIFICATIONS_RECEIVED_TOTAL, "source" => source).increment(1);
        debug!(conn_id = connection.id(), target = %notification.target, synchronous = notification.synchronous, "notification received");

        if let Err(e) = fanout.deliver(notification).await {
            warn!(conn_id = connection.id(), error = %e, "fan-out failed");
        }
    }
}

/// Serve one accepted local client until it disconnects.
///
/// Registers the connection, asks the uplink manager (edge only) to make
/// sure an uplink exists for these attributes, runs the read loop, then
/// unregisters and closes.
#[instrument(skip_all, fields(conn_id, attributes = %attributes))]
pub async fn serve_local(state: RelayState, attributes: Attributes, transport: Arc<dyn Transport>) {
    let (connection, id) = state.incoming.append(attributes.clone(), transport);
    let _ = tracing::Span::current().record("conn_id", id);
    info!("client connected");

    if let Some(uplink) = &state.uplink {
        drop(uplink.spawn_ensure(attributes));
    }

    let end = pump_frames(&connection, &state.fanout, "client").await;

    let _ = state.incoming.remove_id(id);
    if let Err(e) = connection.close().await {
        debug!(error = %e, "close after session end");
    }
    let age_secs = connection.age().as_secs();
    match &end {
        SessionEnd::Closed => info!(age_secs, "client disconnected"),
        other => warn!(age_secs, reason = ?other, "client session ended"),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::fanout::DeliveryConfig;
    use crate::registry::ConnectionRegistry;
    use crate::transport::{MemoryPeer, MemoryTransport};

    fn attrs(pairs: &[(&str, &str)]) -> Attributes {
        pairs.iter().copied().collect()
    }

    fn setup() -> FanOut {
        FanOut::new(
            Arc::new(ConnectionRegistry::new("incoming")),
            DeliveryConfig::default(),
        )
    }

    fn register(fanout: &FanOut, pairs: &[(&str, &str)]) -> (Arc<Connection>, MemoryPeer) {
        let (transport, peer) = MemoryTransport::pair();
        let (conn, _) = fanout.registry().append(attrs(pairs), Arc::new(transport));
        (conn, peer)
    }

    fn envelope(target: &serde_json::Value, synchronous: bool) -> String {
        json!({"target": target, "notification": {"kind": "scan"}, "sendSynchronicity": synchronous})
            .to_string()
    }

    #[tokio::test]
    async fn close_frame_ends_session() {
        let fanout = setup();
        let (conn, peer) = register(&fanout, &[("customer", "acme")]);
        assert!(peer.send(Frame::Close));
        assert_eq!(pump_frames(&conn, &fanout, "client").await, SessionEnd::Closed);
    }

    #[tokio::test]
    async fn ping_is_answered_with_pong() {
        let fanout = setup();
        let (conn, mut peer) = register(&fanout, &[("customer", "acme")]);
        assert!(peer.send(Frame::Ping(Bytes::from_static(b"hb"))));
        assert!(peer.send(Frame::Pong(Bytes::new())));
        assert!(peer.send(Frame::Close));
        assert_eq!(pump_frames(&conn, &fanout, "client").await, SessionEnd::Closed);
        assert_eq!(peer.recv().await, Some(Frame::Pong(Bytes::from_static(b"hb"))));
    }

    #[tokio::test]
    async fn unknown_frame_ends_session() {
        let fanout = setup();
        let (conn, peer) = register(&fanout, &[("customer", "acme")]);
        assert!(peer.send(Frame::Unknown));
        assert_eq!(
            pump_frames(&conn, &fanout, "client").await,
            SessionEnd::UnknownFrame
        );
    }

    #[tokio::test]
    async fn undecodable_message_rejected() {
        let fanout = setup();
        let (conn, peer) = register(&fanout, &[("customer", "acme")]);
        assert!(peer.send(Frame::Text("not an envelope".into())));
        assert!(matches!(
            pump_frames(&conn, &fanout, "client").await,
            SessionEnd::Rejected(_)
        ));
    }

    #[tokio::test]
    async fn empty_target_rejected() {
        let fanout = setup();
        let (conn, peer) = register(&fanout, &[("customer", "acme")]);
        assert!(peer.send(Frame::Text(envelope(&json!({}), true))));
        assert_eq!(
            pump_frames(&conn, &fanout, "client").await,
            SessionEnd::Rejected("notification target is empty".into())
        );
    }

    #[tokio::test]
    async fn text_notification_fans_out_verbatim() {
        let fanout = setup();
        let (sender, sender_peer) = register(&fanout, &[("role", "publisher")]);
        let (_, mut listener) = register(&fanout, &[("customer", "acme")]);

        let message = envelope(&json!({"customer": "acme"}), true);
        assert!(sender_peer.send(Frame::Text(message.clone())));
        assert!(sender_peer.send(Frame::Close));
        assert_eq!(pump_frames(&sender, &fanout, "client").await, SessionEnd::Closed);

        assert_eq!(
            listener.recv().await,
            Some(Frame::Binary(Bytes::from(message)))
        );
    }

    #[tokio::test]
    async fn bson_notification_fans_out() {
        let fanout = setup();
        let (sender, sender_peer) = register(&fanout, &[("role", "publisher")]);
        let (_, mut listener) = register(&fanout, &[("customer", "acme")]);

        let doc = bson::doc! {"target": {"customer": "acme"}, "sendSynchronicity": true};
        let raw = Bytes::from(bson::to_vec(&doc).unwrap());
        assert!(sender_peer.send(Frame::Binary(raw.clone())));
        assert!(sender_peer.send(Frame::Close));
        assert_eq!(pump_frames(&sender, &fanout, "client").await, SessionEnd::Closed);

        assert_eq!(listener.recv().await, Some(Frame::Binary(raw)));
    }

    #[tokio::test]
    async fn fan_out_failure_keeps_session_alive() {
        let fanout = setup();
        let (sender, sender_peer) = register(&fanout, &[("role", "publisher")]);
        let (broken, broken_peer) = MemoryTransport::pair();
        broken.fail_writes(true);
        let _ = fanout
            .registry()
            .append(attrs(&[("customer", "acme")]), Arc::new(broken));

        assert!(sender_peer.send(Frame::Text(envelope(&json!({"customer": "acme"}), true))));
        assert!(sender_peer.send(Frame::Ping(Bytes::new())));
        assert!(sender_peer.send(Frame::Close));

        assert_eq!(pump_frames(&sender, &fanout, "client").await, SessionEnd::Closed);
        assert!(broken_peer.is_closed());
        // Only the sender remains registered.
        assert_eq!(fanout.registry().len(), 1);
    }

    #[tokio::test]
    async fn closing_transport_ends_pending_read() {
        let fanout = setup();
        let (conn, _peer) = register(&fanout, &[("customer", "acme")]);
        let pump = {
            let conn = conn.clone();
            let fanout = fanout.clone();
            tokio::spawn(async move { pump_frames(&conn, &fanout, "client").await })
        };
        tokio::task::yield_now().await;
        conn.close().await.unwrap();
        assert_eq!(pump.await.unwrap(), SessionEnd::Closed);
    }
}
