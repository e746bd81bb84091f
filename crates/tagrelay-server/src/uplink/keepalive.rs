//! Uplink keepalive pings.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::registry::Connection;
use crate::transport::Frame;

/// Outcome of the keepalive loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeepaliveResult {
    /// A ping could not be written; the uplink was closed.
    Failed(String),
    /// The keepalive was cancelled externally.
    Cancelled,
}

/// Ping `connection` every `interval` until cancelled or a ping fails.
///
/// A ping that loses the race for the write lock is skipped. Any other
/// write failure closes the connection, which ends its read loop.
pub async fn run_keepalive(
    connection: Arc<Connection>,
    interval: Duration,
    cancel: CancellationToken,
) -> KeepaliveResult {
    let mut ticker = time::interval(interval);
    // The first tick completes immediately.
    let _ = ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match connection.transport().write_frame(Frame::Ping(Bytes::new())).await {
                    Ok(()) => {}
                    Err(e) if e.is_retryable() => {
                        debug!(conn_id = connection.id(), "ping skipped, writer busy");
                    }
                    Err(e) => {
                        if let Err(close_err) = connection.close().await {
                            debug!(conn_id = connection.id(), error = %close_err, "close after failed ping");
                        }
                        return KeepaliveResult::Failed(e.to_string());
                    }
                }
            }
            () = cancel.cancelled() => {
                return KeepaliveResult::Cancelled;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ConnectionRegistry;
    use crate::transport::{MemoryPeer, MemoryTransport};

    fn make_connection() -> (Arc<Connection>, Arc<MemoryTransport>, MemoryPeer) {
        let registry = ConnectionRegistry::new("outgoing");
        let (transport, peer) = MemoryTransport::pair();
        let transport = Arc::new(transport);
        let (conn, _) = registry.append(
            [("customer", "acme")].into_iter().collect(),
            transport.clone(),
        );
        (conn, transport, peer)
    }

    #[tokio::test]
    async fn keepalive_cancelled() {
        let (conn, _t, _peer) = make_connection();
        let cancel = CancellationToken::new();
        let cancel2 = cancel.clone();

        let handle = tokio::spawn(async move {
            run_keepalive(conn, Duration::from_secs(100), cancel2).await
        });

        cancel.cancel();
        assert_eq!(handle.await.unwrap(), KeepaliveResult::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn pings_every_interval() {
        let (conn, _t, mut peer) = make_connection();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_keepalive(conn, Duration::from_secs(10), cancel.clone()));

        time::sleep(Duration::from_secs(5)).await;
        assert!(peer.try_recv().is_none());

        time::sleep(Duration::from_secs(21)).await;
        assert_eq!(peer.recv().await, Some(Frame::Ping(Bytes::new())));
        assert_eq!(peer.recv().await, Some(Frame::Ping(Bytes::new())));

        cancel.cancel();
        assert_eq!(handle.await.unwrap(), KeepaliveResult::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_ping_closes_connection() {
        let (conn, transport, peer) = make_connection();
        transport.fail_writes(true);

        let result = run_keepalive(conn, Duration::from_secs(10), CancellationToken::new()).await;

        assert!(matches!(result, KeepaliveResult::Failed(_)));
        assert!(peer.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn write_conflict_skips_ping() {
        let (conn, transport, mut peer) = make_connection();
        transport.conflict_next_writes(1);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_keepalive(conn, Duration::from_secs(10), cancel.clone()));

        time::sleep(Duration::from_secs(25)).await;
        assert_eq!(peer.recv().await, Some(Frame::Ping(Bytes::new())));
        assert!(!peer.is_closed());

        cancel.cancel();
        assert_eq!(handle.await.unwrap(), KeepaliveResult::Cancelled);
    }
}
