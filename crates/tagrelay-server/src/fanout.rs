//! Notification fan-out to every connection matching a target query.
//!
//! One [`PreparedMessage`] is built per notification and shared by all
//! recipients. Each recipient is delivered independently: a write conflict
//! is retried after a short random wait, any other failure closes and
//! unregisters that recipient only.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rand::Rng;
use tagrelay_core::{Attributes, Notification};
use tagrelay_settings::DeliverySettings;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::metrics::{DELIVERIES_TOTAL, DELIVERY_FAILURES_TOTAL, WRITE_CONFLICTS_TOTAL};
use crate::registry::{Connection, ConnectionId, ConnectionRegistry};
use crate::transport::{PreparedMessage, TransportError};

/// Per-recipient retry policy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveryConfig {
    /// Extra attempts after a write conflict.
    pub write_retries: u32,
    /// Upper bound of the random wait before a retry.
    pub max_jitter: Duration,
}

impl DeliveryConfig {
    fn jitter(&self) -> Duration {
        let max_ms = u64::try_from(self.max_jitter.as_millis()).unwrap_or(u64::MAX);
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..=max_ms))
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self::from(&DeliverySettings::default())
    }
}

impl From<&DeliverySettings> for DeliveryConfig {
    fn from(settings: &DeliverySettings) -> Self {
        Self {
            write_retries: settings.write_retries,
            max_jitter: Duration::from_millis(settings.max_jitter_ms),
        }
    }
}

/// One recipient that could not be delivered to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveryFailure {
    /// Recipient connection ID.
    pub id: ConnectionId,
    /// Recipient attributes.
    pub attributes: Attributes,
    /// Last error.
    pub reason: String,
}

impl fmt::Display for DeliveryFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "connection {} {}: {}", self.id, self.attributes, self.reason)
    }
}

/// Fan-out errors.
#[derive(Debug, Error)]
pub enum FanOutError {
    /// Synchronous delivery failed for at least one recipient.
    #[error("{}", summarize(.failures, .delivered))]
    Delivery {
        /// Every failed recipient.
        failures: Vec<DeliveryFailure>,
        /// Recipients that were delivered to.
        delivered: Vec<ConnectionId>,
    },
}

fn summarize(failures: &[DeliveryFailure], delivered: &[ConnectionId]) -> String {
    let reasons = failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ");
    format!(
        "delivery failed for {} of {} recipients: {reasons}",
        failures.len(),
        failures.len() + delivered.len()
    )
}

/// Delivers notifications to the connections of one registry.
#[derive(Clone)]
pub struct FanOut {
    registry: Arc<ConnectionRegistry>,
    config: DeliveryConfig,
}

impl FanOut {
    /// Create a fan-out engine over `registry`.
    pub fn new(registry: Arc<ConnectionRegistry>, config: DeliveryConfig) -> Self {
        Self { registry, config }
    }

    /// The registry recipients are resolved from.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Deliver a decoded notification.
    pub async fn deliver(
        &self,
        notification: Notification,
    ) -> Result<Vec<ConnectionId>, FanOutError> {
        self.send_notification(
            &notification.target,
            notification.payload,
            notification.synchronous,
        )
        .await
    }

    /// Send `payload` to every connection matching `route`.
    ///
    /// Synchronous sends complete every delivery before returning and report
    /// the IDs delivered to; failures are aggregated into one error.
    /// Asynchronous sends spawn one task per recipient and return the IDs
    /// dispatched to; failures are only logged.
    #[instrument(skip_all, fields(route = %route, synchronous = synchronous))]
    pub async fn send_notification(
        &self,
        route: &Attributes,
        payload: Bytes,
        synchronous: bool,
    ) -> Result<Vec<ConnectionId>, FanOutError> {
        let recipients = self.registry.get(route);
        if recipients.is_empty() {
            debug!("no matching connections");
            return Ok(Vec::new());
        }
        debug!(recipients = recipients.len(), "fanning out");

        let message = PreparedMessage::new(payload);

        if !synchronous {
            let ids = recipients.iter().map(|c| c.id()).collect();
            for connection in recipients {
                let registry = self.registry.clone();
                let config = self.config.clone();
                let message = message.clone();
                drop(tokio::spawn(async move {
                    if let Err(e) = deliver_one(&registry, &connection, &message, &config).await {
                        metrics::counter!(DELIVERY_FAILURES_TOTAL, "mode" => "async").increment(1);
                        warn!(conn_id = connection.id(), attributes = %connection.attributes(), error = %e, "async delivery failed");
                    }
                }));
            }
            return Ok(ids);
        }

        let mut delivered = Vec::with_capacity(recipients.len());
        let mut failures = Vec::new();
        for connection in &recipients {
            match deliver_one(&self.registry, connection, &message, &self.config).await {
                Ok(()) => delivered.push(connection.id()),
                Err(e) => {
                    metrics::counter!(DELIVERY_FAILURES_TOTAL, "mode" => "sync").increment(1);
                    warn!(conn_id = connection.id(), attributes = %connection.attributes(), error = %e, "delivery failed");
                    failures.push(DeliveryFailure {
                        id: connection.id(),
                        attributes: connection.attributes().clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        if failures.is_empty() {
            Ok(delivered)
        } else {
            Err(FanOutError::Delivery {
                failures,
                delivered,
            })
        }
    }
}

/// Write to one recipient, retrying write conflicts. On final failure the
/// recipient is closed and unregistered.
async fn deliver_one(
    registry: &ConnectionRegistry,
    connection: &Connection,
    message: &PreparedMessage,
    config: &DeliveryConfig,
) -> Result<(), TransportError> {
    let mut retry = 0;
    let error = loop {
        match connection.transport().write_prepared(message).await {
            Ok(()) => {
                metrics::counter!(DELIVERIES_TOTAL).increment(1);
                return Ok(());
            }
            Err(e) if e.is_retryable() && retry < config.write_retries => {
                retry += 1;
                metrics::counter!(WRITE_CONFLICTS_TOTAL).increment(1);
                let wait = config.jitter();
                debug!(conn_id = connection.id(), retry, ?wait, "write conflict, retrying");
                tokio::time::sleep(wait).await;
            }
            Err(e) => break e,
        }
    };

    if let Err(e) = connection.close().await {
        debug!(conn_id = connection.id(), error = %e, "close after failed delivery");
    }
    let _ = registry.remove_id(connection.id());
    Err(error)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::transport::{Frame, MemoryPeer, MemoryTransport};

    fn attrs(pairs: &[(&str, &str)]) -> Attributes {
        pairs.iter().copied().collect()
    }

    fn fanout() -> FanOut {
        FanOut::new(
            Arc::new(ConnectionRegistry::new("incoming")),
            DeliveryConfig {
                write_retries: 2,
                max_jitter: Duration::from_millis(120),
            },
        )
    }

    fn register(
        fanout: &FanOut,
        pairs: &[(&str, &str)],
    ) -> (ConnectionId, Arc<MemoryTransport>, MemoryPeer) {
        let (transport, peer) = MemoryTransport::pair();
        let transport = Arc::new(transport);
        let (_, id) = fanout.registry().append(attrs(pairs), transport.clone());
        (id, transport, peer)
    }

    #[tokio::test]
    async fn zero_matches_is_ok_and_empty() {
        let fanout = fanout();
        let _ = register(&fanout, &[("customer", "acme")]);
        let ids = fanout
            .send_notification(&attrs(&[("customer", "other")]), Bytes::from_static(b"{}"), true)
            .await
            .unwrap();
        assert!(ids.is_empty());
    }

    #[tokio::test]
    async fn sync_delivers_same_payload_to_all_matches() {
        let fanout = fanout();
        let (a, _, mut pa) = register(&fanout, &[("customer", "acme")]);
        let (b, _, mut pb) = register(&fanout, &[("customer", "acme"), ("cluster", "c1")]);
        let (_, _, mut pc) = register(&fanout, &[("customer", "other")]);

        let payload = Bytes::from_static(b"{\"target\":{\"customer\":\"acme\"}}");
        let ids = fanout
            .send_notification(&attrs(&[("customer", "acme")]), payload.clone(), true)
            .await
            .unwrap();

        assert_eq!(ids.into_iter().collect::<BTreeSet<_>>(), BTreeSet::from([a, b]));
        assert_eq!(pa.recv().await, Some(Frame::Binary(payload.clone())));
        assert_eq!(pb.recv().await, Some(Frame::Binary(payload)));
        assert!(pc.try_recv().is_none());
    }

    #[tokio::test]
    async fn one_failed_recipient_does_not_stop_siblings() {
        let fanout = fanout();
        let (a, _, mut pa) = register(&fanout, &[("customer", "acme"), ("n", "1")]);
        let (b, tb, pb) = register(&fanout, &[("customer", "acme"), ("n", "2")]);
        let (c, _, mut pc) = register(&fanout, &[("customer", "acme"), ("n", "3")]);
        tb.fail_writes(true);

        let err = fanout
            .send_notification(&attrs(&[("customer", "acme")]), Bytes::from_static(b"x"), true)
            .await
            .unwrap_err();

        let FanOutError::Delivery { failures, delivered } = &err;
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].id, b);
        assert_eq!(
            delivered.iter().copied().collect::<BTreeSet<_>>(),
            BTreeSet::from([a, c])
        );
        assert!(err.to_string().contains("delivery failed for 1 of 3 recipients"));
        assert!(err.to_string().contains("broken pipe"));

        assert!(pa.recv().await.is_some());
        assert!(pc.recv().await.is_some());
        assert!(pb.is_closed());
        assert_eq!(fanout.registry().len(), 2);
        assert!(fanout.registry().get_id(b).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn write_conflicts_are_retried() {
        let fanout = fanout();
        let (a, ta, mut pa) = register(&fanout, &[("customer", "acme")]);
        ta.conflict_next_writes(2);

        let ids = fanout
            .send_notification(&attrs(&[("customer", "acme")]), Bytes::from_static(b"x"), true)
            .await
            .unwrap();

        assert_eq!(ids, vec![a]);
        assert!(pa.recv().await.is_some());
        assert_eq!(fanout.registry().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_conflict_retries_remove_recipient() {
        let fanout = fanout();
        let (a, ta, pa) = register(&fanout, &[("customer", "acme")]);
        ta.conflict_next_writes(3);

        let err = fanout
            .send_notification(&attrs(&[("customer", "acme")]), Bytes::from_static(b"x"), true)
            .await
            .unwrap_err();

        let FanOutError::Delivery { failures, delivered } = err;
        assert_eq!(failures[0].id, a);
        assert!(failures[0].reason.contains("write lock"));
        assert!(delivered.is_empty());
        assert!(pa.is_closed());
        assert!(fanout.registry().is_empty());
    }

    #[tokio::test]
    async fn async_returns_dispatched_ids_and_delivers() {
        let fanout = fanout();
        let (a, _, mut pa) = register(&fanout, &[("customer", "acme")]);
        let (b, tb, pb) = register(&fanout, &[("customer", "acme"), ("cluster", "c9")]);
        tb.fail_writes(true);

        let ids = fanout
            .send_notification(&attrs(&[("customer", "acme")]), Bytes::from_static(b"x"), false)
            .await
            .unwrap();
        assert_eq!(ids.into_iter().collect::<BTreeSet<_>>(), BTreeSet::from([a, b]));

        assert!(pa.recv().await.is_some());
        pb.closed().await;
        // Removal follows the close in the same task.
        for _ in 0..100 {
            if fanout.registry().get_id(b).is_none() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(fanout.registry().get_id(b).is_none());
        assert!(fanout.registry().get_id(a).is_some());
    }

    #[tokio::test]
    async fn deliver_uses_notification_fields() {
        let fanout = fanout();
        let (a, _, mut pa) = register(&fanout, &[("customer", "acme")]);
        let notification = Notification {
            target: attrs(&[("customer", "acme")]),
            payload: Bytes::from_static(b"raw"),
            synchronous: true,
        };
        assert_eq!(fanout.deliver(notification).await.unwrap(), vec![a]);
        assert_eq!(pa.recv().await, Some(Frame::Binary(Bytes::from_static(b"raw"))));
    }

    #[test]
    fn jitter_stays_in_bounds() {
        let config = DeliveryConfig::default();
        for _ in 0..100 {
            assert!(config.jitter() <= Duration::from_millis(120));
        }
        let none = DeliveryConfig {
            write_retries: 0,
            max_jitter: Duration::ZERO,
        };
        assert_eq!(none.jitter(), Duration::ZERO);
    }
}
