//! Edge → root uplinks.
//!
//! An edge instance keeps exactly one uplink per distinct signature: the
//! attributes of a local client restricted to the keys the root routes on.
//! Each uplink is driven by an explicit state machine:
//!
//! ```text
//! Idle → Connecting → Connected → Disconnected(retry) → Connecting | Isolated
//! ```
//!
//! Frames arriving over an uplink are fanned out to local clients. When an
//! uplink cannot be re-established within `max_retries`, the local clients
//! that depended on it are closed; if that leaves local clients with no
//! uplink at all, the process shuts down through the fatal path.

pub mod dialer;
pub mod keepalive;

use std::sync::Arc;
use std::time::Duration;

use tagrelay_core::Attributes;
use tagrelay_settings::UplinkSettings;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use crate::fanout::FanOut;
use crate::metrics::{UPLINK_DIALS_TOTAL, UPLINK_DISCONNECTS_TOTAL, UPLINK_ISOLATIONS_TOTAL};
use crate::registry::{Connection, ConnectionRegistry};
use crate::session::pump_frames;
use crate::shutdown::ShutdownCoordinator;

pub use dialer::{Dialer, WsDialer, build_dial_url};
pub use keepalive::{KeepaliveResult, run_keepalive};

/// Uplink configuration.
#[derive(Clone, Debug)]
pub struct UplinkConfig {
    /// Streaming endpoint of the root.
    pub parent_url: Url,
    /// Attribute keys kept in uplink signatures.
    pub root_attributes: Vec<String>,
    /// Keepalive ping interval.
    pub ping_interval: Duration,
    /// Reconnect attempts after the first connection is lost.
    pub max_retries: u32,
    /// Wait before each reconnect attempt.
    pub reconnect_backoff: Duration,
}

impl UplinkConfig {
    /// Build from settings and an already validated parent URL.
    pub fn from_settings(parent_url: Url, settings: &UplinkSettings) -> Self {
        Self {
            parent_url,
            root_attributes: settings.root_attributes.clone(),
            ping_interval: Duration::from_secs(settings.ping_interval_secs),
            max_retries: settings.max_retries,
            reconnect_backoff: Duration::from_millis(settings.reconnect_backoff_ms),
        }
    }
}

/// States of one uplink.
#[derive(Clone, Debug)]
pub enum UplinkState {
    /// Not yet attempted.
    Idle,
    /// Dialing the root.
    Connecting {
        /// Reconnect attempt (0 for the first dial).
        retry: u32,
    },
    /// Registered and relaying.
    Connected {
        /// Reconnect attempt that produced this connection.
        retry: u32,
        /// The registered uplink.
        connection: Arc<Connection>,
    },
    /// Lost (or never established).
    Disconnected {
        /// Reconnect attempt that was lost.
        retry: u32,
    },
    /// Given up; dependents cleaned up.
    Isolated,
}

/// How an [`UplinkManager::ensure_uplink`] call finished.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UplinkOutcome {
    /// A matching uplink already existed, or another registration brought
    /// one up before this uplink was given up.
    AlreadyConnected,
    /// Retries were exhausted and dependent local clients were closed.
    Isolated {
        /// Local clients closed by the cascade.
        closed: usize,
        /// Whether the cascade triggered a fatal shutdown.
        fatal: bool,
    },
    /// The process is shutting down.
    Cancelled,
}

/// Maintains uplinks for the local clients of an edge instance.
pub struct UplinkManager {
    config: UplinkConfig,
    dialer: Arc<dyn Dialer>,
    incoming: Arc<ConnectionRegistry>,
    outgoing: Arc<ConnectionRegistry>,
    fanout: FanOut,
    establish: Mutex<()>,
    shutdown: Arc<ShutdownCoordinator>,
}

impl UplinkManager {
    /// Create a manager. `fanout` must deliver to the `incoming` registry.
    pub fn new(
        config: UplinkConfig,
        dialer: Arc<dyn Dialer>,
        fanout: FanOut,
        outgoing: Arc<ConnectionRegistry>,
        shutdown: Arc<ShutdownCoordinator>,
    ) -> Self {
        Self {
            config,
            dialer,
            incoming: fanout.registry().clone(),
            outgoing,
            fanout,
            establish: Mutex::new(()),
            shutdown,
        }
    }

    /// Number of live uplinks.
    pub fn uplink_count(&self) -> usize {
        self.outgoing.len()
    }

    /// The registry holding uplinks.
    pub fn outgoing(&self) -> &Arc<ConnectionRegistry> {
        &self.outgoing
    }

    /// `attributes` restricted to the root's routing keys, or all of them
    /// when none of the routing keys are present.
    pub fn signature(&self, attributes: &Attributes) -> Attributes {
        let selected = attributes.select(&self.config.root_attributes);
        if selected.is_empty() {
            attributes.clone()
        } else {
            selected
        }
    }

    /// Run [`ensure_uplink`](Self::ensure_uplink) in the background.
    pub fn spawn_ensure(self: &Arc<Self>, attributes: Attributes) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let outcome = manager.ensure_uplink(&attributes).await;
            debug!(?outcome, "uplink task finished");
        })
    }

    /// Make sure an uplink exists for `attributes`, and drive it until it is
    /// lost for good.
    ///
    /// Returns immediately with [`UplinkOutcome::AlreadyConnected`] when a
    /// matching uplink exists. Otherwise this call owns the new uplink and
    /// only returns once it is isolated or the process shuts down.
    #[instrument(skip_all, fields(signature = tracing::field::Empty))]
    pub async fn ensure_uplink(&self, attributes: &Attributes) -> UplinkOutcome {
        let signature = self.signature(attributes);
        let _ = tracing::Span::current().record("signature", tracing::field::display(&signature));

        let mut state = UplinkState::Idle;
        loop {
            state = match state {
                UplinkState::Idle => UplinkState::Connecting { retry: 0 },

                UplinkState::Connecting { retry } => {
                    let _guard = self.establish.lock().await;
                    if self.shutdown.is_shutting_down() {
                        return UplinkOutcome::Cancelled;
                    }
                    if !self.outgoing.get(&signature).is_empty() {
                        debug!(retry, "uplink already present");
                        return UplinkOutcome::AlreadyConnected;
                    }
                    self.connect(&signature, retry).await
                }

                UplinkState::Connected { retry, connection } => {
                    self.relay(&connection).await;
                    let _ = self.outgoing.remove_id(connection.id());
                    UplinkState::Disconnected { retry }
                }

                UplinkState::Disconnected { retry } => {
                    metrics::counter!(UPLINK_DISCONNECTS_TOTAL).increment(1);
                    if self.shutdown.is_shutting_down() {
                        return UplinkOutcome::Cancelled;
                    }
                    if retry < self.config.max_retries {
                        warn!(retry, max_retries = self.config.max_retries, "uplink lost, reconnecting");
                        if !self.config.reconnect_backoff.is_zero() {
                            tokio::time::sleep(self.config.reconnect_backoff).await;
                        }
                        UplinkState::Connecting { retry: retry + 1 }
                    } else {
                        UplinkState::Isolated
                    }
                }

                UplinkState::Isolated => return self.isolate(&signature).await,
            };
        }
    }

    async fn connect(&self, signature: &Attributes, retry: u32) -> UplinkState {
        let url = build_dial_url(&self.config.parent_url, signature);
        debug!(retry, %url, "dialing root");
        match self.dialer.dial(&url).await {
            Ok(transport) => {
                metrics::counter!(UPLINK_DIALS_TOTAL, "outcome" => "ok").increment(1);
                let (connection, id) = self.outgoing.append(signature.clone(), transport);
                info!(retry, conn_id = id, "uplink connected");
                UplinkState::Connected { retry, connection }
            }
            Err(e) => {
                metrics::counter!(UPLINK_DIALS_TOTAL, "outcome" => "error").increment(1);
                warn!(retry, error = %e, "uplink dial failed");
                UplinkState::Disconnected { retry }
            }
        }
    }

    /// Relay frames from the uplink to local clients until it ends.
    async fn relay(&self, connection: &Arc<Connection>) {
        let cancel = self.shutdown.token().child_token();
        let keepalive = tokio::spawn(run_keepalive(
            connection.clone(),
            self.config.ping_interval,
            cancel.clone(),
        ));

        let end = pump_frames(connection, &self.fanout, "uplink").await;
        cancel.cancel();
        if let Ok(KeepaliveResult::Failed(reason)) = keepalive.await {
            debug!(conn_id = connection.id(), %reason, "keepalive failed");
        }
        if let Err(e) = connection.close().await {
            debug!(conn_id = connection.id(), error = %e, "close after uplink end");
        }
        info!(conn_id = connection.id(), age_secs = connection.age().as_secs(), reason = ?end, "uplink ended");
    }

    /// Cascade and fatal check run under the establishment lock, so dials
    /// already queued for other signatures are counted first.
    async fn isolate(&self, signature: &Attributes) -> UplinkOutcome {
        let _guard = self.establish.lock().await;
        if !self.outgoing.get(signature).is_empty() {
            debug!("uplink re-established by another registration");
            return UplinkOutcome::AlreadyConnected;
        }

        metrics::counter!(UPLINK_ISOLATIONS_TOTAL).increment(1);
        let closed = self.incoming.close_connections(signature).await;
        let _ = self.incoming.remove(signature);
        warn!(closed, "uplink retries exhausted, closed dependent clients");

        let fatal = self.outgoing.is_empty() && !self.incoming.is_empty();
        if fatal {
            error!(
                incoming = self.incoming.len(),
                "no uplinks left while local clients remain"
            );
            self.shutdown.fatal(format!(
                "isolated from root: no uplinks left for {} local clients",
                self.incoming.len()
            ));
        }
        UplinkOutcome::Isolated { closed, fatal }
    }
}
