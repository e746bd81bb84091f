//! `RelayServer`: two axum routers on two listeners sharing one relay state.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::api;
use crate::config::ServerConfig;
use crate::fanout::FanOut;
use crate::openapi;
use crate::registry::ConnectionRegistry;
use crate::shutdown::ShutdownCoordinator;
use crate::uplink::{Dialer, UplinkManager, WsDialer};

/// Shared state accessible from axum handlers and sessions.
#[derive(Clone)]
pub struct RelayState {
    /// Local client connections.
    pub incoming: Arc<ConnectionRegistry>,
    /// Fan-out over `incoming`.
    pub fanout: FanOut,
    /// Uplink manager; `None` on the root.
    pub uplink: Option<Arc<UplinkManager>>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle for `/metrics`.
    pub metrics: Option<PrometheusHandle>,
    /// Resolved configuration.
    pub config: Arc<ServerConfig>,
}

/// Addresses and tasks of a listening server.
pub struct RunningServer {
    /// Bound address of the streaming endpoint.
    pub websocket_addr: SocketAddr,
    /// Bound address of the post endpoint.
    pub rest_addr: SocketAddr,
    /// Listener tasks; they finish after the shutdown token is cancelled.
    pub handles: Vec<JoinHandle<()>>,
}

/// The relay server.
pub struct RelayServer {
    state: RelayState,
}

impl RelayServer {
    /// Create a server. Edge instances dial the root with real websockets.
    pub fn new(config: ServerConfig, shutdown: Arc<ShutdownCoordinator>) -> Self {
        let dialer = Arc::new(WsDialer::new(config.write_lock_timeout));
        Self::with_dialer(config, shutdown, dialer)
    }

    /// Create a server with a custom uplink dialer.
    pub fn with_dialer(
        config: ServerConfig,
        shutdown: Arc<ShutdownCoordinator>,
        dialer: Arc<dyn Dialer>,
    ) -> Self {
        let incoming = Arc::new(ConnectionRegistry::new("incoming"));
        let fanout = FanOut::new(incoming.clone(), config.delivery.clone());
        let uplink = config.uplink.clone().map(|uplink_config| {
            Arc::new(UplinkManager::new(
                uplink_config,
                dialer,
                fanout.clone(),
                Arc::new(ConnectionRegistry::new("outgoing")),
                shutdown.clone(),
            ))
        });
        Self {
            state: RelayState {
                incoming,
                fanout,
                uplink,
                shutdown,
                start_time: Instant::now(),
                metrics: None,
                config: Arc::new(config),
            },
        }
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.state.metrics = Some(handle);
        self
    }

    /// Router of the streaming (websocket) port.
    pub fn websocket_router(&self) -> Router {
        Router::new()
            .route("/v1/waitfornotification", get(api::wait_for_notification))
            .route("/waitfornotification", get(api::wait_for_notification))
            .route(
                "/waitfornotification/{key}",
                get(api::wait_for_notification_legacy),
            )
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Router of the post port.
    pub fn rest_router(&self) -> Router {
        Router::new()
            .route("/v1/sendnotification", post(api::send_notification))
            .route("/sendnotification", post(api::send_notification))
            .route("/health", get(api::health_handler))
            .route("/metrics", get(api::metrics_handler))
            .route(openapi::OPENAPI_PATH, get(api::openapi_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Bind both listeners and serve until the shutdown token is cancelled.
    pub async fn listen(&self) -> std::io::Result<RunningServer> {
        let host = self.state.config.host.as_str();
        let ws_listener = TcpListener::bind((host, self.state.config.websocket_port)).await?;
        let rest_listener = TcpListener::bind((host, self.state.config.rest_port)).await?;
        let websocket_addr = ws_listener.local_addr()?;
        let rest_addr = rest_listener.local_addr()?;

        let handles = vec![
            self.serve(ws_listener, self.websocket_router(), "websocket"),
            self.serve(rest_listener, self.rest_router(), "rest"),
        ];
        info!(
            %websocket_addr,
            %rest_addr,
            role = if self.state.config.is_root() { "root" } else { "edge" },
            "relay listening"
        );
        Ok(RunningServer {
            websocket_addr,
            rest_addr,
            handles,
        })
    }

    fn serve(&self, listener: TcpListener, router: Router, name: &'static str) -> JoinHandle<()> {
        let token = self.state.shutdown.token();
        tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = result {
                error!(listener = name, error = %e, "listener failed");
            }
        })
    }

    /// Close every local client and uplink.
    pub async fn close_connections(&self) {
        let incoming = self.state.incoming.close_all().await;
        let outgoing = match &self.state.uplink {
            Some(uplink) => uplink.outgoing().close_all().await,
            None => 0,
        };
        info!(incoming, outgoing, "closed connections");
    }

    /// Cancel listeners, close connections and wait for the listener tasks.
    pub async fn graceful_shutdown(&self, running: RunningServer, timeout: Option<Duration>) {
        self.state.shutdown.shutdown();
        self.close_connections().await;
        self.state
            .shutdown
            .graceful_shutdown(running.handles, timeout)
            .await;
    }

    /// Local client registry.
    pub fn incoming(&self) -> &Arc<ConnectionRegistry> {
        &self.state.incoming
    }

    /// Uplink manager (edge only).
    pub fn uplink(&self) -> Option<&Arc<UplinkManager>> {
        self.state.uplink.as_ref()
    }

    /// Shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.state.shutdown
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }
}
