//! # tagrelay-gateway
//!
//! TagRelay gateway binary: loads settings, starts the streaming and post
//! listeners and runs until ctrl-c or a fatal isolation from the root.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tagrelay_core::logging::{bootstrap_subscriber, init_subscriber};
use tagrelay_server::{RelayServer, ServerConfig, ShutdownCoordinator};
use tagrelay_settings::RelaySettings;

/// Tag-addressed notification relay.
#[derive(Parser, Debug)]
#[command(name = "tagrelay-gateway", about = "Tag-addressed notification relay")]
struct Cli {
    /// Settings file (JSON). Defaults to the `CONFIG` environment variable.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind both listeners to.
    #[arg(long)]
    host: Option<String>,

    /// Port of the streaming endpoint (0 for auto-assign).
    #[arg(long)]
    websocket_port: Option<u16>,

    /// Port of the post endpoint (0 for auto-assign).
    #[arg(long)]
    rest_port: Option<u16>,

    /// Streaming endpoint of the root instance. Makes this instance an edge.
    #[arg(long)]
    parent_url: Option<String>,

    /// Log filter when `RUST_LOG` is unset (e.g. `info`, `tagrelay_server=debug`).
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    /// Load settings from `--config` (or `CONFIG`), then apply CLI flags.
    fn settings(&self) -> Result<RelaySettings> {
        let mut settings = match self.config.clone().or_else(tagrelay_settings::settings_path) {
            Some(path) => tagrelay_settings::load_settings_from_path(&path)
                .with_context(|| format!("Failed to load settings from {}", path.display()))?,
            None => tagrelay_settings::load_settings().context("Failed to load settings")?,
        };
        self.apply(&mut settings);
        tagrelay_settings::validate(&settings).context("Invalid settings")?;
        Ok(settings)
    }

    fn apply(&self, settings: &mut RelaySettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.websocket_port {
            settings.server.websocket_port = port;
        }
        if let Some(port) = self.rest_port {
            settings.server.rest_port = port;
        }
        if let Some(url) = &self.parent_url {
            settings.uplink.parent_url = Some(url.clone());
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = tracing::subscriber::with_default(bootstrap_subscriber(), || cli.settings())?;

    init_subscriber(&settings.logging.level, settings.logging.format);

    let metrics = tagrelay_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;
    let config = ServerConfig::from_settings(&settings).context("Invalid server configuration")?;

    let shutdown = Arc::new(ShutdownCoordinator::new());
    let server = RelayServer::new(config, shutdown.clone()).with_metrics(metrics);
    let running = server.listen().await.context("Failed to bind listeners")?;

    tracing::info!(
        websocket = %running.websocket_addr,
        rest = %running.rest_addr,
        "TagRelay gateway started"
    );

    let token = shutdown.token();
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for ctrl-c")?;
            tracing::info!("Shutting down...");
        }
        () = token.cancelled() => {}
    }

    server.graceful_shutdown(running, None).await;

    if let Some(reason) = shutdown.fatal_reason() {
        anyhow::bail!("relay stopped: {reason}");
    }
    tracing::info!("Shutdown complete");
    Ok(())
}
