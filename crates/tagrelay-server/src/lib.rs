//! # tagrelay-server
//!
//! Attribute-routed notification relay.
//!
//! - Connection registry keyed by attribute sets (`registry`)
//! - Fan-out of one prepared payload to every matching connection (`fanout`)
//! - Per-connection read loop shared by local clients and uplinks (`session`)
//! - Edge → root uplinks with bounded reconnects and isolation cleanup (`uplink`)
//! - Axum streaming and post endpoints, `/health`, `/metrics` (`server`, `api`)
//! - OpenAPI document of the post endpoint (`openapi`)
//! - Graceful and fatal shutdown via `CancellationToken` (`shutdown`)

#![deny(unsafe_code)]

pub mod api;
pub mod config;
pub mod fanout;
pub mod health;
pub mod metrics;
pub mod openapi;
pub mod registry;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod transport;
pub mod uplink;

pub use config::{ConfigError, ServerConfig};
pub use fanout::{DeliveryConfig, FanOut, FanOutError};
pub use registry::{Connection, ConnectionId, ConnectionRegistry};
pub use server::{RelayServer, RelayState, RunningServer};
pub use shutdown::ShutdownCoordinator;
