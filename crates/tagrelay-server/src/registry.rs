//! Attribute-tagged routing table of live connections.
//!
//! A [`ConnectionRegistry`] owns every [`Connection`] of one direction
//! (local clients, or uplinks to the root). Lookups and removals go through
//! the attribute-match relation of [`Attributes::matches`]. The guard is a
//! `parking_lot::RwLock` and is never held across an await.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tagrelay_core::Attributes;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::metrics::{CONNECTIONS_ACTIVE, CONNECTIONS_CLOSED_TOTAL, CONNECTIONS_OPENED_TOTAL};
use crate::transport::{Transport, TransportError};

/// Opaque connection identifier (random, 63 bits).
pub type ConnectionId = u64;

/// A registered connection.
pub struct Connection {
    id: ConnectionId,
    attributes: Attributes,
    transport: Arc<dyn Transport>,
    connected_at: Instant,
}

impl Connection {
    /// Connection ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Attributes the connection registered with.
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// The underlying transport.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Close the underlying transport.
    pub async fn close(&self) -> Result<(), TransportError> {
        self.transport.close().await
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("attributes", &self.attributes)
            .finish_non_exhaustive()
    }
}

/// The set of live connections of one direction.
pub struct ConnectionRegistry {
    /// Label used in logs and metrics (`incoming` / `outgoing`).
    name: &'static str,
    connections: RwLock<Vec<Arc<Connection>>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            connections: RwLock::new(Vec::new()),
        }
    }

    /// Register a transport under a fresh ID.
    pub fn append(
        &self,
        attributes: Attributes,
        transport: Arc<dyn Transport>,
    ) -> (Arc<Connection>, ConnectionId) {
        let mut conns = self.connections.write();
        let mut id = new_id();
        while conns.iter().any(|c| c.id == id) {
            id = new_id();
        }
        let connection = Arc::new(Connection {
            id,
            attributes,
            transport,
            connected_at: Instant::now(),
        });
        conns.push(connection.clone());
        let len = conns.len();
        drop(conns);

        metrics::counter!(CONNECTIONS_OPENED_TOTAL, "registry" => self.name).increment(1);
        self.record_len(len);
        debug!(registry = self.name, conn_id = id, attributes = %connection.attributes, "connection registered");
        (connection, id)
    }

    /// Remove every connection matching `query`. Returns how many were removed.
    pub fn remove(&self, query: &Attributes) -> usize {
        self.remove_where(|c| c.attributes.matches(query))
    }

    /// Remove the connection with `id`. Idempotent.
    pub fn remove_id(&self, id: ConnectionId) -> bool {
        self.remove_where(|c| c.id == id) > 0
    }

    fn remove_where(&self, predicate: impl Fn(&Connection) -> bool) -> usize {
        let mut conns = self.connections.write();
        let mut removed = 0;
        let mut i = 0;
        while i < conns.len() {
            if predicate(&conns[i]) {
                let _ = conns.swap_remove(i);
                removed += 1;
            } else {
                i += 1;
            }
        }
        let len = conns.len();
        drop(conns);

        if removed > 0 {
            metrics::counter!(CONNECTIONS_CLOSED_TOTAL, "registry" => self.name)
                .increment(removed as u64);
            self.record_len(len);
        }
        removed
    }

    /// All connections matching `query`.
    pub fn get(&self, query: &Attributes) -> Vec<Arc<Connection>> {
        self.connections
            .read()
            .iter()
            .filter(|c| c.attributes.matches(query))
            .cloned()
            .collect()
    }

    /// Look up a connection by ID.
    pub fn get_id(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections.read().iter().find(|c| c.id == id).cloned()
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    /// Whether no connections are registered.
    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }

    /// Close the transport of every connection matching `query`.
    ///
    /// Entries stay registered; their read loops remove them. Close
    /// failures are logged and never stop the loop. Returns the number of
    /// connections visited.
    pub async fn close_connections(&self, query: &Attributes) -> usize {
        let matches = self.get(query);
        close_each(self.name, &matches).await;
        matches.len()
    }

    /// Close every registered transport.
    pub async fn close_all(&self) -> usize {
        let all: Vec<_> = self.connections.read().clone();
        close_each(self.name, &all).await;
        all.len()
    }

    #[allow(clippy::cast_precision_loss)]
    fn record_len(&self, len: usize) {
        metrics::gauge!(CONNECTIONS_ACTIVE, "registry" => self.name).set(len as f64);
    }
}

async fn close_each(registry: &'static str, connections: &[Arc<Connection>]) {
    for conn in connections {
        if let Err(e) = conn.close().await {
            warn!(registry, conn_id = conn.id, error = %e, "failed to close connection");
        }
    }
}

fn new_id() -> ConnectionId {
    rand::random::<u64>() >> 1
}
