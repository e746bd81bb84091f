//! In-process transport pair for exercising sessions, fan-out and uplinks
//! without sockets.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use super::{Frame, Transport, TransportError};

/// Relay side of an in-memory connection.
pub struct MemoryTransport {
    inbound: Mutex<mpsc::UnboundedReceiver<Frame>>,
    outbound: mpsc::UnboundedSender<Frame>,
    closed: CancellationToken,
    fail_writes: AtomicBool,
    conflicts: AtomicU32,
    writes: AtomicUsize,
}

/// Test side of an in-memory connection.
pub struct MemoryPeer {
    tx: mpsc::UnboundedSender<Frame>,
    rx: mpsc::UnboundedReceiver<Frame>,
    closed: CancellationToken,
}

impl MemoryTransport {
    /// Create a connected transport/peer pair.
    pub fn pair() -> (Self, MemoryPeer) {
        let (to_relay, inbound) = mpsc::unbounded_channel();
        let (outbound, from_relay) = mpsc::unbounded_channel();
        let closed = CancellationToken::new();
        let transport = Self {
            inbound: Mutex::new(inbound),
            outbound,
            closed: closed.clone(),
            fail_writes: AtomicBool::new(false),
            conflicts: AtomicU32::new(0),
            writes: AtomicUsize::new(0),
        };
        let peer = MemoryPeer {
            tx: to_relay,
            rx: from_relay,
            closed,
        };
        (transport, peer)
    }

    /// Make every subsequent write fail with a websocket error.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make the next `count` writes fail with a write conflict.
    pub fn conflict_next_writes(&self, count: u32) {
        self.conflicts.store(count, Ordering::SeqCst);
    }

    /// Number of frames successfully written.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Whether [`Transport::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn read_frame(&self) -> Result<Frame, TransportError> {
        let mut inbound = tokio::select! {
            guard = self.inbound.lock() => guard,
            () = self.closed.cancelled() => return Err(TransportError::Closed),
        };
        tokio::select! {
            frame = inbound.recv() => frame.ok_or(TransportError::Closed),
            () = self.closed.cancelled() => Err(TransportError::Closed),
        }
    }

    async fn write_frame(&self, frame: Frame) -> Result<(), TransportError> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(TransportError::WebSocket("broken pipe".to_string()));
        }
        let pending = self
            .conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if pending.is_ok() {
            return Err(TransportError::WriteConflict(Duration::ZERO));
        }
        self.outbound
            .send(frame)
            .map_err(|_| TransportError::Closed)?;
        let _ = self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.cancel();
        Ok(())
    }
}

impl MemoryPeer {
    /// Send a frame to the relay side.
    pub fn send(&self, frame: Frame) -> bool {
        self.tx.send(frame).is_ok()
    }

    /// Next frame written by the relay, or `None` once the relay side is gone.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }

    /// A frame already written by the relay, without waiting.
    pub fn try_recv(&mut self) -> Option<Frame> {
        self.rx.try_recv().ok()
    }

    /// Whether the relay side closed the transport.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Wait until the relay side closes the transport.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }
}
