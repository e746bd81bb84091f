//! Generic websocket transport over a split `Sink` / `Stream` pair.

use std::fmt::Display;
use std::marker::PhantomData;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{Frame, Transport, TransportError};

/// Conversion between a websocket library's message type and [`Frame`].
pub trait WsCodec: Sized + Send + 'static {
    /// Classify an inbound message.
    fn into_frame(self) -> Frame;

    /// Encode an outbound frame. `None` for frames that cannot be sent.
    fn from_frame(frame: Frame) -> Option<Self>;
}

/// A websocket connection with serialized writes and cancellable reads.
///
/// The sink and stream halves sit behind separate async mutexes so a pending
/// read never blocks a write. Writers wait at most `write_lock_timeout` for
/// the sink.
pub struct WsTransport<Tx, Rx, M> {
    sink: Mutex<Tx>,
    stream: Mutex<Rx>,
    closed: CancellationToken,
    write_lock_timeout: Duration,
    _message: PhantomData<fn() -> M>,
}

impl<Tx, Rx, M> WsTransport<Tx, Rx, M> {
    /// Wrap the two halves of a websocket.
    pub fn new(sink: Tx, stream: Rx, write_lock_timeout: Duration) -> Self {
        Self {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            closed: CancellationToken::new(),
            write_lock_timeout,
            _message: PhantomData,
        }
    }

    /// Whether [`Transport::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

#[async_trait]
impl<Tx, Rx, M, TxErr, RxErr> Transport for WsTransport<Tx, Rx, M>
where
    Tx: Sink<M, Error = TxErr> + Unpin + Send,
    Rx: Stream<Item = Result<M, RxErr>> + Unpin + Send,
    M: WsCodec,
    TxErr: Display + Send,
    RxErr: Display + Send,
{
    async fn read_frame(&self) -> Result<Frame, TransportError> {
        let mut stream = tokio::select! {
            guard = self.stream.lock() => guard,
            () = self.closed.cancelled() => return Err(TransportError::Closed),
        };
        tokio::select! {
            next = stream.next() => match next {
                Some(Ok(message)) => Ok(message.into_frame()),
                Some(Err(e)) => Err(TransportError::WebSocket(e.to_string())),
                None => Err(TransportError::Closed),
            },
            () = self.closed.cancelled() => Err(TransportError::Closed),
        }
    }

    async fn write_frame(&self, frame: Frame) -> Result<(), TransportError> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }
        let message = M::from_frame(frame)
            .ok_or_else(|| TransportError::WebSocket("frame cannot be encoded".to_string()))?;
        let mut sink = tokio::time::timeout(self.write_lock_timeout, self.sink.lock())
            .await
            .map_err(|_| TransportError::WriteConflict(self.write_lock_timeout))?;
        sink.send(message)
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.is_cancelled() {
            return Ok(());
        }
        // Cancel first so pending reads return immediately.
        self.closed.cancel();

        let Ok(mut sink) = tokio::time::timeout(self.write_lock_timeout, self.sink.lock()).await
        else {
            return Err(TransportError::WriteConflict(self.write_lock_timeout));
        };
        if let Some(close) = M::from_frame(Frame::Close) {
            if let Err(e) = sink.send(close).await {
                debug!(error = %e, "close frame not sent");
            }
        }
        sink.close()
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))
    }
}
