//! Server-side transport for connections accepted through axum's upgrade.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::StreamExt;
use futures::stream::{SplitSink, SplitStream};

use super::{Frame, WsCodec, WsTransport};

/// Transport over an accepted axum websocket.
pub type AxumTransport = WsTransport<SplitSink<WebSocket, Message>, SplitStream<WebSocket>, Message>;

/// Split an upgraded socket into a transport.
pub fn from_socket(socket: WebSocket, write_lock_timeout: Duration) -> AxumTransport {
    let (sink, stream) = socket.split();
    WsTransport::new(sink, stream, write_lock_timeout)
}

impl WsCodec for Message {
    fn into_frame(self) -> Frame {
        match self {
            Message::Text(text) => Frame::Text(text.as_str().to_owned()),
            Message::Binary(data) => Frame::Binary(data),
            Message::Ping(data) => Frame::Ping(data),
            Message::Pong(data) => Frame::Pong(data),
            Message::Close(_) => Frame::Close,
        }
    }

    fn from_frame(frame: Frame) -> Option<Self> {
        match frame {
            Frame::Text(text) => Some(Message::Text(text.into())),
            Frame::Binary(data) => Some(Message::Binary(data)),
            Frame::Ping(data) => Some(Message::Ping(data)),
            Frame::Pong(data) => Some(Message::Pong(data)),
            Frame::Close => Some(Message::Close(None)),
            Frame::Unknown => None,
        }
    }
}
