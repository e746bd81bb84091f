//! Client-side transport for uplinks dialed with `tokio-tungstenite`.

use std::time::Duration;

use futures::StreamExt;
use futures::stream::{SplitSink, SplitStream};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::{Frame, WsCodec, WsTransport};

type ClientStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Transport over a dialed websocket.
pub type TungsteniteTransport =
    WsTransport<SplitSink<ClientStream, Message>, SplitStream<ClientStream>, Message>;

/// Split a dialed websocket into a transport.
pub fn from_stream(stream: ClientStream, write_lock_timeout: Duration) -> TungsteniteTransport {
    let (sink, stream) = stream.split();
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
            Message::Frame(_) => Frame::Unknown,
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
