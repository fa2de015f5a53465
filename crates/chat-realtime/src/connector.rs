//! Socket seam: the client talks to `Frame` sinks and streams, and a
//! [`Connector`] produces them.

use crate::{RealtimeError, RealtimeResult};
use async_trait::async_trait;
use futures_util::{future, Sink, SinkExt, Stream, StreamExt};
use std::borrow::Cow;
use std::pin::Pin;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;
use url::Url;

/// WebSocket frame as seen by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    /// Close with an optional status code.
    Close(Option<u16>),
}

impl Frame {
    fn into_message(self) -> Message {
        match self {
            Frame::Text(text) => Message::Text(text.into()),
            Frame::Binary(data) => Message::Binary(data.into()),
            Frame::Ping(data) => Message::Ping(data.into()),
            Frame::Pong(data) => Message::Pong(data.into()),
            Frame::Close(code) => Message::Close(code.map(|code| CloseFrame {
                code: CloseCode::from(code),
                reason: Cow::Borrowed(""),
            })),
        }
    }

    fn from_message(message: Message) -> Option<Self> {
        match message {
            Message::Text(text) => Some(Frame::Text(text.to_string())),
            Message::Binary(data) => Some(Frame::Binary(data.to_vec())),
            Message::Ping(data) => Some(Frame::Ping(data.to_vec())),
            Message::Pong(data) => Some(Frame::Pong(data.to_vec())),
            Message::Close(frame) => Some(Frame::Close(frame.map(|f| u16::from(f.code)))),
            Message::Frame(_) => None,
        }
    }
}

pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = RealtimeError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = RealtimeResult<Frame>> + Send>>;

/// Opens sockets. Tests substitute a scripted implementation.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &Url) -> RealtimeResult<(FrameSink, FrameStream)>;
}

/// Production connector over `tokio-tungstenite`.
#[derive(Debug, Default, Clone)]
pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, url: &Url) -> RealtimeResult<(FrameSink, FrameStream)> {
        let (ws_stream, response) = connect_async(url.as_str()).await?;
        debug!(status = %response.status(), "WebSocket handshake complete");

        let (write, read) = ws_stream.split();

        let sink = write
            .sink_map_err(RealtimeError::from)
            .with(|frame: Frame| future::ready(Ok::<_, RealtimeError>(frame.into_message())));

        let stream = read.filter_map(|message| {
            future::ready(match message {
                Ok(message) => Frame::from_message(message).map(Ok),
                Err(e) => Some(Err(RealtimeError::from(e))),
            })
        });

        Ok((Box::pin(sink), Box::pin(stream)))
    }
}
