//! Realtime errors. Socket failures reach listeners as `Error` and
//! `Close` events rather than as values of this type.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RealtimeError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The socket could not be opened or was torn down by the client.
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Invalid socket URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

pub type RealtimeResult<T> = Result<T, RealtimeError>;
