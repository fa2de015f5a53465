//! Chat socket protocol messages.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Messages the client sends over the socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Heartbeat keep-alive.
    Ping,
    ChatMessage { content: String },
    DeleteMessage { message_id: i64 },
    Typing { is_typing: bool },
}

impl ClientMessage {
    pub fn chat(content: impl Into<String>) -> Self {
        Self::ChatMessage {
            content: content.into(),
        }
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Server message types the client dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerMessageType {
    ConnectionEstablished,
    NewMessage,
    TypingIndicator,
    MessageDeleted,
    ConversationUpdated,
    ChatListUpdate,
    Error,
    Pong,
    #[serde(other)]
    Unknown,
}

/// A parsed inbound frame.
///
/// `data` is the whole JSON payload, `type` included; the server sends flat
/// objects such as `{"type": "new_message", "message": {...}}`.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerMessage {
    pub msg_type: ServerMessageType,
    pub data: Value,
}

impl ServerMessage {
    /// Parse an inbound text frame. Any valid JSON is accepted; a missing or
    /// unrecognised `type` maps to [`ServerMessageType::Unknown`].
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let data: Value = serde_json::from_str(text)?;
        let msg_type = data
            .get("type")
            .cloned()
            .and_then(|t| serde_json::from_value(t).ok())
            .unwrap_or(ServerMessageType::Unknown);

        Ok(Self { msg_type, data })
    }

    /// True for notifications that invalidate the conversation list.
    pub fn requires_list_refresh(&self) -> bool {
        matches!(
            self.msg_type,
            ServerMessageType::ConversationUpdated | ServerMessageType::ChatListUpdate
        )
    }

    /// The chat message carried by a `new_message` frame.
    pub fn message(&self) -> Option<&Value> {
        self.data.get("message").filter(|m| m.is_object())
    }

    /// Human-readable text of an `error` frame (or the greeting of
    /// `connection_established`).
    pub fn text(&self) -> Option<&str> {
        self.data.get("message").and_then(Value::as_str)
    }
}

/// Realtime channel: a conversation id/slug or the reserved list channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    const LIST: &'static str = "list";

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The background channel that carries conversation-list updates.
    pub fn list() -> Self {
        Self(Self::LIST.to_string())
    }

    pub fn is_list(&self) -> bool {
        self.0 == Self::LIST
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for RoomId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<i64> for RoomId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}
