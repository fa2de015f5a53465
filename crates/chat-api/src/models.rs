//! Wire models for the REST API.
//!
//! Optional and server-computed fields default when absent so older or
//! trimmed payloads still decode.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Full user record (`/users/me/`, message senders, participants).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub is_online: bool,
}

impl User {
    /// "First Last" when set, otherwise the username.
    pub fn display_name(&self) -> String {
        let full = format!("{} {}", self.first_name, self.last_name);
        let full = full.trim();
        if full.is_empty() {
            self.username.clone()
        } else {
            full.to_string()
        }
    }
}

/// Minimal user record returned by search and registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: i64,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub conversation: i64,
    pub sender: User,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
    Private,
    Global,
    #[serde(other)]
    Other,
}

/// Conversation as listed, or as returned when starting one (which carries
/// `messages` instead of `last_message`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: i64,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(rename = "type", default = "default_kind")]
    pub kind: ConversationKind,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_message: Option<Message>,
    #[serde(default)]
    pub participants: Vec<User>,
    #[serde(default)]
    pub unread_count: u32,
    #[serde(default)]
    pub messages: Vec<Message>,
}

fn default_kind() -> ConversationKind {
    ConversationKind::Global
}

impl Conversation {
    /// Participants other than `me`.
    pub fn peers<'a>(&'a self, me: &'a str) -> impl Iterator<Item = &'a User> + 'a {
        self.participants.iter().filter(move |u| u.username != me)
    }
}

/// `GET /conversations/{id}/messages/`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MessagePage {
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub messages: Vec<Message>,
}

/// `{"ok": true}` acknowledgements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Ack {
    #[serde(default)]
    pub ok: bool,
}

/// `POST /login/`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoginResponse {
    pub access: String,
    pub refresh: String,
}

/// Login with a username or an email address.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Credentials {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: String,
}

impl Credentials {
    pub fn username(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            email: None,
            password: password.into(),
        }
    }

    pub fn email(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: None,
            email: Some(email.into()),
            password: password.into(),
        }
    }
}

/// `POST /register/`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignupRequest {
    pub username: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}
