//! API error types.

use chat_storage::StorageError;
use serde_json::Value;
use thiserror::Error;

/// Failure to get any response from the server.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Connection refused, DNS failure, reset, etc.
    #[error("Network error: {0}")]
    Network(String),

    /// No response within the configured timeout
    #[error("Request timed out")]
    Timeout,

    /// The request could not be built
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Why a token refresh cycle failed.
///
/// Cloned once per waiter when a failed refresh rejects the queued requests.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RefreshError {
    /// No refresh token is stored
    #[error("No refresh token available")]
    NoRefreshToken,

    /// The refresh endpoint could not be reached
    #[error("Token refresh failed: {0}")]
    Transport(#[from] TransportError),

    /// The refresh endpoint answered with a non-2xx status
    #[error("Token refresh rejected: HTTP {status}")]
    Rejected { status: u16, body: Value },

    /// 2xx response without an `access` field
    #[error("Token refresh response did not include an access token")]
    MissingAccessToken,

    /// The new tokens could not be persisted
    #[error("Failed to persist refreshed tokens: {0}")]
    Storage(String),

    /// The refresh owner went away before settling this waiter
    #[error("Token refresh was abandoned")]
    Abandoned,
}

/// Error type for API calls.
#[derive(Error, Debug)]
pub enum ApiError {
    /// Non-2xx response passed through unmodified
    #[error("HTTP {status}")]
    Status { status: u16, body: Value },

    /// No response received
    #[error(transparent)]
    Network(#[from] TransportError),

    /// The 401 could not be recovered by refreshing the session
    #[error(transparent)]
    Refresh(#[from] RefreshError),

    /// Superseded by a newer request
    #[error("Request cancelled")]
    Cancelled,

    /// Rejected locally before any request was sent
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Response body did not match the expected shape
    #[error("Unexpected response body: {0}")]
    Decode(#[from] serde_json::Error),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// URL parse error
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Invalid state transition in the auth FSM
    #[error("Invalid auth state transition: {0}")]
    InvalidStateTransition(String),
}

impl ApiError {
    /// HTTP status carried by this error, including a rejected refresh.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            ApiError::Refresh(RefreshError::Rejected { status, .. }) => Some(*status),
            _ => None,
        }
    }

    /// Whether this is a 401 from the server.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Status { status: 401, .. })
    }

    /// Human-readable message, preferring what the backend said.
    pub fn message(&self) -> String {
        let body = match self {
            ApiError::Status { body, .. } => Some(body),
            ApiError::Refresh(RefreshError::Rejected { body, .. }) => Some(body),
            _ => None,
        };

        body.and_then(extract_message)
            .unwrap_or_else(|| self.to_string())
    }
}

/// Pull a message out of a backend error body.
///
/// Handles a bare string, `{"detail": ..}`, `{"message": ..}` and DRF field
/// errors such as `{"username": ["already taken"]}`.
pub fn extract_message(body: &Value) -> Option<String> {
    match body {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Object(map) => {
            for key in ["detail", "message"] {
                if let Some(Value::String(s)) = map.get(key) {
                    return Some(s.clone());
                }
            }

            map.iter().find_map(|(field, value)| {
                let first = match value {
                    Value::Array(items) => items.first()?.as_str()?,
                    Value::String(s) => s.as_str(),
                    _ => return None,
                };
                if field == "non_field_errors" {
                    Some(first.to_string())
                } else {
                    Some(format!("{}: {}", field, first))
                }
            })
        }
        _ => None,
    }
}

/// Result type alias using ApiError.
pub type ApiResult<T> = Result<T, ApiError>;
