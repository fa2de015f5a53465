//! Immutable request attempts.

use crate::HttpMethod;
use serde_json::Value;

/// One attempt at an API call, relative to the configured base URL.
///
/// `retried` belongs to this attempt only; replaying after a refresh produces
/// a new value through [`RequestAttempt::retry`]. Anonymous attempts
/// (`authenticate == false`) carry no bearer token and never trigger a
/// refresh.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestAttempt {
    pub method: HttpMethod,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    pub authenticate: bool,
    pub retried: bool,
}

impl RequestAttempt {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            authenticate: true,
            retried: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, path)
    }

    pub fn post(path: impl Into<String>, body: Option<Value>) -> Self {
        Self {
            body,
            ..Self::new(HttpMethod::Post, path)
        }
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Send without credentials, for login and other public endpoints.
    pub fn anonymous(self) -> Self {
        Self {
            authenticate: false,
            ..self
        }
    }

    /// The same request, marked as already replayed after a refresh.
    pub fn retry(self) -> Self {
        Self {
            retried: true,
            ..self
        }
    }
}
