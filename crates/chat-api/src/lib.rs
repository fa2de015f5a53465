//! REST client for the chatapp backend.
//!
//! This crate provides:
//! - An [`HttpTransport`] seam with a reqwest implementation
//! - [`ApiClient`]: bearer auth plus single-flight token refresh
//! - [`AuthService`]: login, logout, registration and password flows on an
//!   explicit session FSM
//! - [`ChatService`] and [`UserSearch`] for conversations, messages and users

mod auth;
mod chat;
mod client;
mod error;
pub mod models;
mod request;
mod session_fsm;
mod transport;

pub use auth::{AuthService, SessionStateCallback};
pub use chat::{ChatService, UserSearch, MIN_SEARCH_LENGTH};
pub use client::{ApiClient, ApiConfig, SessionEvent, SessionObserver, REFRESH_PATH};
pub use error::{extract_message, ApiError, ApiResult, RefreshError, TransportError};
pub use request::RequestAttempt;
pub use session_fsm::session_machine;
pub use session_fsm::{SessionMachine, SessionMachineInput, SessionMachineState, SessionState};
pub use transport::{
    HttpMethod, HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, DEFAULT_TIMEOUT,
};
