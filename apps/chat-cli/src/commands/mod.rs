//! CLI command implementations.

mod auth;
mod chat;
mod watch;

pub use auth::{
    login, logout, password_change, password_reset_confirm, password_reset_request, register,
    status, whoami,
};
pub use chat::{
    conversations_hide, conversations_list, conversations_start, mark_read, messages_delete,
    messages_list, messages_send, search,
};
pub use watch::watch;

use anyhow::{Context as _, Result};
use chat_api::{ApiClient, ApiConfig, ApiError, AuthService, ChatService, ReqwestTransport};
use chat_config_and_utils::{init_logging, Config, Paths};
use chat_storage::create_token_store;
use std::io::{self, Write};
use std::sync::Arc;
use tracing::debug;

/// Everything a command needs, built once per invocation.
pub struct Context {
    pub config: Config,
    pub auth: AuthService,
    pub chat: ChatService,
}

impl Context {
    /// Load config, start logging and wire the client stack over the stored
    /// session. Logs go to stderr only when a level was given explicitly.
    pub fn load(log_level: Option<&str>) -> Result<Self> {
        let paths = Paths::new()?;
        paths.ensure_dirs()?;
        let config = Config::load(&paths).context("failed to load config")?;

        init_logging(
            "chatapp-cli",
            log_level.unwrap_or(&config.log_level),
            Some(paths.log_file()),
            log_level.is_some(),
        );

        let api_config = ApiConfig::new(&config.api_url)?;
        let tokens = Arc::new(create_token_store(&paths.session_file()));
        let transport = Arc::new(ReqwestTransport::new()?);
        let api = ApiClient::new(api_config, tokens, transport);
        debug!(api_url = %config.api_url, "client ready");

        Ok(Self {
            config,
            auth: AuthService::new(api.clone()),
            chat: ChatService::new(api),
        })
    }

    fn require_login(&self) -> Result<()> {
        if !self.auth.state().is_authenticated() {
            anyhow::bail!("Not logged in. Run 'chatapp login' first");
        }
        Ok(())
    }
}

/// Prefer the backend's own message for API failures.
pub fn describe_error(error: &anyhow::Error) -> String {
    match error.downcast_ref::<ApiError>() {
        Some(api_error) if api_error.is_unauthorized() => {
            "Session expired. Run 'chatapp login' again".to_string()
        }
        Some(ApiError::Refresh(_)) => "Session expired. Run 'chatapp login' again".to_string(),
        Some(api_error) => api_error.message(),
        None => format!("{:#}", error),
    }
}

/// Read one trimmed line from stdin after printing `label`.
fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

/// Prompt for a value unless it was given on the command line.
fn prompt_if_missing(value: Option<String>, label: &str) -> Result<String> {
    match value {
        Some(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        _ => prompt(label),
    }
}

/// Ask for a new password twice without echo.
fn prompt_new_password() -> Result<String> {
    let password = rpassword::prompt_password("New password: ")?;
    if password.is_empty() {
        anyhow::bail!("Password is required");
    }
    let confirm = rpassword::prompt_password("Confirm password: ")?;
    if password != confirm {
        anyhow::bail!("Passwords do not match");
    }
    Ok(password)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_api::RefreshError;
    use serde_json::json;

    #[test]
    fn test_describe_error_uses_backend_message() {
        let error = anyhow::Error::from(ApiError::Status {
            status: 400,
            body: json!({ "detail": "Conversation not found" }),
        });
        assert_eq!(describe_error(&error), "Conversation not found");
    }

    #[test]
    fn test_describe_error_for_expired_session() {
        let unauthorized = anyhow::Error::from(ApiError::Status {
            status: 401,
            body: json!({ "detail": "Token is invalid or expired" }),
        });
        assert!(describe_error(&unauthorized).contains("chatapp login"));

        let refresh = anyhow::Error::from(ApiError::Refresh(RefreshError::NoRefreshToken));
        assert!(describe_error(&refresh).contains("chatapp login"));
    }

    #[test]
    fn test_describe_error_plain() {
        let error = anyhow::anyhow!("Not logged in");
        assert_eq!(describe_error(&error), "Not logged in");
    }
}
