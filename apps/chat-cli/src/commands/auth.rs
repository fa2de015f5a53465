//! Authentication and account commands.

use super::{prompt, prompt_if_missing, prompt_new_password, Context};
use crate::output::{self, OutputFormat};
use anyhow::Result;
use chat_api::models::{Credentials, SignupRequest};
use serde_json::json;

/// Login with a username or email and a password.
pub async fn login(
    ctx: &Context,
    username: Option<String>,
    email: Option<String>,
    format: &OutputFormat,
) -> Result<()> {
    if ctx.auth.state().is_authenticated() {
        if let Some(user) = ctx.auth.cached_user() {
            output::print_success(&format!("Already logged in as {}", user.username), format);
            return Ok(());
        }
    }

    let identity = match (username, email) {
        (_, Some(email)) => Identity::Email(email),
        (Some(username), None) => Identity::Username(username),
        (None, None) => Identity::Username(prompt("Username: ")?),
    };

    let password = rpassword::prompt_password("Password: ")?;
    if password.is_empty() {
        anyhow::bail!("Password is required");
    }

    let credentials = match identity {
        Identity::Username(username) => Credentials::username(username, password),
        Identity::Email(email) => Credentials::email(email, password),
    };

    let user = ctx.auth.login(&credentials).await?;
    output::print_success(&format!("Logged in as {}", user.username), format);
    Ok(())
}

enum Identity {
    Username(String),
    Email(String),
}

/// Create an account; does not log in.
pub async fn register(
    ctx: &Context,
    username: Option<String>,
    email: Option<String>,
    format: &OutputFormat,
) -> Result<()> {
    let username = prompt_if_missing(username, "Username: ")?;
    if username.is_empty() {
        anyhow::bail!("Username is required");
    }
    let password = prompt_new_password()?;

    let request = SignupRequest {
        username,
        password,
        email: email.map(|e| e.trim().to_string()).filter(|e| !e.is_empty()),
    };

    let user = ctx.auth.signup(&request).await?;
    output::print_success(
        &format!("Account {} created. Run 'chatapp login' to sign in", user.username),
        format,
    );
    Ok(())
}

/// Logout and clear session.
pub async fn logout(ctx: &Context, format: &OutputFormat) -> Result<()> {
    if !ctx.auth.state().is_authenticated() {
        output::print_success("Not logged in", format);
        return Ok(());
    }

    match ctx.auth.logout().await {
        Ok(()) => output::print_success("Logged out successfully", format),
        // The local session is gone either way.
        Err(e) => output::print_success(
            &format!("Logged out locally (server said: {})", e.message()),
            format,
        ),
    }
    Ok(())
}

/// Check authentication status without touching the network.
pub async fn status(ctx: &Context, format: &OutputFormat) -> Result<()> {
    let state = ctx.auth.state();
    let user = ctx.auth.cached_user();

    match format {
        OutputFormat::Text => {
            output::print_row("API", &ctx.config.api_url);
            output::print_row("Realtime", &ctx.config.ws_url);
            if state.is_authenticated() {
                output::print_row("Auth", "logged in");
                if let Some(user) = &user {
                    output::print_row("User", &user.username);
                }
            } else {
                output::print_row("Auth", "not logged in");
            }
        }
        OutputFormat::Json => output::print_json(&json!({
            "api_url": ctx.config.api_url,
            "ws_url": ctx.config.ws_url,
            "logged_in": state.is_authenticated(),
            "user": user,
        })),
    }
    Ok(())
}

/// Fetch the current user from the server.
pub async fn whoami(ctx: &Context, format: &OutputFormat) -> Result<()> {
    ctx.require_login()?;
    let user = ctx.auth.current_user().await?;

    match format {
        OutputFormat::Text => {
            output::print_heading(&user.display_name());
            output::print_row("ID", &user.id.to_string());
            output::print_row("Username", &user.username);
            output::print_row("Online", if user.is_online { "yes" } else { "no" });
        }
        OutputFormat::Json => output::print_json(&user),
    }
    Ok(())
}

pub async fn password_change(ctx: &Context, format: &OutputFormat) -> Result<()> {
    ctx.require_login()?;

    let old_password = rpassword::prompt_password("Current password: ")?;
    let new_password = prompt_new_password()?;

    ctx.auth.change_password(&old_password, &new_password).await?;
    output::print_success("Password changed", format);
    Ok(())
}

pub async fn password_reset_request(
    ctx: &Context,
    email: &str,
    format: &OutputFormat,
) -> Result<()> {
    ctx.auth.request_password_reset(email).await?;
    output::print_success(
        "If the address belongs to an account, a reset link is on its way",
        format,
    );
    Ok(())
}

pub async fn password_reset_confirm(
    ctx: &Context,
    uid: &str,
    token: &str,
    format: &OutputFormat,
) -> Result<()> {
    let new_password = prompt_new_password()?;
    ctx.auth
        .confirm_password_reset(uid, token, &new_password)
        .await?;
    output::print_success("Password reset. You can log in now", format);
    Ok(())
}
