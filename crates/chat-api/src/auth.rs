//! Account and session operations on top of [`ApiClient`].
//!
//! `AuthService` owns the session FSM. Login and logout drive it directly;
//! refreshes and invalidations made by the client's interceptor reach it
//! through a session observer, so the FSM never disagrees with the Token
//! Store for long.

use crate::models::{Credentials, LoginResponse, SignupRequest, User, UserSummary};
use crate::session_fsm::{SessionMachine, SessionMachineInput, SessionState};
use crate::{ApiClient, ApiError, ApiResult, RequestAttempt, SessionEvent};
use chat_storage::TokenUpdate;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Called with the new state after every session state change.
pub type SessionStateCallback = Box<dyn Fn(SessionState) + Send + Sync>;

/// FSM plus its change callback, shared with the session observer.
struct AuthTracker {
    fsm: Mutex<SessionMachine>,
    state_callback: Mutex<Option<SessionStateCallback>>,
}

impl AuthTracker {
    fn state(&self) -> SessionState {
        SessionState::from(self.fsm.lock().state())
    }

    /// Transition the FSM and notify callback if state changed.
    fn transition(&self, input: &SessionMachineInput) -> ApiResult<SessionState> {
        let mut fsm = self.fsm.lock();
        let old_state = SessionState::from(fsm.state());

        fsm.consume(input).map_err(|_| {
            ApiError::InvalidStateTransition(format!(
                "Cannot apply {:?} in state {:?}",
                input,
                fsm.state()
            ))
        })?;

        let new_state = SessionState::from(fsm.state());
        drop(fsm);

        if old_state != new_state {
            debug!(
                old_state = ?old_state,
                new_state = ?new_state,
                "session state changed"
            );
            if let Some(callback) = self.state_callback.lock().as_ref() {
                callback(new_state);
            }
        }

        Ok(new_state)
    }

    fn on_session_event(&self, event: &SessionEvent) {
        let input = match event {
            SessionEvent::Refreshed { .. } => SessionMachineInput::TokenRefreshed,
            SessionEvent::Invalidated => SessionMachineInput::SessionInvalidated,
        };
        if let Err(e) = self.transition(&input) {
            debug!(error = %e, "session event ignored by session FSM");
        }
    }
}

/// Login, registration, password and profile operations.
pub struct AuthService {
    api: ApiClient,
    tracker: Arc<AuthTracker>,
}

impl AuthService {
    /// Create the service. A session already in the Token Store counts as
    /// logged in until the server says otherwise.
    pub fn new(api: ApiClient) -> Self {
        let tracker = Arc::new(AuthTracker {
            fsm: Mutex::new(SessionMachine::new()),
            state_callback: Mutex::new(None),
        });

        if api.tokens().has_session() {
            // SignedOut -> SignedIn is always valid.
            let _ = tracker.transition(&SessionMachineInput::SessionRestored);
            info!("restored stored session");
        }

        let observer = Arc::clone(&tracker);
        api.add_session_observer(Arc::new(move |event: &SessionEvent| {
            observer.on_session_event(event)
        }));

        Self { api, tracker }
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    /// Get the current FSM state.
    pub fn state(&self) -> SessionState {
        self.tracker.state()
    }

    /// Set a callback to be notified of auth state changes.
    pub fn set_state_callback(&self, callback: SessionStateCallback) {
        *self.tracker.state_callback.lock() = Some(callback);
    }

    /// User cached alongside the tokens, if any.
    pub fn cached_user(&self) -> Option<User> {
        let raw = self.api.tokens().load().user?;
        match serde_json::from_value(raw) {
            Ok(user) => Some(user),
            Err(e) => {
                warn!(error = %e, "cached user has an unexpected shape");
                None
            }
        }
    }

    /// `POST /login/` with a username or email, then fetch and cache the
    /// user. Any failure leaves no session behind.
    pub async fn login(&self, credentials: &Credentials) -> ApiResult<User> {
        let body = login_body(credentials)?;
        self.tracker.transition(&SessionMachineInput::SignInStarted)?;

        match self.try_login(body).await {
            Ok(user) => {
                info!(username = %user.username, "logged in");
                self.tracker.transition(&SessionMachineInput::SignInSucceeded)?;
                Ok(user)
            }
            Err(e) => {
                warn!(error = %e, "login failed");
                if let Err(clear_err) = self.api.tokens().clear() {
                    warn!(error = %clear_err, "failed to clear session after failed login");
                }
                // SigningIn -> SignedOut, unless an invalidation already got there.
                let _ = self.tracker.transition(&SessionMachineInput::SignInFailed);
                Err(e)
            }
        }
    }

    async fn try_login(&self, body: Value) -> ApiResult<User> {
        let response = self
            .api
            .request(RequestAttempt::post("/login/", Some(body)).anonymous())
            .await?;
        let tokens: LoginResponse = response.json()?;

        self.api
            .tokens()
            .save(&TokenUpdate::tokens(tokens.access, tokens.refresh))?;

        self.current_user().await
    }

    /// `POST /register/`. Does not log in.
    pub async fn signup(&self, request: &SignupRequest) -> ApiResult<UserSummary> {
        let body = serde_json::to_value(request)?;
        let response = self
            .api
            .request(RequestAttempt::post("/register/", Some(body)).anonymous())
            .await?;
        let user: UserSummary = response.json()?;
        info!(username = %user.username, "account registered");
        Ok(user)
    }

    /// Exchange the refresh token for a new access token right now.
    pub async fn refresh_access(&self) -> ApiResult<()> {
        self.api.refresh_session().await.map(|_| ())
    }

    /// `GET /users/me/`, caching the result in the Token Store.
    pub async fn current_user(&self) -> ApiResult<User> {
        let response = self.api.get("/users/me/").await?;
        let user: User = response.json()?;

        self.api.tokens().save(&TokenUpdate {
            user: Some(response.body),
            ..TokenUpdate::default()
        })?;

        Ok(user)
    }

    /// `POST /update/password/`
    pub async fn change_password(&self, old_password: &str, new_password: &str) -> ApiResult<()> {
        if new_password.is_empty() {
            return Err(ApiError::InvalidInput("new password must not be empty".into()));
        }

        self.api
            .post(
                "/update/password/",
                Some(json!({
                    "old_password": old_password,
                    "new_password": new_password,
                })),
            )
            .await?;
        info!("password changed");
        Ok(())
    }

    /// Revoke the refresh token server-side and clear the local session.
    ///
    /// The local session is cleared even when the server call fails; that
    /// failure is still returned.
    pub async fn logout(&self) -> ApiResult<()> {
        let tokens = self.api.tokens();
        let started = self
            .tracker
            .transition(&SessionMachineInput::SignOutStarted)
            .is_ok();

        let revoked = match tokens.refresh_token() {
            Some(refresh) => self
                .api
                .post("/logout/", Some(json!({ "refresh": refresh })))
                .await
                .map(|_| ()),
            None => Ok(()),
        };

        if let Err(e) = &revoked {
            warn!(error = %e, "server logout failed, clearing local session anyway");
        }

        let cleared = tokens.clear();
        if started {
            let _ = self.tracker.transition(&SessionMachineInput::SignOutFinished);
        }
        info!("logged out");

        revoked?;
        cleared?;
        Ok(())
    }

    /// `POST /reset-password/`
    pub async fn request_password_reset(&self, email: &str) -> ApiResult<()> {
        let email = email.trim();
        if email.is_empty() {
            return Err(ApiError::InvalidInput("email is required".into()));
        }

        self.api
            .request(
                RequestAttempt::post("/reset-password/", Some(json!({ "email": email })))
                    .anonymous(),
            )
            .await?;
        Ok(())
    }

    /// `POST /reset-password/confirm/` with the uid and token from the email.
    pub async fn confirm_password_reset(
        &self,
        uid: &str,
        token: &str,
        new_password: &str,
    ) -> ApiResult<()> {
        let body = json!({
            "uid": uid,
            "token": token,
            "new_password": new_password,
        });

        self.api
            .request(RequestAttempt::post("/reset-password/confirm/", Some(body)).anonymous())
            .await?;
        Ok(())
    }
}

/// Username wins when both are given.
fn login_body(credentials: &Credentials) -> ApiResult<Value> {
    let non_empty = |value: &Option<String>| {
        value
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    if credentials.password.is_empty() {
        return Err(ApiError::InvalidInput("password is required".into()));
    }

    match (non_empty(&credentials.username), non_empty(&credentials.email)) {
        (Some(username), _) => Ok(json!({
            "username": username,
            "password": credentials.password,
        })),
        (None, Some(email)) => Ok(json!({
            "email": email,
            "password": credentials.password,
        })),
        (None, None) => Err(ApiError::InvalidInput(
            "either username or email must be provided".into(),
        )),
    }
}
