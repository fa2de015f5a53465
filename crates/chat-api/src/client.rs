//! HTTP client with bearer auth and single-flight token refresh.
//!
//! Every call goes through [`ApiClient::request`]. A 401 on a first attempt
//! starts (or joins) a refresh cycle:
//!
//! ```text
//!  2xx ───────────────────────────────► Ok
//!  no response / non-401 ─────────────► Err (no retry)
//!  401, attempt.retried ──────────────► Err
//!  401, no refresh token ─────────────► clear session, Err
//!  401, refresh in flight ────────────► queue, wait for the owner
//!  401, idle ─────────────────────────► own the refresh
//!        │ success: persist, notify, drain queue ─► replay all (retried)
//!        │ failure: clear session, drain queue ──► reject all
//! ```
//!
//! [`ApiClient::refresh_session`] passes the same gate: it joins a running
//! refresh instead of starting a second one. The in-flight flag and the
//! queue live on the client instance, so independent clients never share
//! refresh state.

use crate::{
    ApiError, ApiResult, HttpMethod, HttpRequest, HttpResponse, HttpTransport, RefreshError,
    RequestAttempt, TransportError,
};
use chat_storage::{TokenStore, TokenUpdate};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};
use url::Url;

/// Path of the refresh endpoint, relative to the API base URL.
pub const REFRESH_PATH: &str = "/token/refresh/";

/// Where the API lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    pub base_url: Url,
}

impl ApiConfig {
    pub fn new(base_url: &str) -> ApiResult<Self> {
        Ok(Self {
            base_url: Url::parse(base_url)?,
        })
    }

    /// Resolve a path such as `/users/me/` against the base URL, keeping any
    /// path prefix the base carries (`http://host/api` + `/login/` is
    /// `http://host/api/login/`).
    pub fn endpoint(&self, path: &str) -> ApiResult<Url> {
        let base = self.base_url.as_str().trim_end_matches('/');
        let path = path.trim_start_matches('/');
        Ok(Url::parse(&format!("{}/{}", base, path))?)
    }
}

/// Session changes made by the client on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A refresh succeeded and the new tokens are persisted.
    Refreshed { access: String, refresh: String },
    /// The session was cleared after an unrecoverable 401.
    Invalidated,
}

/// Callback for [`SessionEvent`]s.
pub type SessionObserver = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

type RefreshOutcome = Result<String, RefreshError>;

struct PendingRequest {
    attempt: RequestAttempt,
    completion: oneshot::Sender<ApiResult<HttpResponse>>,
}

/// Someone waiting on the refresh owner.
enum Waiter {
    /// A request that hit 401; replayed or rejected.
    Request(PendingRequest),
    /// An explicit refresh; receives the outcome as is.
    Refresh(oneshot::Sender<RefreshOutcome>),
}

#[derive(Default)]
struct RefreshState {
    in_flight: bool,
    queue: Vec<Waiter>,
}

enum Admission {
    /// This caller runs the refresh.
    Owner(RequestAttempt),
    /// Another caller is refreshing; wait for it.
    Queued(oneshot::Receiver<ApiResult<HttpResponse>>),
}

struct Inner {
    config: ApiConfig,
    tokens: Arc<TokenStore>,
    transport: Arc<dyn HttpTransport>,
    refresh: Mutex<RefreshState>,
    observers: Mutex<Vec<SessionObserver>>,
}

/// Shared API client. Clones share tokens, transport and refresh state.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<Inner>,
}

/// Releases refresh ownership if the owning future is dropped before it
/// settles the queue. Dropped completions surface as `Abandoned`.
struct RefreshGuard<'a> {
    client: &'a ApiClient,
    armed: bool,
}

impl RefreshGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let abandoned = self.client.finish_refresh();
            warn!(
                waiters = abandoned.len(),
                "token refresh dropped before completion"
            );
        }
    }
}

impl ApiClient {
    pub fn new(
        config: ApiConfig,
        tokens: Arc<TokenStore>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                tokens,
                transport,
                refresh: Mutex::new(RefreshState::default()),
                observers: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &ApiConfig {
        &self.inner.config
    }

    pub fn tokens(&self) -> &Arc<TokenStore> {
        &self.inner.tokens
    }

    /// Register a callback for refresh and invalidation. Observers run in
    /// registration order; a panicking observer is logged and skipped.
    pub fn add_session_observer(&self, observer: SessionObserver) {
        self.inner.observers.lock().push(observer);
    }

    /// Whether a refresh cycle is currently running.
    pub fn is_refreshing(&self) -> bool {
        self.inner.refresh.lock().in_flight
    }

    pub async fn get(&self, path: &str) -> ApiResult<HttpResponse> {
        self.request(RequestAttempt::get(path)).await
    }

    pub async fn post(&self, path: &str, body: Option<Value>) -> ApiResult<HttpResponse> {
        self.request(RequestAttempt::post(path, body)).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> ApiResult<T> {
        Ok(self.get(path).await?.json()?)
    }

    pub async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> ApiResult<T> {
        let body = serde_json::to_value(body)?;
        Ok(self.post(path, Some(body)).await?.json()?)
    }

    /// Send one request through the refresh state machine.
    pub async fn request(&self, attempt: RequestAttempt) -> ApiResult<HttpResponse> {
        let response = self.dispatch(&attempt).await?;

        if response.status != 401 {
            return into_result(response);
        }

        if attempt.retried {
            debug!(path = %attempt.path, "401 on replayed request, giving up");
            return into_result(response);
        }

        if !attempt.authenticate {
            return into_result(response);
        }

        self.recover_unauthorized(attempt, response).await
    }

    /// Refresh the access token now, outside of any failing request.
    ///
    /// Joins the running refresh when there is one. On failure the session
    /// is cleared, same as an interceptor refresh.
    pub async fn refresh_session(&self) -> ApiResult<String> {
        if self.inner.tokens.refresh_token().is_none() {
            return Err(RefreshError::NoRefreshToken.into());
        }

        if let Some(waiter) = self.admit_refresh() {
            return waiter
                .await
                .unwrap_or(Err(RefreshError::Abandoned))
                .map_err(ApiError::Refresh);
        }

        self.run_refresh().await.map_err(ApiError::Refresh)
    }

    async fn recover_unauthorized(
        &self,
        attempt: RequestAttempt,
        unauthorized: HttpResponse,
    ) -> ApiResult<HttpResponse> {
        if self.inner.tokens.refresh_token().is_none() {
            info!(path = %attempt.path, "401 without a refresh token, clearing session");
            self.invalidate_session();
            return into_result(unauthorized);
        }

        let attempt = match self.admit(attempt) {
            Admission::Owner(attempt) => attempt,
            Admission::Queued(waiter) => {
                return waiter
                    .await
                    .unwrap_or(Err(ApiError::Refresh(RefreshError::Abandoned)));
            }
        };

        self.run_refresh().await.map_err(ApiError::Refresh)?;
        self.replay(attempt).await
    }

    /// Run the refresh as its owner and settle every waiter. Callers must
    /// hold the in-flight flag.
    async fn run_refresh(&self) -> RefreshOutcome {
        let guard = RefreshGuard {
            client: self,
            armed: true,
        };

        // Read after claiming, so a refresh that just finished is seen.
        let outcome = match self.inner.tokens.refresh_token() {
            Some(refresh_token) => self.refresh_tokens(&refresh_token).await,
            None => Err(RefreshError::NoRefreshToken),
        };
        if let Err(e) = &outcome {
            warn!(error = %e, "token refresh failed, clearing session");
            self.invalidate_session();
        }

        let queued = self.finish_refresh();
        guard.disarm();

        debug!(queued = queued.len(), ok = outcome.is_ok(), "settling refresh waiters");
        for waiter in queued {
            match (waiter, &outcome) {
                (Waiter::Refresh(completion), outcome) => {
                    let _ = completion.send(outcome.clone());
                }
                (Waiter::Request(pending), Ok(_)) => {
                    let client = self.clone();
                    tokio::spawn(async move {
                        let result = client.replay(pending.attempt).await;
                        // The waiter may have given up; nothing to do then.
                        let _ = pending.completion.send(result);
                    });
                }
                (Waiter::Request(pending), Err(e)) => {
                    let _ = pending.completion.send(Err(ApiError::Refresh(e.clone())));
                }
            }
        }

        outcome
    }

    /// Claim the refresh or join the queue, under one lock.
    fn admit(&self, attempt: RequestAttempt) -> Admission {
        let mut state = self.inner.refresh.lock();
        if state.in_flight {
            let (completion, waiter) = oneshot::channel();
            debug!(path = %attempt.path, position = state.queue.len(), "refresh in flight, queueing request");
            state.queue.push(Waiter::Request(PendingRequest {
                attempt,
                completion,
            }));
            Admission::Queued(waiter)
        } else {
            state.in_flight = true;
            Admission::Owner(attempt)
        }
    }

    /// Claim the refresh, or return a receiver for the running one's outcome.
    fn admit_refresh(&self) -> Option<oneshot::Receiver<RefreshOutcome>> {
        let mut state = self.inner.refresh.lock();
        if state.in_flight {
            let (completion, waiter) = oneshot::channel();
            debug!(position = state.queue.len(), "refresh in flight, joining it");
            state.queue.push(Waiter::Refresh(completion));
            Some(waiter)
        } else {
            state.in_flight = true;
            None
        }
    }

    /// Drain the queue and clear the in-flight flag atomically.
    fn finish_refresh(&self) -> Vec<Waiter> {
        let mut state = self.inner.refresh.lock();
        state.in_flight = false;
        std::mem::take(&mut state.queue)
    }

    /// Call the refresh endpoint directly on the transport, persist the
    /// result and notify observers.
    async fn refresh_tokens(&self, refresh_token: &str) -> RefreshOutcome {
        let request = HttpRequest {
            method: HttpMethod::Post,
            url: self
                .inner
                .config
                .endpoint(REFRESH_PATH)
                .map_err(|e| TransportError::InvalidRequest(e.to_string()))?,
            bearer: None,
            query: Vec::new(),
            body: Some(json!({ "refresh": refresh_token })),
        };

        debug!("refreshing access token");
        let response = self.inner.transport.execute(request).await?;

        if !response.is_success() {
            return Err(RefreshError::Rejected {
                status: response.status,
                body: response.body,
            });
        }

        let access = response
            .body
            .get("access")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or(RefreshError::MissingAccessToken)?
            .to_string();
        let refresh = response
            .body
            .get("refresh")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .unwrap_or(refresh_token)
            .to_string();

        let previous_user = self.inner.tokens.load().user;
        self.inner
            .tokens
            .save(&TokenUpdate {
                access: Some(access.clone()),
                refresh: Some(refresh.clone()),
                user: previous_user,
            })
            .map_err(|e| RefreshError::Storage(e.to_string()))?;

        info!(rotated = (refresh != refresh_token), "access token refreshed");
        self.notify(&SessionEvent::Refreshed {
            access: access.clone(),
            refresh,
        });

        Ok(access)
    }

    async fn replay(&self, attempt: RequestAttempt) -> ApiResult<HttpResponse> {
        let attempt = attempt.retry();
        into_result(self.dispatch(&attempt).await?)
    }

    async fn dispatch(&self, attempt: &RequestAttempt) -> ApiResult<HttpResponse> {
        let request = HttpRequest {
            method: attempt.method,
            url: self.inner.config.endpoint(&attempt.path)?,
            bearer: if attempt.authenticate {
                self.inner.tokens.access_token()
            } else {
                None
            },
            query: attempt.query.clone(),
            body: attempt.body.clone(),
        };

        debug!(
            method = %attempt.method,
            path = %attempt.path,
            retried = attempt.retried,
            authenticated = request.bearer.is_some(),
            "dispatching request"
        );

        let response = self.inner.transport.execute(request).await?;
        debug!(path = %attempt.path, status = response.status, "response received");
        Ok(response)
    }

    fn invalidate_session(&self) {
        if let Err(e) = self.inner.tokens.clear() {
            error!(error = %e, "failed to clear session");
        }
        self.notify(&SessionEvent::Invalidated);
    }

    fn notify(&self, event: &SessionEvent) {
        let observers = self.inner.observers.lock().clone();
        for observer in observers {
            if catch_unwind(AssertUnwindSafe(|| observer(event))).is_err() {
                error!("session observer panicked");
            }
        }
    }

    #[cfg(test)]
    fn queued_len(&self) -> usize {
        self.inner.refresh.lock().queue.len()
    }
}

fn into_result(response: HttpResponse) -> ApiResult<HttpResponse> {
    if response.is_success() {
        Ok(response)
    } else {
        Err(ApiError::Status {
            status: response.status,
            body: response.body,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use chat_storage::{MemoryStorage, StoredSession};
    use futures_util::future::join_all;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    #[derive(Clone)]
    pub(crate) enum RefreshBehavior {
        Succeed { access: String, refresh: Option<String> },
        Respond(HttpResponse),
        NetworkError,
        Hang,
    }

    /// Backend that accepts exactly one access token and scripts the
    /// refresh endpoint.
    pub(crate) struct FakeBackend {
        valid_access: Mutex<String>,
        refresh_behavior: Mutex<RefreshBehavior>,
        routes: Mutex<Vec<(String, HttpResponse)>>,
        pub refresh_calls: AtomicUsize,
        pub refresh_bodies: Mutex<Vec<Value>>,
        pub requests: Mutex<Vec<HttpRequest>>,
        pub refresh_started: Notify,
    }

    impl FakeBackend {
        pub fn new(valid_access: &str, refresh: RefreshBehavior) -> Arc<Self> {
            Arc::new(Self {
                valid_access: Mutex::new(valid_access.to_string()),
                refresh_behavior: Mutex::new(refresh),
                routes: Mutex::new(Vec::new()),
                refresh_calls: AtomicUsize::new(0),
                refresh_bodies: Mutex::new(Vec::new()),
                requests: Mutex::new(Vec::new()),
                refresh_started: Notify::new(),
            })
        }

        /// Only `token` is accepted from now on.
        pub fn set_valid_access(&self, token: &str) {
            *self.valid_access.lock() = token.to_string();
        }

        /// Fixed response for a path suffix, checked before auth.
        pub fn route(&self, suffix: &str, response: HttpResponse) {
            self.routes.lock().push((suffix.to_string(), response));
        }

        pub fn requests_to(&self, suffix: &str) -> Vec<HttpRequest> {
            self.requests
                .lock()
                .iter()
                .filter(|r| r.url.path().ends_with(suffix))
                .cloned()
                .collect()
        }
    }

    #[async_trait]
    impl HttpTransport for FakeBackend {
        async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
            self.requests.lock().push(request.clone());
            let path = request.url.path().to_string();

            if path.ends_with(REFRESH_PATH) {
                self.refresh_calls.fetch_add(1, Ordering::SeqCst);
                self.refresh_bodies
                    .lock()
                    .push(request.body.clone().unwrap_or(Value::Null));
                self.refresh_started.notify_one();
                // Give concurrent 401s time to queue up behind this refresh.
                tokio::time::sleep(Duration::from_millis(50)).await;

                let behavior = self.refresh_behavior.lock().clone();
                return match behavior {
                    RefreshBehavior::Succeed { access, refresh } => {
                        *self.valid_access.lock() = access.clone();
                        let mut body = json!({ "access": access });
                        if let Some(refresh) = refresh {
                            body["refresh"] = json!(refresh);
                        }
                        Ok(HttpResponse::new(200, body))
                    }
                    RefreshBehavior::Respond(response) => Ok(response),
                    RefreshBehavior::NetworkError => {
                        Err(TransportError::Network("connection refused".into()))
                    }
                    RefreshBehavior::Hang => std::future::pending().await,
                };
            }

            let routed = self
                .routes
                .lock()
                .iter()
                .find(|(suffix, _)| path.ends_with(suffix.as_str()))
                .map(|(_, response)| response.clone());
            if let Some(response) = routed {
                return Ok(response);
            }

            let valid = self.valid_access.lock().clone();
            if request.bearer.as_deref() == Some(valid.as_str()) {
                Ok(HttpResponse::new(
                    200,
                    json!({ "path": path, "token": valid }),
                ))
            } else {
                Ok(HttpResponse::new(
                    401,
                    json!({ "detail": "Given token not valid for any token type" }),
                ))
            }
        }
    }

    pub(crate) fn client_with(
        backend: Arc<FakeBackend>,
        session: StoredSession,
    ) -> ApiClient {
        let tokens = Arc::new(TokenStore::new(Box::new(MemoryStorage::new())));
        tokens
            .save(&TokenUpdate {
                access: session.access,
                refresh: session.refresh,
                user: session.user,
            })
            .unwrap();
        ApiClient::new(
            ApiConfig::new("http://localhost:8000/api").unwrap(),
            tokens,
            backend,
        )
    }

    fn session(access: &str, refresh: Option<&str>) -> StoredSession {
        StoredSession {
            access: Some(access.to_string()),
            refresh: refresh.map(str::to_string),
            user: Some(json!({ "id": 1, "username": "ann" })),
        }
    }

    fn record_events(client: &ApiClient) -> Arc<Mutex<Vec<SessionEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        client.add_session_observer(Arc::new(move |event: &SessionEvent| {
            sink.lock().push(event.clone());
        }));
        events
    }

    fn succeed(access: &str) -> RefreshBehavior {
        RefreshBehavior::Succeed {
            access: access.to_string(),
            refresh: None,
        }
    }

    #[test]
    fn test_endpoint_keeps_base_prefix() {
        let config = ApiConfig::new("http://localhost:8000/api").unwrap();
        assert_eq!(
            config.endpoint("/login/").unwrap().as_str(),
            "http://localhost:8000/api/login/"
        );
        assert_eq!(
            config.endpoint("conversation/3/hide-for-me/").unwrap().as_str(),
            "http://localhost:8000/api/conversation/3/hide-for-me/"
        );

        let trailing = ApiConfig::new("https://chat.example.com/api/").unwrap();
        assert_eq!(
            trailing.endpoint("/users/me/").unwrap().as_str(),
            "https://chat.example.com/api/users/me/"
        );
    }

    #[tokio::test]
    async fn test_success_passes_through_with_bearer() {
        let backend = FakeBackend::new("a1", succeed("a2"));
        let client = client_with(backend.clone(), session("a1", Some("r1")));

        let response = client.get("/users/me/").await.unwrap();
        assert_eq!(response.body["token"], "a1");

        let sent = backend.requests_to("/users/me/");
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].bearer.as_deref(), Some("a1"));
        assert_eq!(backend.refresh_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_token_is_not_an_error() {
        let backend = FakeBackend::new("a1", succeed("a2"));
        backend.route("/register/", HttpResponse::new(201, json!({ "id": 9 })));
        let client = client_with(backend.clone(), StoredSession::default());

        let response = client.post("/register/", Some(json!({}))).await.unwrap();
        assert_eq!(response.status, 201);
        assert_eq!(backend.requests_to("/register/")[0].bearer, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_token_refreshes_once_and_replays() {
        let backend = FakeBackend::new("a2", succeed("a2"));
        let client = client_with(backend.clone(), session("a1", Some("r1")));
        let events = record_events(&client);

        let response = client.get("/conversations/").await.unwrap();
        assert_eq!(response.body["token"], "a2");

        assert_eq!(backend.refresh_calls.load(Ordering::SeqCst), 1);
        assert_eq!(backend.refresh_bodies.lock()[0], json!({ "refresh": "r1" }));

        let stored = client.tokens().load();
        assert_eq!(stored.access.as_deref(), Some("a2"));
        assert_eq!(stored.refresh.as_deref(), Some("r1"));
        assert_eq!(stored.user, Some(json!({ "id": 1, "username": "ann" })));

        let sent = backend.requests_to("/conversations/");
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].bearer.as_deref(), Some("a1"));
        assert_eq!(sent[1].bearer.as_deref(), Some("a2"));

        assert_eq!(
            *events.lock(),
            vec![SessionEvent::Refreshed {
                access: "a2".into(),
                refresh: "r1".into()
            }]
        );
        assert!(!client.is_refreshing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_rotates_refresh_token() {
        let backend = FakeBackend::new(
            "a2",
            RefreshBehavior::Succeed {
                access: "a2".into(),
                refresh: Some("r2".into()),
            },
        );
        let client = client_with(backend, session("a1", Some("r1")));

        client.get("/users/me/").await.unwrap();
        assert_eq!(client.tokens().refresh_token().as_deref(), Some("r2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_401s_share_one_refresh() {
        let backend = FakeBackend::new("a2", succeed("a2"));
        let client = client_with(backend.clone(), session("a1", Some("r1")));

        let calls = (0..5).map(|i| {
            let client = client.clone();
            async move { client.get(&format!("/conversations/{}/messages/", i)).await }
        });
        let results = join_all(calls).await;

        assert_eq!(backend.refresh_calls.load(Ordering::SeqCst), 1);
        for result in results {
            assert_eq!(result.unwrap().body["token"], "a2");
        }
        assert_eq!(client.queued_len(), 0);
        assert!(!client.is_refreshing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_failure_rejects_everyone_and_clears_session() {
        let backend = FakeBackend::new(
            "a2",
            RefreshBehavior::Respond(HttpResponse::new(
                400,
                json!({ "detail": "Token is invalid or expired" }),
            )),
        );
        let client = client_with(backend.clone(), session("a1", Some("r1")));
        let events = record_events(&client);

        let calls = (0..4).map(|_| {
            let client = client.clone();
            async move { client.get("/conversations/").await }
        });
        let results = join_all(calls).await;

        assert_eq!(backend.refresh_calls.load(Ordering::SeqCst), 1);
        for result in results {
            match result {
                Err(ApiError::Refresh(RefreshError::Rejected { status, .. })) => {
                    assert_eq!(status, 400)
                }
                other => panic!("unexpected result: {:?}", other),
            }
        }

        assert!(client.tokens().load().is_empty());
        assert_eq!(*events.lock(), vec![SessionEvent::Invalidated]);
        assert!(!client.is_refreshing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_without_access_is_failure() {
        let backend = FakeBackend::new(
            "a2",
            RefreshBehavior::Respond(HttpResponse::new(200, json!({ "refresh": "r2" }))),
        );
        let client = client_with(backend, session("a1", Some("r1")));

        let err = client.get("/users/me/").await.unwrap_err();
        assert!(matches!(
            err,
            ApiError::Refresh(RefreshError::MissingAccessToken)
        ));
        assert!(client.tokens().load().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_network_error_is_failure() {
        let backend = FakeBackend::new("a2", RefreshBehavior::NetworkError);
        let client = client_with(backend, session("a1", Some("r1")));

        let err = client.get("/users/me/").await.unwrap_err();
        assert!(matches!(
            err,
            ApiError::Refresh(RefreshError::Transport(TransportError::Network(_)))
        ));
        assert!(!client.tokens().has_session());
    }

    #[tokio::test]
    async fn test_retried_attempt_is_not_refreshed() {
        let backend = FakeBackend::new("a2", succeed("a2"));
        let client = client_with(backend.clone(), session("a1", Some("r1")));

        let err = client
            .request(RequestAttempt::get("/users/me/").retry())
            .await
            .unwrap_err();

        assert_eq!(err.status(), Some(401));
        assert_eq!(backend.refresh_calls.load(Ordering::SeqCst), 0);
        assert_eq!(client.tokens().access_token().as_deref(), Some("a1"));
    }

    #[tokio::test]
    async fn test_anonymous_401_leaves_session_alone() {
        let backend = FakeBackend::new("a2", succeed("a2"));
        backend.route(
            "/login/",
            HttpResponse::new(401, json!({ "detail": "No active account found" })),
        );
        let client = client_with(backend.clone(), session("a1", Some("r1")));

        let err = client
            .request(RequestAttempt::post("/login/", Some(json!({}))).anonymous())
            .await
            .unwrap_err();

        assert!(err.is_unauthorized());
        assert_eq!(backend.requests_to("/login/")[0].bearer, None);
        assert_eq!(backend.refresh_calls.load(Ordering::SeqCst), 0);
        assert!(client.tokens().has_session());
    }

    #[tokio::test]
    async fn test_401_without_refresh_token_clears_session() {
        let backend = FakeBackend::new("a2", succeed("a2"));
        let client = client_with(backend.clone(), session("a1", None));
        let events = record_events(&client);

        let err = client.get("/users/me/").await.unwrap_err();

        assert!(err.is_unauthorized());
        assert_eq!(backend.refresh_calls.load(Ordering::SeqCst), 0);
        assert!(client.tokens().load().is_empty());
        assert_eq!(*events.lock(), vec![SessionEvent::Invalidated]);
    }

    #[tokio::test]
    async fn test_non_401_failures_pass_through() {
        let backend = FakeBackend::new("a1", succeed("a2"));
        backend.route(
            "/conversations/",
            HttpResponse::new(400, json!({ "detail": "User not found" })),
        );
        let client = client_with(backend.clone(), session("a1", Some("r1")));

        let err = client
            .post("/conversations/", Some(json!({ "username": "ghost" })))
            .await
            .unwrap_err();

        assert_eq!(err.status(), Some(400));
        assert_eq!(err.message(), "User not found");
        assert_eq!(backend.refresh_calls.load(Ordering::SeqCst), 0);
        assert!(client.tokens().has_session());
    }

    #[tokio::test]
    async fn test_network_error_is_not_retried() {
        struct Offline(AtomicUsize);

        #[async_trait]
        impl HttpTransport for Offline {
            async fn execute(&self, _: HttpRequest) -> Result<HttpResponse, TransportError> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Err(TransportError::Network("connection refused".into()))
            }
        }

        let transport = Arc::new(Offline(AtomicUsize::new(0)));
        let tokens = Arc::new(TokenStore::new(Box::new(MemoryStorage::new())));
        let client = ApiClient::new(
            ApiConfig::new("http://localhost:8000/api").unwrap(),
            tokens,
            transport.clone(),
        );

        let err = client.get("/users/me/").await.unwrap_err();
        assert!(matches!(err, ApiError::Network(TransportError::Network(_))));
        assert_eq!(transport.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_refresh_owner_releases_waiters() {
        let backend = FakeBackend::new("a2", RefreshBehavior::Hang);
        let client = client_with(backend.clone(), session("a1", Some("r1")));

        let owner = tokio::spawn({
            let client = client.clone();
            async move { client.get("/conversations/").await }
        });
        backend.refresh_started.notified().await;

        let waiter = tokio::spawn({
            let client = client.clone();
            async move { client.get("/users/me/").await }
        });
        while client.queued_len() == 0 {
            tokio::task::yield_now().await;
        }

        owner.abort();
        let result = waiter.await.unwrap();
        assert!(matches!(
            result,
            Err(ApiError::Refresh(RefreshError::Abandoned))
        ));
        assert!(!client.is_refreshing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_observer_does_not_break_refresh() {
        let backend = FakeBackend::new("a2", succeed("a2"));
        let client = client_with(backend, session("a1", Some("r1")));
        client.add_session_observer(Arc::new(|_: &SessionEvent| panic!("observer bug")));
        let events = record_events(&client);

        let response = client.get("/users/me/").await.unwrap();
        assert_eq!(response.body["token"], "a2");
        assert_eq!(events.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_session_manually() {
        let backend = FakeBackend::new("a2", succeed("a2"));
        let client = client_with(backend.clone(), session("a1", Some("r1")));

        assert_eq!(client.refresh_session().await.unwrap(), "a2");
        assert_eq!(client.tokens().access_token().as_deref(), Some("a2"));

        let empty = client_with(backend, StoredSession::default());
        assert!(matches!(
            empty.refresh_session().await,
            Err(ApiError::Refresh(RefreshError::NoRefreshToken))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_refresh_joins_running_refresh() {
        let backend = FakeBackend::new(
            "a2",
            RefreshBehavior::Succeed {
                access: "a2".into(),
                refresh: Some("r2".into()),
            },
        );
        let client = client_with(backend.clone(), session("a1", Some("r1")));

        let request = tokio::spawn({
            let client = client.clone();
            async move { client.get("/conversations/").await }
        });
        backend.refresh_started.notified().await;
        assert!(client.is_refreshing());

        assert_eq!(client.refresh_session().await.unwrap(), "a2");
        assert_eq!(request.await.unwrap().unwrap().body["token"], "a2");

        // One call, so the rotated-away r1 is never sent twice.
        assert_eq!(backend.refresh_calls.load(Ordering::SeqCst), 1);
        assert_eq!(client.tokens().refresh_token().as_deref(), Some("r2"));
        assert!(!client.is_refreshing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_401_joins_manual_refresh() {
        let backend = FakeBackend::new(
            "a2",
            RefreshBehavior::Respond(HttpResponse::new(
                400,
                json!({ "detail": "Token is blacklisted" }),
            )),
        );
        let client = client_with(backend.clone(), session("a1", Some("r1")));

        let manual = tokio::spawn({
            let client = client.clone();
            async move { client.refresh_session().await }
        });
        backend.refresh_started.notified().await;

        let err = client.get("/users/me/").await.unwrap_err();
        assert!(matches!(
            err,
            ApiError::Refresh(RefreshError::Rejected { status: 400, .. })
        ));
        assert!(matches!(
            manual.await.unwrap(),
            Err(ApiError::Refresh(RefreshError::Rejected { status: 400, .. }))
        ));
        assert_eq!(backend.refresh_calls.load(Ordering::SeqCst), 1);
        assert!(client.tokens().load().is_empty());
    }

    #[tokio::test]
    async fn test_independent_clients_do_not_share_refresh_state() {
        let backend = FakeBackend::new("a2", RefreshBehavior::Hang);
        let first = client_with(backend.clone(), session("a1", Some("r1")));
        let second = client_with(backend, session("a1", Some("r1")));

        let _ = first.admit(RequestAttempt::get("/x/"));
        assert!(first.is_refreshing());
        assert!(!second.is_refreshing());
    }
}
