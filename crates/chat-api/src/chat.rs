//! Conversation, message and user-search endpoints.

use crate::models::{Ack, Conversation, Message, MessagePage, User, UserSummary};
use crate::{ApiClient, ApiError, ApiResult, RequestAttempt};
use parking_lot::Mutex;
use serde_json::json;
use tokio::task::AbortHandle;
use tracing::debug;

/// Queries shorter than this (after trimming) are not sent.
pub const MIN_SEARCH_LENGTH: usize = 3;

/// Typed wrappers around the chat REST endpoints.
#[derive(Clone)]
pub struct ChatService {
    api: ApiClient,
}

impl ChatService {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    /// Conversations the current user takes part in.
    pub async fn conversations(&self) -> ApiResult<Vec<Conversation>> {
        self.api.get_json("/conversations/").await
    }

    /// Open (or reuse) the private conversation with `username`.
    pub async fn start_conversation(&self, username: &str) -> ApiResult<Conversation> {
        let username = username.trim();
        if username.is_empty() {
            return Err(ApiError::InvalidInput("username is required".into()));
        }
        self.api
            .post_json("/conversations/", &json!({ "username": username }))
            .await
    }

    pub async fn messages(&self, conversation_id: i64) -> ApiResult<Vec<Message>> {
        let page: MessagePage = self
            .api
            .get_json(&format!("/conversations/{}/messages/", conversation_id))
            .await?;
        Ok(page.messages)
    }

    pub async fn send_message(&self, conversation_id: i64, text: &str) -> ApiResult<Message> {
        if text.trim().is_empty() {
            return Err(ApiError::InvalidInput("message must not be empty".into()));
        }
        self.api
            .post_json(
                &format!("/conversations/{}/messages/", conversation_id),
                &json!({ "content": text }),
            )
            .await
    }

    pub async fn mark_read(&self, conversation_id: i64) -> ApiResult<()> {
        self.api
            .post(&format!("/conversations/{}/mark_read/", conversation_id), None)
            .await?;
        Ok(())
    }

    /// `GET /users/{id}/`
    pub async fn user(&self, user_id: i64) -> ApiResult<User> {
        self.api.get_json(&format!("/users/{}/", user_id)).await
    }

    /// Raw search; see [`UserSearch`] for search-as-you-type.
    pub async fn search_users(&self, query: &str) -> ApiResult<Vec<UserSummary>> {
        let response = self
            .api
            .request(RequestAttempt::get("/users/search/").with_query("query", query))
            .await?;
        Ok(response.json()?)
    }

    /// Hide one message for the current user only.
    pub async fn delete_message_for_me(&self, message_id: i64) -> ApiResult<bool> {
        let response = self
            .api
            .post(&format!("/message/{}/delete-for-me/", message_id), None)
            .await?;
        Ok(response.json::<Ack>()?.ok)
    }

    /// Hide a whole conversation for the current user only.
    pub async fn hide_conversation(&self, conversation_id: i64) -> ApiResult<bool> {
        let response = self
            .api
            .post(&format!("/conversation/{}/hide-for-me/", conversation_id), None)
            .await?;
        Ok(response.json::<Ack>()?.ok)
    }
}

/// Search-as-you-type helper: each call supersedes the previous one.
///
/// A superseded search resolves to [`ApiError::Cancelled`].
pub struct UserSearch {
    chat: ChatService,
    current: Mutex<Option<AbortHandle>>,
}

impl UserSearch {
    pub fn new(chat: ChatService) -> Self {
        Self {
            chat,
            current: Mutex::new(None),
        }
    }

    pub async fn search(&self, query: &str) -> ApiResult<Vec<UserSummary>> {
        let trimmed = query.trim().to_string();
        if trimmed.chars().count() < MIN_SEARCH_LENGTH {
            self.cancel();
            return Ok(Vec::new());
        }

        let chat = self.chat.clone();
        let task = tokio::spawn(async move { chat.search_users(&trimmed).await });
        self.supersede(Some(task.abort_handle()));

        match task.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(ApiError::Cancelled),
            Err(e) => std::panic::resume_unwind(e.into_panic()),
        }
    }

    /// Abort the in-flight search, if any.
    pub fn cancel(&self) {
        self.supersede(None);
    }

    // Swap and abort under one lock so two racing searches cannot both
    // survive.
    fn supersede(&self, next: Option<AbortHandle>) {
        let mut current = self.current.lock();
        if let Some(previous) = std::mem::replace(&mut *current, next) {
            if !previous.is_finished() {
                debug!("superseding in-flight user search");
            }
            previous.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::tests::{client_with, FakeBackend, RefreshBehavior};
    use crate::HttpResponse;
    use chat_storage::StoredSession;
    use serde_json::Value;
    use std::sync::Arc;

    fn user(id: i64, username: &str) -> Value {
        json!({ "id": id, "username": username, "first_name": "", "last_name": "", "is_online": false })
    }

    fn service() -> (ChatService, Arc<FakeBackend>) {
        let backend = FakeBackend::new(
            "a1",
            RefreshBehavior::Succeed {
                access: "a2".into(),
                refresh: None,
            },
        );
        let session = StoredSession {
            access: Some("a1".into()),
            refresh: Some("r1".into()),
            user: None,
        };
        (ChatService::new(client_with(backend.clone(), session)), backend)
    }

    #[tokio::test]
    async fn test_messages_unwraps_page() {
        let (chat, backend) = service();
        backend.route(
            "/conversations/3/messages/",
            HttpResponse::new(
                200,
                json!({
                    "ok": true,
                    "messages": [{
                        "id": 1,
                        "conversation": 3,
                        "sender": user(2, "bo"),
                        "content": "hello",
                        "timestamp": "2025-03-01T10:05:00Z"
                    }]
                }),
            ),
        );

        let messages = chat.messages(3).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].sender.username, "bo");
    }

    #[tokio::test]
    async fn test_start_conversation_sends_username() {
        let (chat, backend) = service();
        backend.route(
            "/conversations/",
            HttpResponse::new(
                201,
                json!({
                    "id": 4,
                    "slug": "prv_1_2",
                    "type": "private",
                    "participants": [user(1, "ann"), user(2, "bo")],
                    "messages": []
                }),
            ),
        );

        let conversation = chat.start_conversation(" bo ").await.unwrap();
        assert_eq!(conversation.id, 4);
        assert_eq!(
            backend.requests_to("/conversations/")[0].body,
            Some(json!({ "username": "bo" }))
        );

        assert!(matches!(
            chat.start_conversation("  ").await,
            Err(ApiError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_send_and_housekeeping_paths() {
        let (chat, backend) = service();
        backend.route(
            "/conversations/3/messages/",
            HttpResponse::new(
                201,
                json!({
                    "id": 11,
                    "conversation": 3,
                    "sender": user(1, "ann"),
                    "content": "hi",
                    "timestamp": "2025-03-01T10:06:00Z"
                }),
            ),
        );
        backend.route("/conversations/3/mark_read/", HttpResponse::new(200, json!({ "ok": true })));
        backend.route("/message/11/delete-for-me/", HttpResponse::new(200, json!({ "ok": true })));
        backend.route("/conversation/3/hide-for-me/", HttpResponse::new(200, json!({ "ok": true })));

        let sent = chat.send_message(3, "hi").await.unwrap();
        assert_eq!(sent.id, 11);
        assert_eq!(
            backend.requests_to("/conversations/3/messages/")[0].body,
            Some(json!({ "content": "hi" }))
        );

        chat.mark_read(3).await.unwrap();
        assert!(chat.delete_message_for_me(11).await.unwrap());
        assert!(chat.hide_conversation(3).await.unwrap());

        assert!(matches!(
            chat.send_message(3, "   ").await,
            Err(ApiError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_search_query_parameter() {
        let (chat, backend) = service();
        backend.route(
            "/users/search/",
            HttpResponse::new(200, json!([{ "id": 2, "username": "bob" }])),
        );

        let found = chat.search_users("bob").await.unwrap();
        assert_eq!(found, vec![UserSummary { id: 2, username: "bob".into() }]);

        let sent = &backend.requests_to("/users/search/")[0];
        assert_eq!(sent.query, vec![("query".to_string(), "bob".to_string())]);
    }

    #[tokio::test]
    async fn test_short_queries_are_not_sent() {
        let (chat, backend) = service();
        let search = UserSearch::new(chat);

        assert!(search.search("  bo ").await.unwrap().is_empty());
        assert!(search.search("").await.unwrap().is_empty());
        assert!(backend.requests_to("/users/search/").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_search_cancels_previous() {
        // The stale token sends the first search through a slow refresh, so
        // it is still in flight when the second one starts.
        let backend = FakeBackend::new(
            "a2",
            RefreshBehavior::Succeed {
                access: "a2".into(),
                refresh: None,
            },
        );
        let session = StoredSession {
            access: Some("expired".into()),
            refresh: Some("r1".into()),
            user: None,
        };
        let chat = ChatService::new(client_with(backend.clone(), session));
        let search = Arc::new(UserSearch::new(chat));

        let first = tokio::spawn({
            let search = search.clone();
            async move { search.search("bob").await }
        });
        backend.refresh_started.notified().await;

        // A short query still supersedes the pending one.
        assert!(search.search("bo").await.unwrap().is_empty());

        assert!(matches!(first.await.unwrap(), Err(ApiError::Cancelled)));
    }

    #[tokio::test]
    async fn test_supersede_keeps_only_latest_handle() {
        let (chat, _backend) = service();
        let search = UserSearch::new(chat);

        let older = tokio::spawn(std::future::pending::<()>());
        let newer = tokio::spawn(std::future::pending::<()>());
        search.supersede(Some(older.abort_handle()));
        search.supersede(Some(newer.abort_handle()));

        assert!(older.await.unwrap_err().is_cancelled());
        assert!(search.current.lock().is_some());

        search.cancel();
        assert!(search.current.lock().is_none());
        assert!(newer.await.unwrap_err().is_cancelled());
    }
}
