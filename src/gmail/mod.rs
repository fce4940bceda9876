//! Read-only access to the Gmail REST API.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

use self::credentials::{CredentialBroker, CredentialError};
use self::types::{GmailMessage, GmailMessageList, GmailMessageStub};

pub mod credentials;
pub mod mime;
pub mod types;

const REDACTED_BODY_MAX_LEN: usize = 200;

#[derive(Debug, Error)]
pub enum SourceApiError {
    #[error("gmail api request failed: status={status} body={body}")]
    Status { status: u16, body: String },

    #[error("gmail api transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("decode gmail api response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error(transparent)]
    Credential(#[from] CredentialError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessagePage {
    pub messages: Vec<GmailMessageStub>,
    pub next_page_token: Option<String>,
}

/// A mailbox that can be searched and read. Implementations perform no retry.
#[async_trait]
pub trait MessageSource: Send + Sync {
    async fn list_messages(
        &self,
        user_id: &str,
        query: &str,
        page_size: u32,
        page_token: Option<&str>,
    ) -> Result<MessagePage, SourceApiError>;

    async fn get_message_full(
        &self,
        user_id: &str,
        message_id: &str,
    ) -> Result<GmailMessage, SourceApiError>;
}

pub struct GmailClient {
    client: Client,
    api_base: String,
    broker: Arc<CredentialBroker>,
}

impl GmailClient {
    pub fn new(client: Client, api_base: impl Into<String>, broker: Arc<CredentialBroker>) -> Self {
        Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            broker,
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        user_id: &str,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, SourceApiError> {
        // Fetched per call so a refresh mid-sync is picked up.
        let token = self.broker.valid_access_token(user_id).await?;

        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .header("accept", "application/json")
            .query(query)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(SourceApiError::Status {
                status: status.as_u16(),
                body: redact_response_body(&body),
            });
        }

        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl MessageSource for GmailClient {
    async fn list_messages(
        &self,
        user_id: &str,
        query: &str,
        page_size: u32,
        page_token: Option<&str>,
    ) -> Result<MessagePage, SourceApiError> {
        let url = format!("{}/users/me/messages", self.api_base);
        let mut params = vec![("q", query.to_string()), ("maxResults", page_size.to_string())];
        if let Some(page_token) = page_token {
            params.push(("pageToken", page_token.to_string()));
        }

        let list: GmailMessageList = self.get_json(user_id, &url, &params).await?;
        let page = MessagePage {
            messages: list.messages.unwrap_or_default(),
            next_page_token: list.next_page_token.filter(|token| !token.is_empty()),
        };
        debug!(
            user_id,
            count = page.messages.len(),
            has_next = page.next_page_token.is_some(),
            "listed gmail messages"
        );
        Ok(page)
    }

    async fn get_message_full(
        &self,
        user_id: &str,
        message_id: &str,
    ) -> Result<GmailMessage, SourceApiError> {
        let url = format!("{}/users/me/messages/{message_id}", self.api_base);
        self.get_json(user_id, &url, &[("format", "full".to_string())])
            .await
    }
}

pub(crate) fn redact_response_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.len() <= REDACTED_BODY_MAX_LEN {
        return trimmed.to_string();
    }

    let mut end = REDACTED_BODY_MAX_LEN;
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…[truncated {} bytes]", &trimmed[..end], trimmed.len())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::extract::{Path, Query};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::get;
    use axum::{Json, Router};
    use chrono::Utc;
    use serde_json::{json, Value};

    use super::credentials::{CredentialBroker, CredentialError, RefreshedToken, TokenEndpoint};
    use super::{redact_response_body, GmailClient, MessageSource, SourceApiError};
    use crate::db::models::Credential;
    use crate::db::Database;

    struct NoRefresh;

    #[async_trait]
    impl TokenEndpoint for NoRefresh {
        async fn refresh(&self, _refresh_token: &str) -> Result<RefreshedToken, CredentialError> {
            panic!("refresh should not be needed");
        }
    }

    fn authorized(headers: &HeaderMap) -> bool {
        headers
            .get("authorization")
            .and_then(|value| value.to_str().ok())
            == Some("Bearer live-token")
    }

    async fn list(headers: HeaderMap, Query(params): Query<HashMap<String, String>>) -> (StatusCode, Json<Value>) {
        if !authorized(&headers) {
            return (StatusCode::UNAUTHORIZED, Json(json!({"error": "unauthenticated"})));
        }
        assert_eq!(params.get("maxResults").map(String::as_str), Some("2"));
        assert_eq!(params.get("q").map(String::as_str), Some("from:bac"));

        match params.get("pageToken").map(String::as_str) {
            None => (
                StatusCode::OK,
                Json(json!({
                    "messages": [{"id": "m1", "threadId": "t1"}, {"id": "m2", "threadId": "t2"}],
                    "nextPageToken": "page-2"
                })),
            ),
            Some("page-2") => (StatusCode::OK, Json(json!({"resultSizeEstimate": 0}))),
            Some(_) => (StatusCode::BAD_REQUEST, Json(json!({"error": "bad token"}))),
        }
    }

    async fn message(
        headers: HeaderMap,
        Path(id): Path<String>,
        Query(params): Query<HashMap<String, String>>,
    ) -> (StatusCode, Json<Value>) {
        if !authorized(&headers) {
            return (StatusCode::UNAUTHORIZED, Json(json!({"error": "unauthenticated"})));
        }
        assert_eq!(params.get("format").map(String::as_str), Some("full"));
        if id == "missing" {
            return (StatusCode::NOT_FOUND, Json(json!({"error": {"code": 404}})));
        }
        (
            StatusCode::OK,
            Json(json!({
                "id": id,
                "threadId": "t1",
                "payload": {"mimeType": "text/plain", "body": {"data": "SG9sYQ"}}
            })),
        )
    }

    async fn spawn_fake_gmail() -> String {
        let app = Router::new()
            .route("/gmail/v1/users/me/messages", get(list))
            .route("/gmail/v1/users/me/messages/:id", get(message));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake gmail");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve fake gmail");
        });
        format!("http://{addr}/gmail/v1/")
    }

    fn client(api_base: &str) -> (GmailClient, String) {
        let db = Arc::new(Database::open_in_memory().expect("open db"));
        let user = db.insert_user("ana@example.com").expect("insert user");
        db.upsert_credential(&Credential {
            user_id: user.id.clone(),
            provider: "google".to_string(),
            access_token: "live-token".to_string(),
            refresh_token: None,
            expires_at: Some(Utc::now().timestamp() + 3600),
            updated_at: None,
        })
        .expect("store credential");
        let broker = Arc::new(CredentialBroker::new(db, Arc::new(NoRefresh)));
        (
            GmailClient::new(reqwest::Client::new(), api_base, broker),
            user.id,
        )
    }

    #[tokio::test]
    async fn lists_pages_and_fetches_full_messages() {
        let api_base = spawn_fake_gmail().await;
        let (gmail, user_id) = client(&api_base);

        let first = gmail
            .list_messages(&user_id, "from:bac", 2, None)
            .await
            .expect("first page");
        assert_eq!(first.messages.len(), 2);
        assert_eq!(first.messages[0].id, "m1");
        assert_eq!(first.next_page_token.as_deref(), Some("page-2"));

        let second = gmail
            .list_messages(&user_id, "from:bac", 2, first.next_page_token.as_deref())
            .await
            .expect("second page");
        assert!(second.messages.is_empty());
        assert!(second.next_page_token.is_none());

        let full = gmail.get_message_full(&user_id, "m1").await.expect("message");
        assert_eq!(full.id, "m1");
        assert_eq!(full.thread_id.as_deref(), Some("t1"));
    }

    #[tokio::test]
    async fn non_success_status_carries_status_and_body() {
        let api_base = spawn_fake_gmail().await;
        let (gmail, user_id) = client(&api_base);

        let err = gmail
            .get_message_full(&user_id, "missing")
            .await
            .expect_err("not found");
        match err {
            SourceApiError::Status { status, body } => {
                assert_eq!(status, 404);
                assert!(body.contains("404"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn credential_failures_surface_as_credential_errors() {
        let api_base = spawn_fake_gmail().await;
        let (gmail, _) = client(&api_base);

        let err = gmail
            .list_messages("unknown-user", "from:bac", 2, None)
            .await
            .expect_err("no credential");
        assert!(matches!(
            err,
            SourceApiError::Credential(CredentialError::Missing { .. })
        ));
    }

    #[test]
    fn response_bodies_are_truncated() {
        assert_eq!(redact_response_body("  short  "), "short");

        let long = "é".repeat(150);
        let redacted = redact_response_body(&long);
        assert!(redacted.contains("[truncated 300 bytes]"));
        assert!(redacted.starts_with(&"é".repeat(100)));
    }
}
