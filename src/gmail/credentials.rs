//! Per-user OAuth access tokens with on-demand refresh.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::redact_response_body;
use super::types::OAuthTokenResponse;
use crate::db::{Database, DbError};

/// Tokens expiring within this window are refreshed before use.
pub const REFRESH_SKEW_SECONDS: i64 = 60;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("no credential stored for user {user_id}")]
    Missing { user_id: String },

    #[error("re-authentication required for user {user_id}: token expired and no refresh token is stored")]
    ReauthenticationRequired { user_id: String },

    #[error("oauth token refresh failed: status={status} body={body}")]
    RefreshRejected { status: u16, body: String },

    #[error("oauth client is not configured: {0}")]
    NotConfigured(&'static str),

    #[error("oauth token request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("decode oauth token response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("credential storage: {0}")]
    Storage(#[from] DbError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshedToken {
    pub access_token: String,
    pub expires_in: u64,
}

/// Exchanges a refresh token for a new access token.
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshedToken, CredentialError>;
}

#[derive(Debug, Clone)]
pub struct GoogleTokenEndpoint {
    client: Client,
    token_url: String,
    client_id: Option<String>,
    client_secret: Option<String>,
}

impl GoogleTokenEndpoint {
    pub fn new(
        client: Client,
        token_url: impl Into<String>,
        client_id: Option<String>,
        client_secret: Option<String>,
    ) -> Self {
        Self {
            client,
            token_url: token_url.into(),
            client_id,
            client_secret,
        }
    }
}

#[async_trait]
impl TokenEndpoint for GoogleTokenEndpoint {
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshedToken, CredentialError> {
        let client_id = self
            .client_id
            .as_deref()
            .ok_or(CredentialError::NotConfigured("VOUCH_GOOGLE_CLIENT_ID is not set"))?;
        let client_secret = self
            .client_secret
            .as_deref()
            .ok_or(CredentialError::NotConfigured("VOUCH_GOOGLE_CLIENT_SECRET is not set"))?;

        let response = self
            .client
            .post(&self.token_url)
            .form(&[
                ("client_id", client_id),
                ("client_secret", client_secret),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(CredentialError::RefreshRejected {
                status: status.as_u16(),
                body: redact_response_body(&body),
            });
        }

        let payload: OAuthTokenResponse = serde_json::from_str(&body)?;
        Ok(RefreshedToken {
            access_token: payload.access_token,
            expires_in: payload.expires_in,
        })
    }
}

/// Hands out usable access tokens, refreshing through a [`TokenEndpoint`]
/// when the stored one is about to expire. Refreshes for the same user are
/// serialized so a slower refresh never overwrites a newer token.
pub struct CredentialBroker {
    db: Arc<Database>,
    endpoint: Arc<dyn TokenEndpoint>,
    /// One refresh lock per user id, kept for the broker's lifetime.
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl CredentialBroker {
    pub fn new(db: Arc<Database>, endpoint: Arc<dyn TokenEndpoint>) -> Self {
        Self {
            db,
            endpoint,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub async fn valid_access_token(&self, user_id: &str) -> Result<String, CredentialError> {
        let user_lock = {
            let mut locks = self.locks.lock().await;
            locks.entry(user_id.to_string()).or_default().clone()
        };
        let _guard = user_lock.lock().await;

        let credential = self
            .db
            .get_credential(user_id)?
            .ok_or_else(|| CredentialError::Missing {
                user_id: user_id.to_string(),
            })?;

        if !needs_refresh(credential.expires_at, Utc::now().timestamp()) {
            return Ok(credential.access_token);
        }

        let refresh_token = credential
            .refresh_token
            .filter(|token| !token.trim().is_empty())
            .ok_or_else(|| CredentialError::ReauthenticationRequired {
                user_id: user_id.to_string(),
            })?;

        debug!(user_id, expires_at = ?credential.expires_at, "access token expiring, refreshing");
        let refreshed = self.endpoint.refresh(&refresh_token).await?;
        let expires_in = i64::try_from(refreshed.expires_in).unwrap_or(i64::MAX);
        let expires_at = Utc::now().timestamp().saturating_add(expires_in);

        self.db
            .update_access_token(user_id, &refreshed.access_token, expires_at)?;
        info!(user_id, expires_at, "access token refreshed");

        Ok(refreshed.access_token)
    }
}

/// Unknown expiry means the token is used as-is.
pub fn needs_refresh(expires_at: Option<i64>, now: i64) -> bool {
    match expires_at {
        Some(expires_at) => expires_at - now <= REFRESH_SKEW_SECONDS,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;

    use super::{needs_refresh, CredentialBroker, CredentialError, RefreshedToken, TokenEndpoint};
    use crate::db::models::Credential;
    use crate::db::Database;

    #[derive(Default)]
    struct FakeEndpoint {
        calls: AtomicUsize,
        reject: bool,
    }

    #[async_trait]
    impl TokenEndpoint for FakeEndpoint {
        async fn refresh(&self, refresh_token: &str) -> Result<RefreshedToken, CredentialError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(Duration::from_millis(10)).await;
            if self.reject {
                return Err(CredentialError::RefreshRejected {
                    status: 400,
                    body: r#"{"error":"invalid_grant"}"#.to_string(),
                });
            }
            Ok(RefreshedToken {
                access_token: format!("fresh-{call}-{refresh_token}"),
                expires_in: 3600,
            })
        }
    }

    fn setup(
        access_token: &str,
        refresh_token: Option<&str>,
        expires_at: Option<i64>,
        endpoint: Arc<FakeEndpoint>,
    ) -> (Arc<Database>, CredentialBroker, String) {
        let db = Arc::new(Database::open_in_memory().expect("open db"));
        let user = db.insert_user("ana@example.com").expect("insert user");
        db.upsert_credential(&Credential {
            user_id: user.id.clone(),
            provider: "google".to_string(),
            access_token: access_token.to_string(),
            refresh_token: refresh_token.map(str::to_string),
            expires_at,
            updated_at: None,
        })
        .expect("store credential");
        let broker = CredentialBroker::new(db.clone(), endpoint);
        (db, broker, user.id)
    }

    #[test]
    fn refresh_window() {
        assert!(!needs_refresh(None, 1_000));
        assert!(!needs_refresh(Some(1_061), 1_000));
        assert!(needs_refresh(Some(1_060), 1_000));
        assert!(needs_refresh(Some(900), 1_000));
    }

    #[tokio::test]
    async fn fresh_token_is_returned_unchanged() {
        let endpoint = Arc::new(FakeEndpoint::default());
        let expires_at = Utc::now().timestamp() + 3600;
        let (_db, broker, user_id) =
            setup("current", Some("refresh"), Some(expires_at), endpoint.clone());

        let token = broker.valid_access_token(&user_id).await.expect("token");
        assert_eq!(token, "current");
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unknown_expiry_is_used_as_is() {
        let endpoint = Arc::new(FakeEndpoint::default());
        let (_db, broker, user_id) = setup("current", None, None, endpoint.clone());

        let token = broker.valid_access_token(&user_id).await.expect("token");
        assert_eq!(token, "current");
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn expiring_token_is_refreshed_and_persisted() {
        let endpoint = Arc::new(FakeEndpoint::default());
        let expires_at = Utc::now().timestamp() + 30;
        let (db, broker, user_id) =
            setup("stale", Some("refresh"), Some(expires_at), endpoint.clone());

        let token = broker.valid_access_token(&user_id).await.expect("token");
        assert_eq!(token, "fresh-1-refresh");

        let stored = db
            .get_credential(&user_id)
            .expect("load credential")
            .expect("credential exists");
        assert_eq!(stored.access_token, "fresh-1-refresh");
        assert_eq!(stored.refresh_token.as_deref(), Some("refresh"));
        let new_expiry = stored.expires_at.expect("expiry");
        assert!(new_expiry >= Utc::now().timestamp() + 3500);
    }

    #[tokio::test]
    async fn concurrent_refreshes_for_one_user_are_serialized() {
        let endpoint = Arc::new(FakeEndpoint::default());
        let expired = Utc::now().timestamp() - 10;
        let (_db, broker, user_id) =
            setup("stale", Some("refresh"), Some(expired), endpoint.clone());

        let (first, second) = tokio::join!(
            broker.valid_access_token(&user_id),
            broker.valid_access_token(&user_id)
        );
        assert_eq!(first.expect("first"), "fresh-1-refresh");
        assert_eq!(second.expect("second"), "fresh-1-refresh");
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_credential_is_an_error() {
        let db = Arc::new(Database::open_in_memory().expect("open db"));
        let user = db.insert_user("nobody@example.com").expect("insert user");
        let broker = CredentialBroker::new(db, Arc::new(FakeEndpoint::default()));

        let err = broker
            .valid_access_token(&user.id)
            .await
            .expect_err("no credential");
        assert!(matches!(err, CredentialError::Missing { .. }));
    }

    #[tokio::test]
    async fn expired_token_without_refresh_token_requires_reauthentication() {
        let endpoint = Arc::new(FakeEndpoint::default());
        let expired = Utc::now().timestamp() - 10;
        let (_db, broker, user_id) = setup("stale", None, Some(expired), endpoint.clone());

        let err = broker
            .valid_access_token(&user_id)
            .await
            .expect_err("reauth required");
        assert!(matches!(err, CredentialError::ReauthenticationRequired { .. }));
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn provider_rejection_propagates_with_body() {
        let endpoint = Arc::new(FakeEndpoint {
            reject: true,
            ..FakeEndpoint::default()
        });
        let expired = Utc::now().timestamp() - 10;
        let (db, broker, user_id) = setup("stale", Some("revoked"), Some(expired), endpoint);

        let err = broker
            .valid_access_token(&user_id)
            .await
            .expect_err("refresh rejected");
        match err {
            CredentialError::RefreshRejected { status, body } => {
                assert_eq!(status, 400);
                assert!(body.contains("invalid_grant"));
            }
            other => panic!("unexpected error: {other}"),
        }

        let stored = db
            .get_credential(&user_id)
            .expect("load credential")
            .expect("credential exists");
        assert_eq!(stored.access_token, "stale");
    }
}
