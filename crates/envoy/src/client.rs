use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;

use lina_shared::auth::{Credentials, RefreshRequest};
use lina_shared::envelope::{parse_error, unwrap_envelope};
use lina_shared::messages::{MessagePage, SendMessageRequest, SendMessageResponse};
use lina_shared::{ErrorBody, Session};

use crate::connectivity::ReachabilityProbe;
use crate::error::ClientError;
use crate::session::{SessionHandle, SessionRefresher};

#[derive(Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
    session: SessionHandle,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, session: SessionHandle) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            session,
        }
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn sign_up(&self, email: &str, password: &str) -> Result<Session, ClientError> {
        self.authenticate("/auth/signup", email, password).await
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session, ClientError> {
        self.authenticate("/auth/signin", email, password).await
    }

    async fn authenticate(&self, path: &str, email: &str, password: &str) -> Result<Session, ClientError> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(ClientError::Validation("Email and password are required".into()));
        }

        let request = self.client.post(self.url(path)).json(&Credentials {
            email: email.to_string(),
            password: password.to_string(),
        });
        let session: Session = decode(request.send().await?).await?;

        self.session.set(session.clone()).await?;
        tracing::info!(user_id = %session.user_id, "Signed in");
        Ok(session)
    }

    pub async fn sign_out(&self) -> Result<(), ClientError> {
        self.session.clear().await
    }

    /// Exchange `refresh_token` for a new session. Does not store it.
    pub async fn refresh_session(&self, refresh_token: &str) -> Result<Session, ClientError> {
        let request = self.client.post(self.url("/auth/refresh")).json(&RefreshRequest {
            refresh_token: refresh_token.to_string(),
        });
        decode(request.send().await?).await
    }

    pub async fn list_messages(&self, limit: u32, offset: u32) -> Result<MessagePage, ClientError> {
        self.authorized(|| {
            self.client
                .get(self.url("/messages"))
                .query(&[("limit", limit), ("offset", offset)])
        })
        .await
    }

    pub async fn send_message(
        &self,
        content: &str,
        idempotency_key: &str,
    ) -> Result<SendMessageResponse, ClientError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ClientError::Validation("Message cannot be empty".into()));
        }

        let body = SendMessageRequest {
            content: content.to_string(),
            idempotency_key: Some(idempotency_key.to_string()),
        };
        self.authorized(|| self.client.post(self.url("/messages")).json(&body))
            .await
    }

    pub async fn health(&self) -> Result<(), ClientError> {
        let response = self
            .client
            .get(self.url("/"))
            .timeout(Duration::from_secs(5))
            .send()
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(error_from_response(response).await)
        }
    }

    /// Send with the bearer token. On a 401, wait for any running refresh
    /// and replay once with the current token: either one that rotated while
    /// the request was in flight, or a fresh one if the session expired.
    async fn authorized<T, B>(&self, build: B) -> Result<T, ClientError>
    where
        T: DeserializeOwned,
        B: Fn() -> RequestBuilder,
    {
        let token = self.session.access_token().await.ok_or(ClientError::NotSignedIn)?;

        let (code, message) = match decode(build().bearer_auth(&token).send().await?).await {
            Err(ClientError::Unauthorized { code, message }) => (code, message),
            other => return other,
        };

        let refreshing = self.session.begin_refresh().await;
        let current = self.session.get().await.ok_or(ClientError::NotSignedIn)?;
        let replay_token = if current.access_token != token {
            current.access_token
        } else if code == "SESSION_EXPIRED" {
            let fresh = self.refresh_session(&current.refresh_token).await?;
            self.session.set(fresh.clone()).await?;
            fresh.access_token
        } else {
            return Err(ClientError::Unauthorized { code, message });
        };
        drop(refreshing);

        tracing::debug!("Replaying request with current session");
        decode(build().bearer_auth(&replay_token).send().await?).await
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    if !response.status().is_success() {
        return Err(error_from_response(response).await);
    }

    let value: Value = response.json().await?;
    let data = unwrap_envelope(value).map_err(|body| ClientError::Decode(body.message))?;
    Ok(serde_json::from_value(data)?)
}

async fn error_from_response(response: Response) -> ClientError {
    let status = response.status();
    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs);

    let body = match response.json::<Value>().await {
        Ok(Value::Object(mut map)) if map.contains_key("error") => parse_error(map.remove("error")),
        _ => ErrorBody {
            code: format!("HTTP_{}", status.as_u16()),
            message: status.canonical_reason().unwrap_or("Request failed").to_string(),
        },
    };

    let retry_after = retry_after.filter(|_| status == StatusCode::TOO_MANY_REQUESTS);
    ClientError::from_status(status.as_u16(), body, retry_after)
}

#[async_trait]
impl SessionRefresher for ApiClient {
    async fn refresh(&self, session: &Session) -> Result<Session, ClientError> {
        self.refresh_session(&session.refresh_token).await
    }
}

#[async_trait]
impl ReachabilityProbe for ApiClient {
    async fn is_reachable(&self) -> bool {
        self.health().await.is_ok()
    }
}
