//! ==============================================================================
//! network.rs - typed client for the message backend
//! ==============================================================================
//!
//! purpose:
//!     wraps the three REST calls the box needs:
//!     - GET   /api/register?device={id}   -> bearer token
//!     - GET   /api/messages               -> pending message + settings
//!     - PATCH /api/messages/{id}          -> mark as read
//!
//! relationships:
//!     - used by: controller.rs (all three calls)
//!     - used by: actuation.rs (settings refresh while notifying)
//!     - implements: MessageApi (so tests can script the backend)
//!
//! ==============================================================================

use crate::domain::{FetchResponse, PendingMessage, RuntimeSettings, SettingsUpdate, SharedSettings};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use thiserror::Error;

/// everything that can go wrong talking to the backend
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NetworkError {
    /// server rejected the token; the device has to register again
    #[error("server rejected the device token")]
    Unauthenticated,
    /// no token held locally; the device has to register again
    #[error("no device token available")]
    InvalidToken,
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("connection error: {0}")]
    ConnectionError(String),
}

impl NetworkError {
    /// true when the only way forward is a fresh registration
    pub fn requires_registration(&self) -> bool {
        matches!(self, Self::Unauthenticated | Self::InvalidToken)
    }
}

/// backend capability consumed by the controller and the actuation task
#[async_trait]
pub trait MessageApi: Send + Sync {
    /// point the client at a backend and install the stored token
    fn connect(&self, endpoint: &str, token: &str);
    fn set_token(&self, token: &str);
    fn clear_token(&self);

    /// returns `None` for every outcome except a 200 carrying a token
    async fn register_device(&self, hardware_id: &str) -> Option<String>;
    async fn fetch_messages(&self) -> Result<FetchResponse, NetworkError>;
    async fn acknowledge_read(&self, message_id: u64) -> Result<(), NetworkError>;
}

/// fetch, fold the settings block into the shared settings, and return the
/// response together with the settings as they stand after the merge
pub async fn fetch_and_apply(
    api: &dyn MessageApi,
    settings: &SharedSettings,
) -> Result<(FetchResponse, RuntimeSettings), NetworkError> {
    let response = api.fetch_messages().await?;
    let merged = settings.apply(&response.settings).await;
    Ok((response, merged))
}

// ==============================================================================
// reqwest implementation
// ==============================================================================

#[derive(Default)]
struct Session {
    endpoint: String,
    token: String,
}

pub struct NetworkClient {
    http: reqwest::Client,
    session: RwLock<Session>,
}

impl NetworkClient {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        Ok(Self { http, session: RwLock::new(Session::default()) })
    }

    fn url(&self, path: &str) -> String {
        let session = self.session.read().unwrap_or_else(PoisonError::into_inner);
        format!("{}{}", session.endpoint.trim_end_matches('/'), path)
    }

    /// current token, or `InvalidToken` if none is held
    fn bearer(&self) -> Result<String, NetworkError> {
        let session = self.session.read().unwrap_or_else(PoisonError::into_inner);
        if session.token.is_empty() {
            return Err(NetworkError::InvalidToken);
        }
        Ok(format!("Bearer {}", session.token))
    }
}

#[async_trait]
impl MessageApi for NetworkClient {
    fn connect(&self, endpoint: &str, token: &str) {
        let mut session = self.session.write().unwrap_or_else(PoisonError::into_inner);
        session.endpoint = endpoint.to_string();
        session.token = token.to_string();
    }

    fn set_token(&self, token: &str) {
        let mut session = self.session.write().unwrap_or_else(PoisonError::into_inner);
        session.token = token.to_string();
    }

    fn clear_token(&self) {
        self.session.write().unwrap_or_else(PoisonError::into_inner).token.clear();
    }

    async fn register_device(&self, hardware_id: &str) -> Option<String> {
        let response = match self
            .http
            .get(self.url("/api/register"))
            .query(&[("device", hardware_id)])
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("Registration request failed: {}", e);
                return None;
            }
        };

        if response.status() != StatusCode::OK {
            tracing::warn!("Registration returned {}", response.status());
            return None;
        }

        match response.json::<serde_json::Value>().await {
            Ok(body) => body["token"]
                .as_str()
                .filter(|t| !t.is_empty())
                .map(str::to_string),
            Err(e) => {
                tracing::warn!("Registration body unreadable: {}", e);
                None
            }
        }
    }

    async fn fetch_messages(&self) -> Result<FetchResponse, NetworkError> {
        let bearer = self.bearer()?;

        let response = self
            .http
            .get(self.url("/api/messages"))
            .header(AUTHORIZATION, bearer)
            .send()
            .await
            .map_err(|e| NetworkError::ConnectionError(e.to_string()))?;

        match response.status() {
            StatusCode::OK => {
                let body: serde_json::Value = response
                    .json()
                    .await
                    .map_err(|e| NetworkError::InvalidResponse(e.to_string()))?;
                decode_fetch(body)
            }
            StatusCode::UNAUTHORIZED => Err(NetworkError::Unauthenticated),
            other => Err(NetworkError::InvalidResponse(format!("unexpected status {other}"))),
        }
    }

    async fn acknowledge_read(&self, message_id: u64) -> Result<(), NetworkError> {
        if message_id == 0 {
            return Err(NetworkError::InvalidToken);
        }
        let bearer = self.bearer()?;

        self.http
            .patch(self.url(&format!("/api/messages/{message_id}")))
            .header(AUTHORIZATION, bearer)
            .send()
            .await
            .map_err(|e| NetworkError::ConnectionError(e.to_string()))?;

        Ok(())
    }
}

/// split a 200 body into message and settings; both fields are mandatory
fn decode_fetch(body: serde_json::Value) -> Result<FetchResponse, NetworkError> {
    let serde_json::Value::Object(mut fields) = body else {
        return Err(NetworkError::InvalidResponse("expected a JSON object".to_string()));
    };

    let (message, settings) = match (fields.remove("message"), fields.remove("settings")) {
        (Some(m), Some(s)) if !m.is_null() && !s.is_null() => (m, s),
        _ => {
            return Err(NetworkError::InvalidResponse(
                "expected both message and settings".to_string(),
            ))
        }
    };

    let message = PendingMessage::from_wire(message).map_err(NetworkError::InvalidResponse)?;
    let settings: SettingsUpdate = serde_json::from_value(settings)
        .map_err(|e| NetworkError::InvalidResponse(format!("malformed settings: {e}")))?;

    Ok(FetchResponse { message, settings })
}
