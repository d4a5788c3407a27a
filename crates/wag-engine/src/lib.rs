//! Engine adapter: the conversational backend's HTTP API.
//!
//! Chat calls replay on 429 (the engine is still busy with an earlier message
//! from the same user); preference calls are single shot.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    Method, StatusCode,
};
use serde::de::DeserializeOwned;

use wag_core::{
    config::Config,
    domain::UserId,
    engine::{
        port::EnginePort,
        types::{ChatRequest, ChatResponse, ProgressOptions, UserPreferences},
    },
    errors::Error,
    retry::{request_with_retry, RetryPolicy, RetryableRequest},
    Result,
};

#[derive(Clone, Debug)]
pub struct EngineClient {
    base_url: String,
    api_key: String,
    org: String,
    policy: RetryPolicy,
    http: reqwest::Client,
}

impl EngineClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        org: impl Into<String>,
        policy: RetryPolicy,
        timeout: std::time::Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            org: org.into(),
            policy,
            http,
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        Self::new(
            cfg.engine_base_url.clone(),
            cfg.engine_api_key.clone(),
            cfg.engine_org.clone(),
            cfg.engine_retry_policy(),
            cfg.engine_timeout,
        )
    }

    fn chat_url(&self) -> String {
        format!("{}/api/v1/chat", self.base_url)
    }

    fn preferences_url(&self, user_id: &UserId) -> String {
        format!(
            "{}/api/v1/orgs/{}/users/{}/preferences",
            self.base_url, self.org, user_id.0
        )
    }

    fn auth_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|e| Error::Config(format!("ENGINE_API_KEY is not a valid header value: {e}")))?;
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        let retryable = RetryableRequest::new(Method::POST, self.chat_url())
            .headers(self.auth_headers()?)
            .json(serde_json::to_value(&request)?);

        let response = request_with_retry(&self.http, &retryable, &self.policy).await?;
        decode(response).await.inspect_err(|e| {
            tracing::error!("engine chat call failed: {e}");
        })
    }
}

/// Map a non-success status to [`Error::Http`], otherwise parse the JSON body.
async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(Error::http(status.as_u16(), &body));
    }
    Ok(serde_json::from_str(&body)?)
}

#[async_trait]
impl EnginePort for EngineClient {
    async fn send_text(
        &self,
        user_id: &UserId,
        message: &str,
        progress: Option<&ProgressOptions>,
    ) -> Result<ChatResponse> {
        self.chat(ChatRequest::text(&user_id.0, message).with_progress(progress))
            .await
    }

    async fn send_audio(
        &self,
        user_id: &UserId,
        audio: &[u8],
        audio_format: &str,
        progress: Option<&ProgressOptions>,
    ) -> Result<ChatResponse> {
        let encoded = STANDARD.encode(audio);
        self.chat(ChatRequest::audio(&user_id.0, encoded, audio_format).with_progress(progress))
            .await
    }

    async fn get_user_preferences(&self, user_id: &UserId) -> Result<UserPreferences> {
        let response = self
            .http
            .get(self.preferences_url(user_id))
            .headers(self.auth_headers()?)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            // Unknown user: nothing stored yet.
            return Ok(UserPreferences::default());
        }
        decode(response).await
    }

    async fn update_user_preferences(
        &self,
        user_id: &UserId,
        preferences: &UserPreferences,
    ) -> Result<UserPreferences> {
        let response = self
            .http
            .put(self.preferences_url(user_id))
            .headers(self.auth_headers()?)
            .json(preferences)
            .send()
            .await?;
        decode(response).await
    }
}
