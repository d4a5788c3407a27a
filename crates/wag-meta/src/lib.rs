//! Meta adapter: WhatsApp Cloud (Graph) API client and the webhook server.
//!
//! This crate implements the `wag-core` MessagingPort over the Graph API.

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{json, Value};

pub mod handlers;
pub mod router;

use wag_core::{
    config::Config,
    domain::{MediaId, MessageId, UserId},
    errors::Error,
    messaging::port::MessagingPort,
    Result,
};

const UPLOAD_FILE_NAME: &str = "gateway_audio.mp3";
const UPLOAD_MIME: &str = "audio/mpeg";

#[derive(Clone, Debug)]
pub struct MetaMessenger {
    base_url: String,
    token: String,
    phone_number_id: String,
    http: reqwest::Client,
}

impl MetaMessenger {
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        phone_number_id: impl Into<String>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            phone_number_id: phone_number_id.into(),
            http,
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        Self::new(
            cfg.meta_api_base_url.clone(),
            cfg.meta_whatsapp_token.clone(),
            cfg.meta_phone_number_id.clone(),
        )
    }

    fn messages_url(&self) -> String {
        format!("{}/{}/messages", self.base_url, self.phone_number_id)
    }

    fn media_upload_url(&self) -> String {
        format!("{}/{}/media", self.base_url, self.phone_number_id)
    }

    async fn post_message(&self, payload: &Value) -> Result<()> {
        let resp = self
            .http
            .post(self.messages_url())
            .bearer_auth(&self.token)
            .json(payload)
            .send()
            .await?;
        ensure_ok(resp).await?;
        Ok(())
    }

    /// Upload MP3 bytes and return the media id Meta assigned.
    async fn upload_audio(&self, audio: Vec<u8>) -> Result<String> {
        let part = reqwest::multipart::Part::bytes(audio)
            .file_name(UPLOAD_FILE_NAME)
            .mime_str(UPLOAD_MIME)
            .map_err(|e| Error::External(format!("meta multipart error: {e}")))?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("messaging_product", "whatsapp");

        let resp = self
            .http
            .post(self.media_upload_url())
            .bearer_auth(&self.token)
            .multipart(form)
            .send()
            .await?;
        let v: Value = ensure_ok(resp).await?.json().await?;

        v.get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .ok_or_else(|| Error::External("upload response contained no media id".to_string()))
    }

    async fn try_send_audio(&self, user_id: &UserId, audio_base64: &str) -> Result<()> {
        let audio = STANDARD
            .decode(audio_base64.trim())
            .map_err(|e| Error::External(format!("invalid audio base64: {e}")))?;
        let media_id = self.upload_audio(audio).await?;
        tracing::info!("uploaded media, id: {media_id}");

        self.post_message(&json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": user_id.0,
            "type": "audio",
            "audio": {"id": media_id},
        }))
        .await
    }

    async fn try_download_media(&self, media_id: &MediaId) -> Result<Vec<u8>> {
        let resp = self
            .http
            .get(format!("{}/{}", self.base_url, media_id.0))
            .bearer_auth(&self.token)
            .send()
            .await?;
        let meta: Value = ensure_ok(resp).await?.json().await?;

        let url = meta
            .get("url")
            .and_then(Value::as_str)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| Error::External("no url in media metadata".to_string()))?;

        let resp = self
            .http
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await?;
        let bytes = ensure_ok(resp).await?.bytes().await?;
        Ok(bytes.to_vec())
    }
}

/// Meta reports failure with any status of 400 and above.
async fn ensure_ok(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status().as_u16();
    if status >= 400 {
        let body = resp.text().await.unwrap_or_default();
        return Err(Error::http(status, &body));
    }
    Ok(resp)
}

#[async_trait]
impl MessagingPort for MetaMessenger {
    async fn send_text(&self, user_id: &UserId, text: &str) -> bool {
        let payload = json!({
            "messaging_product": "whatsapp",
            "to": user_id.0,
            "type": "text",
            "text": {"body": text},
        });
        match self.post_message(&payload).await {
            Ok(()) => {
                tracing::info!("sent text message");
                true
            }
            Err(e) => {
                tracing::error!("failed to send meta message: {e}");
                false
            }
        }
    }

    async fn send_audio(&self, user_id: &UserId, audio_base64: &str) -> bool {
        match self.try_send_audio(user_id, audio_base64).await {
            Ok(()) => {
                tracing::info!("sent audio message");
                true
            }
            Err(e) => {
                tracing::error!("failed to send audio message: {e}");
                false
            }
        }
    }

    async fn send_typing_indicator(&self, message_id: &MessageId) -> bool {
        let payload = json!({
            "messaging_product": "whatsapp",
            "status": "read",
            "message_id": message_id.0,
            "typing_indicator": {"type": "text"},
        });
        match self.post_message(&payload).await {
            Ok(()) => {
                tracing::debug!("sent typing indicator for message {}", message_id.0);
                true
            }
            Err(e) => {
                tracing::error!("failed to send typing indicator: {e}");
                false
            }
        }
    }

    async fn download_media(&self, media_id: &MediaId) -> Option<Vec<u8>> {
        self.try_download_media(media_id)
            .await
            .inspect_err(|e| tracing::error!("failed to download media {}: {e}", media_id.0))
            .ok()
    }
}
