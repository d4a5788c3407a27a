//! Inbound message orchestration: engine call, then chunked replies.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::{
    chunking::{chunk_message, combine_chunks},
    config::Config,
    domain::{IncomingMessage, MessageType, UserId},
    engine::{
        port::EnginePort,
        types::{ChatResponse, ProgressOptions},
    },
    errors::Error,
    logging::pseudonymize,
    messaging::port::MessagingPort,
    Result,
};

pub const ERROR_REPLY: &str =
    "Sorry, I encountered an error processing your message. Please try again.";
pub const AUDIO_UNAVAILABLE_REPLY: &str =
    "Voice messages are temporarily unavailable. Please send a text message.";

/// Audio format WhatsApp voice notes arrive in.
const INBOUND_AUDIO_FORMAT: &str = "ogg";

/// The slice of [`Config`] the handler needs.
#[derive(Clone, Debug)]
pub struct HandlerSettings {
    pub chunk_size: usize,
    pub combine_responses: bool,
    pub audio_input_enabled: bool,
    pub progress: Option<ProgressOptions>,
    pub log_pseudonym_secret: Option<String>,
}

impl HandlerSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            chunk_size: cfg.chunk_size,
            combine_responses: cfg.combine_responses,
            audio_input_enabled: cfg.audio_input_enabled,
            progress: cfg.progress_callback_url().map(|callback_url| ProgressOptions {
                callback_url,
                throttle_seconds: cfg.progress_throttle_seconds,
            }),
            log_pseudonym_secret: cfg.log_pseudonym_secret.clone(),
        }
    }
}

pub struct MessageHandler {
    messenger: Arc<dyn MessagingPort>,
    engine: Arc<dyn EnginePort>,
    settings: HandlerSettings,
}

impl MessageHandler {
    pub fn new(
        messenger: Arc<dyn MessagingPort>,
        engine: Arc<dyn EnginePort>,
        settings: HandlerSettings,
    ) -> Self {
        Self {
            messenger,
            engine,
            settings,
        }
    }

    /// Process one accepted message end to end.
    ///
    /// Never fails: engine or platform errors are logged and the user gets
    /// the apology reply instead.
    pub async fn handle_incoming(&self, message: &IncomingMessage) {
        let who = self.who(&message.user_id);
        info!(
            user = %who,
            kind = message.message_type.as_str(),
            "processing message"
        );

        if !self.messenger.send_typing_indicator(&message.message_id).await {
            debug!(user = %who, "typing indicator not sent");
        }

        let result = match message.message_type {
            MessageType::Audio if !self.settings.audio_input_enabled => {
                self.messenger
                    .send_text(&message.user_id, AUDIO_UNAVAILABLE_REPLY)
                    .await;
                return;
            }
            MessageType::Audio => self.forward_audio(message).await,
            _ => {
                self.engine
                    .send_text(
                        &message.user_id,
                        &message.text,
                        self.settings.progress.as_ref(),
                    )
                    .await
            }
        };

        match result {
            Ok(response) => {
                self.send_responses(&message.user_id, &response).await;
            }
            Err(e) => {
                error!(user = %who, "error processing message: {e}");
                self.messenger
                    .send_text(&message.user_id, ERROR_REPLY)
                    .await;
            }
        }
    }

    async fn forward_audio(&self, message: &IncomingMessage) -> Result<ChatResponse> {
        let media_id = message
            .media_id
            .as_ref()
            .ok_or_else(|| Error::External("audio message without media id".to_string()))?;
        let audio = self
            .messenger
            .download_media(media_id)
            .await
            .ok_or_else(|| Error::External(format!("failed to download media {}", media_id.0)))?;

        self.engine
            .send_audio(
                &message.user_id,
                &audio,
                INBOUND_AUDIO_FORMAT,
                self.settings.progress.as_ref(),
            )
            .await
    }

    /// Deliver an engine response: the voice reply when it goes through,
    /// otherwise every text response split into WhatsApp-sized chunks.
    ///
    /// Returns `true` when everything attempted was delivered.
    pub async fn send_responses(&self, user_id: &UserId, response: &ChatResponse) -> bool {
        let who = self.who(user_id);

        if let Some(audio) = response.voice_audio_base64.as_deref() {
            if self.messenger.send_audio(user_id, audio).await {
                info!(user = %who, "sent voice response");
                return true;
            }
            warn!(user = %who, "voice response failed, falling back to text");
        }

        if response.responses.is_empty() {
            warn!(user = %who, "engine returned no responses");
            return true;
        }

        let mut all_sent = true;
        for text in &response.responses {
            for chunk in self.outgoing_chunks(text) {
                if !self.messenger.send_text(user_id, &chunk).await {
                    error!(user = %who, "failed to send response chunk");
                    all_sent = false;
                }
            }
        }
        all_sent
    }

    /// Forward an engine progress update to the user unchanged.
    pub async fn send_progress(&self, user_id: &UserId, text: &str) -> bool {
        let sent = self.messenger.send_text(user_id, text).await;
        if !sent {
            warn!(user = %self.who(user_id), "failed to send progress update");
        }
        sent
    }

    fn outgoing_chunks(&self, text: &str) -> Vec<String> {
        let chunks = chunk_message(text, self.settings.chunk_size);
        if self.settings.combine_responses {
            combine_chunks(&chunks, self.settings.chunk_size)
        } else {
            chunks
        }
    }

    fn who(&self, user_id: &UserId) -> String {
        pseudonymize(self.settings.log_pseudonym_secret.as_deref(), &user_id.0)
    }
}
