use async_trait::async_trait;

use crate::domain::{MediaId, MessageId, UserId};

/// Hexagonal port for the messaging platform.
///
/// Implementations report failure as `false` / `None` and log the cause; the
/// message handler decides what the user sees.
#[async_trait]
pub trait MessagingPort: Send + Sync {
    async fn send_text(&self, user_id: &UserId, text: &str) -> bool;

    /// Send a voice reply given as base64-encoded MP3.
    async fn send_audio(&self, user_id: &UserId, audio_base64: &str) -> bool;

    /// Mark the message read and show the typing indicator.
    async fn send_typing_indicator(&self, message_id: &MessageId) -> bool;

    async fn download_media(&self, media_id: &MediaId) -> Option<Vec<u8>>;
}
