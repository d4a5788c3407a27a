use async_trait::async_trait;

use crate::{
    domain::UserId,
    engine::types::{ChatResponse, ProgressOptions, UserPreferences},
    Result,
};

/// Hexagonal port for the conversational engine.
///
/// The HTTP implementation lives in `wag-engine`; tests use in-memory fakes.
#[async_trait]
pub trait EnginePort: Send + Sync {
    async fn send_text(
        &self,
        user_id: &UserId,
        message: &str,
        progress: Option<&ProgressOptions>,
    ) -> Result<ChatResponse>;

    /// Send raw audio; the engine transcribes it and answers as for text.
    async fn send_audio(
        &self,
        user_id: &UserId,
        audio: &[u8],
        audio_format: &str,
        progress: Option<&ProgressOptions>,
    ) -> Result<ChatResponse>;

    async fn get_user_preferences(&self, user_id: &UserId) -> Result<UserPreferences>;

    async fn update_user_preferences(
        &self,
        user_id: &UserId,
        preferences: &UserPreferences,
    ) -> Result<UserPreferences>;
}
