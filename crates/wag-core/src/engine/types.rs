use serde::{Deserialize, Serialize};

/// Identifies this gateway to the engine.
pub const CLIENT_ID: &str = "whatsapp";

/// Body of `POST /api/v1/chat`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ChatRequest {
    pub client_id: String,
    pub user_id: String,
    pub message: String,
    pub message_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_base64: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_callback_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_throttle_seconds: Option<f64>,
}

impl ChatRequest {
    pub fn text(user_id: &str, message: &str) -> Self {
        Self {
            client_id: CLIENT_ID.to_string(),
            user_id: user_id.to_string(),
            message: message.to_string(),
            message_type: "text".to_string(),
            audio_base64: None,
            audio_format: None,
            progress_callback_url: None,
            progress_throttle_seconds: None,
        }
    }

    pub fn audio(user_id: &str, audio_base64: String, audio_format: &str) -> Self {
        Self {
            message: String::new(),
            message_type: "audio".to_string(),
            audio_base64: Some(audio_base64),
            audio_format: Some(audio_format.to_string()),
            ..Self::text(user_id, "")
        }
    }

    /// Ask the engine to post intermediate progress to the gateway.
    pub fn with_progress(mut self, progress: Option<&ProgressOptions>) -> Self {
        if let Some(p) = progress {
            self.progress_callback_url = Some(p.callback_url.clone());
            self.progress_throttle_seconds = Some(p.throttle_seconds);
        }
        self
    }
}

/// Where and how often the engine should report progress.
#[derive(Clone, Debug, PartialEq)]
pub struct ProgressOptions {
    pub callback_url: String,
    pub throttle_seconds: f64,
}

/// Response from the engine chat endpoint.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub responses: Vec<String>,
    #[serde(default = "default_language")]
    pub response_language: String,
    #[serde(default)]
    pub voice_audio_base64: Option<String>,
}

fn default_language() -> String {
    "en".to_string()
}

/// Per-user preferences stored by the engine.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UserPreferences {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_language: Option<String>,
}

/// Progress update the engine posts to `/progress-callback`.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ProgressUpdate {
    pub user_id: String,
    pub message_key: String,
    pub text: String,
    pub timestamp: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn chat_response_full() {
        let r: ChatResponse = serde_json::from_value(json!({
            "responses": ["Hello", "World"],
            "response_language": "es",
            "voice_audio_base64": "base64data"
        }))
        .unwrap();
        assert_eq!(r.responses, vec!["Hello", "World"]);
        assert_eq!(r.response_language, "es");
        assert_eq!(r.voice_audio_base64.as_deref(), Some("base64data"));
    }

    #[test]
    fn chat_response_defaults() {
        let r: ChatResponse = serde_json::from_value(json!({})).unwrap();
        assert!(r.responses.is_empty());
        assert_eq!(r.response_language, "en");
        assert!(r.voice_audio_base64.is_none());
    }

    #[test]
    fn text_request_omits_optional_fields() {
        let v = serde_json::to_value(ChatRequest::text("u1", "hi")).unwrap();
        assert_eq!(
            v,
            json!({"client_id": "whatsapp", "user_id": "u1", "message": "hi", "message_type": "text"})
        );
    }

    #[test]
    fn audio_request_with_progress() {
        let progress = ProgressOptions {
            callback_url: "https://gw/progress-callback".to_string(),
            throttle_seconds: 3.0,
        };
        let req = ChatRequest::audio("u1", "QUJD".to_string(), "ogg").with_progress(Some(&progress));
        let v = serde_json::to_value(req).unwrap();
        assert_eq!(v["message"], "");
        assert_eq!(v["message_type"], "audio");
        assert_eq!(v["audio_base64"], "QUJD");
        assert_eq!(v["audio_format"], "ogg");
        assert_eq!(v["progress_callback_url"], "https://gw/progress-callback");
        assert_eq!(v["progress_throttle_seconds"], 3.0);
    }

    #[test]
    fn preferences_round_trip_fields() {
        let p: UserPreferences = serde_json::from_value(json!({"response_language": "fr"})).unwrap();
        assert_eq!(p.response_language.as_deref(), Some("fr"));
        assert_eq!(serde_json::to_value(UserPreferences::default()).unwrap(), json!({}));
    }
}
