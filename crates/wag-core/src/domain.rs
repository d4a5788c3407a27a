use serde_json::Value;

/// WhatsApp user id (the sender's phone number, `wa_id`).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct UserId(pub String);

/// WhatsApp message id (`wamid...`).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MessageId(pub String);

/// Meta media id, resolved to a download URL through the Graph API.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MediaId(pub String);

/// Inbound WhatsApp message kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageType {
    Text,
    Audio,
    Image,
    Document,
    Sticker,
    Location,
    Contacts,
    Interactive,
    Button,
    Unknown,
}

impl MessageType {
    /// Parse the webhook `type` field; anything unrecognized is `Unknown`.
    pub fn parse(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "text" => Self::Text,
            "audio" => Self::Audio,
            "image" => Self::Image,
            "document" => Self::Document,
            "sticker" => Self::Sticker,
            "location" => Self::Location,
            "contacts" => Self::Contacts,
            "interactive" => Self::Interactive,
            "button" => Self::Button,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Audio => "audio",
            Self::Image => "image",
            Self::Document => "document",
            Self::Sticker => "sticker",
            Self::Location => "location",
            Self::Contacts => "contacts",
            Self::Interactive => "interactive",
            Self::Button => "button",
            Self::Unknown => "unknown",
        }
    }
}

/// A message received from a WhatsApp user through the Meta webhook.
#[derive(Clone, Debug)]
pub struct IncomingMessage {
    pub user_id: UserId,
    pub message_id: MessageId,
    pub message_type: MessageType,
    /// Unix seconds, as sent by Meta.
    pub timestamp: i64,
    pub text: String,
    pub media_id: Option<MediaId>,
    /// Maximum age in seconds for the message to be processed.
    pub age_cutoff: i64,
}

impl IncomingMessage {
    /// Parse one element of `value.messages[]` from a webhook payload.
    ///
    /// Text is taken from the body for text messages, from the reply title for
    /// interactive replies and from the button text for quick-reply buttons.
    pub fn from_webhook(user_id: &str, message: &Value, age_cutoff: i64) -> Self {
        let str_at = |ptr: &str| message.pointer(ptr).and_then(Value::as_str);

        let message_type = MessageType::parse(str_at("/type").unwrap_or("unknown"));

        let mut text = String::new();
        let mut media_id = None;
        match message_type {
            MessageType::Text => {
                text = str_at("/text/body").unwrap_or_default().to_string();
            }
            MessageType::Interactive => {
                text = str_at("/interactive/button_reply/title")
                    .or_else(|| str_at("/interactive/list_reply/title"))
                    .unwrap_or_default()
                    .to_string();
            }
            MessageType::Button => {
                text = str_at("/button/text").unwrap_or_default().to_string();
            }
            MessageType::Audio => {
                media_id = str_at("/audio/id").map(|id| MediaId(id.to_string()));
            }
            _ => {}
        }

        // Meta sends the timestamp as a decimal string.
        let timestamp = match message.get("timestamp") {
            Some(Value::String(s)) => s.trim().parse::<i64>().unwrap_or(0),
            Some(Value::Number(n)) => n.as_i64().unwrap_or(0),
            _ => 0,
        };

        Self {
            user_id: UserId(user_id.to_string()),
            message_id: MessageId(str_at("/id").unwrap_or_default().to_string()),
            message_type,
            timestamp,
            text,
            media_id,
            age_cutoff,
        }
    }

    /// Only text and audio messages are forwarded to the engine.
    pub fn is_supported_type(&self) -> bool {
        matches!(self.message_type, MessageType::Text | MessageType::Audio)
    }

    pub fn too_old(&self) -> bool {
        self.too_old_at(chrono::Utc::now().timestamp())
    }

    pub fn too_old_at(&self, now: i64) -> bool {
        self.age_at(now) > self.age_cutoff
    }

    /// Age in seconds relative to the wall clock.
    pub fn age(&self) -> i64 {
        self.age_at(chrono::Utc::now().timestamp())
    }

    pub fn age_at(&self, now: i64) -> i64 {
        now.saturating_sub(self.timestamp)
    }
}
