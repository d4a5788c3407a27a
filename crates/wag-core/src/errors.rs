/// Core error type for the gateway.
///
/// Adapter crates map their specific failures into this type so the message
/// handler can treat every failure the same way (log it, apologize to the user).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Connection refused, timeout, DNS failure. Never retried.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("http {status}: {body}")]
    Http { status: u16, body: String },

    #[error("external error: {0}")]
    External(String),
}

impl Error {
    /// Build an [`Error::Http`] with the body clipped for logging.
    pub fn http(status: u16, body: &str) -> Self {
        Self::Http {
            status,
            body: body.chars().take(200).collect(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
