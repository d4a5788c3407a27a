use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::{errors::Error, Result};

/// Initialize tracing for the gateway.
///
/// `level` is the configured `LOG_LEVEL` (`DEBUG`, `INFO`, ...). `RUST_LOG`
/// overrides it when set.
pub fn init(service_name: &str, level: &str) -> Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    let level = level.trim().to_lowercase();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "warn,wag={level},wag_core={level},wag_engine={level},wag_meta={level},{service_name}={level}"
        ))
    });

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_ansi(false)
        .try_init()
        .map_err(|e| Error::Config(format!("logging init failed: {e}")))
}

/// Render a user identifier for logs.
///
/// With a secret, the id is replaced by the first 12 hex chars of its
/// HMAC-SHA256 so log lines for the same user still correlate.
pub fn pseudonymize(secret: Option<&str>, user_id: &str) -> String {
    let Some(secret) = secret.filter(|s| !s.is_empty()) else {
        return user_id.to_string();
    };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return user_id.to_string();
    };
    mac.update(user_id.as_bytes());
    let digest = hex::encode(mac.finalize().into_bytes());
    format!("user-{}", &digest[..12])
}
