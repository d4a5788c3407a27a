//! Meta webhook signature verification (`X-Hub-Signature-256` / `X-Hub-Signature`).

use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::Sha256;

/// Verify the signature Meta attaches to webhook deliveries.
///
/// SHA-256 is preferred; the legacy SHA-1 header is only consulted when the
/// SHA-256 header is absent or empty. A non-empty SHA-256 header decides the
/// result on its own, even when it is blank. Returns false when neither is
/// present. Comparison is constant-time (`Mac::verify_slice`).
pub fn verify_signature(
    app_secret: &str,
    payload: &[u8],
    sig256: Option<&str>,
    sig1: Option<&str>,
) -> bool {
    fn present(s: Option<&str>) -> Option<&str> {
        s.filter(|s| !s.is_empty())
    }

    if let Some(header) = present(sig256) {
        let Some(expected) = decode_header(header, "sha256=") else {
            return false;
        };
        let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(app_secret.as_bytes()) else {
            return false;
        };
        mac.update(payload);
        return mac.verify_slice(&expected).is_ok();
    }

    if let Some(header) = present(sig1) {
        let Some(expected) = decode_header(header, "sha1=") else {
            return false;
        };
        let Ok(mut mac) = Hmac::<Sha1>::new_from_slice(app_secret.as_bytes()) else {
            return false;
        };
        mac.update(payload);
        return mac.verify_slice(&expected).is_ok();
    }

    false
}

/// Digests are lowercase hex, exactly as Meta sends them.
fn decode_header(header: &str, prefix: &str) -> Option<Vec<u8>> {
    let hex_sig = header.trim().strip_prefix(prefix)?;
    if !hex_sig.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
        return None;
    }
    hex::decode(hex_sig).ok()
}
