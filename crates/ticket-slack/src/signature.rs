//! Slack request signing (v0).
//!
//! `X-Slack-Signature: v0=<hex(HMAC-SHA256(secret, "v0:<ts>:<body>"))>` with
//! `<ts>` taken from `X-Slack-Request-Timestamp`.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use ticket_core::backend::WebhookRequest;
use ticket_core::{Result, TicketError};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Slack-Signature";
pub const TIMESTAMP_HEADER: &str = "X-Slack-Request-Timestamp";
/// Requests older (or newer) than this are treated as replays.
pub const MAX_SKEW_SECS: i64 = 300;

const VERSION: &str = "v0";

fn mac(secret: &str, timestamp: &str, body: &[u8]) -> Result<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| TicketError::Signature(format!("invalid signing secret: {e}")))?;
    mac.update(format!("{VERSION}:{timestamp}:").as_bytes());
    mac.update(body);
    Ok(mac)
}

/// The header value Slack would send for this body.
pub fn sign(secret: &str, timestamp: &str, body: &[u8]) -> Result<String> {
    let digest = mac(secret, timestamp, body)?.finalize().into_bytes();
    Ok(format!("{VERSION}={}", hex::encode(digest)))
}

/// Check the signature headers of `request` against `secret` as of `now_unix`.
pub fn verify(secret: &str, request: &WebhookRequest, now_unix: i64) -> Result<()> {
    let timestamp = request
        .header(TIMESTAMP_HEADER)
        .ok_or_else(|| TicketError::Signature("missing request timestamp".into()))?;
    let signature = request
        .header(SIGNATURE_HEADER)
        .ok_or_else(|| TicketError::Signature("missing signature".into()))?;

    let sent_at: i64 = timestamp
        .trim()
        .parse()
        .map_err(|_| TicketError::Signature(format!("bad timestamp '{timestamp}'")))?;
    if now_unix.abs_diff(sent_at) > MAX_SKEW_SECS.unsigned_abs() {
        return Err(TicketError::Signature("stale request timestamp".into()));
    }

    let provided = signature
        .strip_prefix("v0=")
        .and_then(|h| hex::decode(h).ok())
        .ok_or_else(|| TicketError::Signature("malformed signature".into()))?;

    mac(secret, timestamp, &request.body)?
        .verify_slice(&provided)
        .map_err(|_| TicketError::Signature("signature mismatch".into()))
}
