//! Local access-token inspection
//!
//! Claims are read without verifying the signature; the server checks the
//! token on every request anyway.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct Claims {
    sub: Option<String>,
    exp: Option<i64>,
}

fn claims(token: &str) -> Option<Claims> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Participant id (`sub` claim) carried in a JWT
pub fn subject(token: &str) -> Option<String> {
    claims(token)?.sub.filter(|s| !s.is_empty())
}

/// Expiry (`exp` claim), seconds since the epoch
pub fn expiry(token: &str) -> Option<i64> {
    claims(token)?.exp
}
