//! Subscription handshake for the webhook endpoint.
//!
//! When the webhook URL is registered, the platform sends
//! `GET /webhook?hub.mode=subscribe&hub.verify_token=<t>&hub.challenge=<c>`
//! and expects `<c>` echoed back verbatim if `<t>` matches the token we were
//! configured with. This path is synchronous and touches no pipeline state.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// The only mode the platform uses for the handshake.
const SUBSCRIBE_MODE: &str = "subscribe";

/// Query parameters of a handshake request.
#[derive(Debug, Default, Deserialize)]
pub struct VerificationQuery {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    #[error("missing handshake parameter: {0}")]
    MissingParameter(&'static str),

    #[error("unsupported hub.mode: {0}")]
    UnsupportedMode(String),

    #[error("verify token does not match")]
    TokenMismatch,
}

/// Validates a handshake and returns the challenge to echo.
pub fn verify_subscription(
    query: &VerificationQuery,
    expected_token: &str,
) -> Result<String, VerifyError> {
    let mode = query
        .mode
        .as_deref()
        .ok_or(VerifyError::MissingParameter("hub.mode"))?;
    let token = query
        .verify_token
        .as_deref()
        .ok_or(VerifyError::MissingParameter("hub.verify_token"))?;
    let challenge = query
        .challenge
        .as_deref()
        .ok_or(VerifyError::MissingParameter("hub.challenge"))?;

    if mode != SUBSCRIBE_MODE {
        return Err(VerifyError::UnsupportedMode(mode.to_string()));
    }
    if !tokens_match(token, expected_token) {
        return Err(VerifyError::TokenMismatch);
    }

    Ok(challenge.to_string())
}

/// Compares fixed-size MACs of both tokens with `Mac::verify_slice`, so
/// timing reveals neither a matching prefix nor the expected length.
fn tokens_match(given: &str, expected: &str) -> bool {
    let mac_of = |token: &str| {
        HmacSha256::new_from_slice(expected.as_bytes()).map(|mut mac| {
            mac.update(token.as_bytes());
            mac
        })
    };
    let (Ok(expected_mac), Ok(given_mac)) = (mac_of(expected), mac_of(given)) else {
        return false;
    };
    given_mac
        .verify_slice(&expected_mac.finalize().into_bytes())
        .is_ok()
}
