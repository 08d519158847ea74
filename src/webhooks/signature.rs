//! Delivery signature verification using HMAC-SHA256.
//!
//! The Cloud API signs every delivery body with the app secret and sends the
//! result in `X-Hub-Signature-256` as `sha256=<hex>`. Verification happens on
//! the worker side, never in the HTTP handler, so a flood of forged requests
//! costs the ingress path nothing beyond reading the body.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the delivery signature.
pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

/// Why a delivery failed signature verification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("signature header missing")]
    Missing,

    #[error("signature header malformed")]
    Malformed,

    #[error("signature does not match payload")]
    Mismatch,
}

/// Parses a signature header (`sha256=abc123...`) into raw bytes.
///
/// Returns `None` for a missing prefix, another algorithm, or bad hex.
///
/// # Examples
///
/// ```
/// use webhook_ingest::webhooks::parse_signature_header;
///
/// assert_eq!(parse_signature_header("sha256=0aff"), Some(vec![0x0a, 0xff]));
/// assert!(parse_signature_header("sha1=0aff").is_none());
/// assert!(parse_signature_header("sha256=zz").is_none());
/// ```
pub fn parse_signature_header(header: &str) -> Option<Vec<u8>> {
    let hex_sig = header.trim().strip_prefix("sha256=")?;
    hex::decode(hex_sig).ok()
}

/// Computes the HMAC-SHA256 of a payload. Used to sign test deliveries.
pub fn compute_signature(payload: &[u8], secret: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC can take key of any size");
    mac.update(payload);
    mac.finalize().into_bytes().to_vec()
}

/// Formats raw signature bytes as a header value (`sha256=<hex>`).
pub fn format_signature_header(signature: &[u8]) -> String {
    format!("sha256={}", hex::encode(signature))
}

/// Checks a delivery's signature header against its body.
///
/// Comparison is constant-time (delegated to `Mac::verify_slice`).
///
/// # Examples
///
/// ```
/// use webhook_ingest::webhooks::{
///     SignatureError, check_signature, compute_signature, format_signature_header,
/// };
///
/// let body = br#"{"object":"whatsapp_business_account"}"#;
/// let header = format_signature_header(&compute_signature(body, b"app-secret"));
///
/// assert_eq!(check_signature(body, Some(&header), b"app-secret"), Ok(()));
/// assert_eq!(
///     check_signature(body, Some(&header), b"other-secret"),
///     Err(SignatureError::Mismatch)
/// );
/// assert_eq!(check_signature(body, None, b"app-secret"), Err(SignatureError::Missing));
/// ```
pub fn check_signature(
    payload: &[u8],
    signature_header: Option<&str>,
    secret: &[u8],
) -> Result<(), SignatureError> {
    let header = signature_header.ok_or(SignatureError::Missing)?;
    let expected = parse_signature_header(header).ok_or(SignatureError::Malformed)?;

    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| SignatureError::Mismatch)?;
    mac.update(payload);
    mac.verify_slice(&expected)
        .map_err(|_| SignatureError::Mismatch)
}

/// Boolean form of [`check_signature`] for callers that only need yes/no.
pub fn verify_signature(payload: &[u8], signature_header: &str, secret: &[u8]) -> bool {
    check_signature(payload, Some(signature_header), secret).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn signed(payload: &[u8], secret: &[u8]) -> String {
        format_signature_header(&compute_signature(payload, secret))
    }

    #[test]
    fn parse_accepts_uppercase_hex() {
        assert_eq!(
            parse_signature_header("sha256=ABCD1234"),
            Some(vec![0xab, 0xcd, 0x12, 0x34])
        );
    }

    #[test]
    fn parse_tolerates_surrounding_whitespace() {
        assert_eq!(parse_signature_header(" sha256=00ff "), Some(vec![0x00, 0xff]));
    }

    #[test]
    fn parse_rejects_odd_length_hex() {
        assert_eq!(parse_signature_header("sha256=abc"), None);
    }

    #[test]
    fn missing_header_is_reported() {
        assert_eq!(
            check_signature(b"{}", None, b"secret"),
            Err(SignatureError::Missing)
        );
    }

    #[test]
    fn malformed_header_is_reported() {
        assert_eq!(
            check_signature(b"{}", Some("md5=abcd"), b"secret"),
            Err(SignatureError::Malformed)
        );
        assert_eq!(
            check_signature(b"{}", Some("sha256=not-hex"), b"secret"),
            Err(SignatureError::Malformed)
        );
    }

    #[test]
    fn truncated_signature_does_not_match() {
        let header = signed(b"payload", b"secret");
        let truncated = &header[..header.len() - 2];
        assert_eq!(
            check_signature(b"payload", Some(truncated), b"secret"),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn tampered_body_does_not_match() {
        let header = signed(br#"{"text":"original"}"#, b"secret");
        assert!(!verify_signature(br#"{"text":"tampered"}"#, &header, b"secret"));
    }

    #[test]
    fn signature_is_32_bytes() {
        assert_eq!(compute_signature(b"any", b"key").len(), 32);
    }

    proptest! {
        #[test]
        fn prop_sign_then_verify(payload: Vec<u8>, secret: Vec<u8>) {
            let header = signed(&payload, &secret);
            prop_assert_eq!(check_signature(&payload, Some(&header), &secret), Ok(()));
        }

        #[test]
        fn prop_wrong_secret_fails(
            payload in any::<Vec<u8>>(),
            secret1 in "[a-zA-Z0-9]{1,40}",
            secret2 in "[a-zA-Z0-9]{1,40}"
        ) {
            // Keys are zero-padded, so secrets containing NUL bytes could collide.
            prop_assume!(secret1 != secret2);
            let header = signed(&payload, secret1.as_bytes());
            prop_assert!(!verify_signature(&payload, &header, secret2.as_bytes()));
        }

        #[test]
        fn prop_arbitrary_header_never_panics(header: String, payload: Vec<u8>) {
            let _ = check_signature(&payload, Some(&header), b"secret");
        }
    }
}
