//! Webhook handling for Cloud API deliveries.
//!
//! This module provides:
//! - Signature verification for delivery bodies (HMAC-SHA256)
//! - Parsing of delivery bodies into [`ParsedMessage`](crate::types::ParsedMessage)s
//! - The subscription handshake (`hub.challenge` echo)

pub mod parser;
pub mod signature;
pub mod verification;

pub use parser::{ParseError, parse_delivery};
pub use signature::{
    SIGNATURE_HEADER, SignatureError, check_signature, compute_signature,
    format_signature_header, parse_signature_header, verify_signature,
};
pub use verification::{VerificationQuery, VerifyError, verify_subscription};
