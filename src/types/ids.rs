//! Newtype wrappers for platform identifiers.
//!
//! Senders and messages are both identified by opaque strings on the wire.
//! Wrapping them keeps a phone number from being passed where a message ID
//! is expected (the debouncer keys on one, the deduplicator on the other).

use serde::{Deserialize, Serialize};
use std::fmt;

/// The platform identifier of the user who sent a message.
///
/// For the Cloud API this is the sender's phone number in international
/// format without the leading `+` (e.g. `5511999999999`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SenderId(pub String);

impl SenderId {
    pub fn new(s: impl Into<String>) -> Self {
        SenderId(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a shortened form suitable for logs.
    ///
    /// Only the last four characters are kept so phone numbers do not end
    /// up in log aggregation verbatim.
    pub fn redacted(&self) -> String {
        let chars: Vec<char> = self.0.chars().collect();
        if chars.len() <= 4 {
            return "*".repeat(chars.len());
        }
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("***{}", tail)
    }
}

impl fmt::Display for SenderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.redacted())
    }
}

impl From<String> for SenderId {
    fn from(s: String) -> Self {
        SenderId(s)
    }
}

impl From<&str> for SenderId {
    fn from(s: &str) -> Self {
        SenderId(s.to_string())
    }
}

/// A platform message ID (`wamid.…`). Unique per message; redeliveries of
/// the same message reuse it, which is what deduplication keys on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(s: impl Into<String>) -> Self {
        MessageId(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        MessageId(s)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        MessageId(s.to_string())
    }
}
