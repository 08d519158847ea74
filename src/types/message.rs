//! Envelope and message types that flow through the ingestion pipeline.

use std::fmt;

use axum::body::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::ids::{MessageId, SenderId};

/// A raw webhook delivery as accepted by the HTTP layer.
///
/// Nothing in here has been validated yet: the signature is checked and the
/// body parsed by whichever worker claims the envelope from the queue.
#[derive(Debug, Clone)]
pub struct InboundEnvelope {
    /// Raw request body, exactly as received (the signature covers these bytes).
    pub body: Bytes,

    /// Value of the `X-Hub-Signature-256` header, if the request carried one.
    pub signature: Option<String>,

    /// Wall-clock arrival time.
    pub received_at: DateTime<Utc>,

    /// Monotonic arrival time, used to measure queue wait.
    pub enqueued_at: Instant,
}

impl InboundEnvelope {
    pub fn new(body: Bytes, signature: Option<String>) -> Self {
        InboundEnvelope {
            body,
            signature,
            received_at: Utc::now(),
            enqueued_at: Instant::now(),
        }
    }
}

/// The kind of a platform message.
///
/// Serialized with the platform's own type names (`text`, `audio`, ...).
/// Unknown kinds are kept rather than rejected so the workflow engine can
/// decide what to do with them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Interactive,
    Button,
    Audio,
    Image,
    Video,
    Sticker,
    Document,
    #[serde(untagged)]
    Other(String),
}

impl MessageKind {
    /// Maps the platform's `type` field onto a kind.
    pub fn from_wire(s: &str) -> Self {
        match s {
            "text" => MessageKind::Text,
            "interactive" => MessageKind::Interactive,
            "button" => MessageKind::Button,
            "audio" => MessageKind::Audio,
            "image" => MessageKind::Image,
            "video" => MessageKind::Video,
            "sticker" => MessageKind::Sticker,
            "document" => MessageKind::Document,
            other => MessageKind::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Interactive => "interactive",
            MessageKind::Button => "button",
            MessageKind::Audio => "audio",
            MessageKind::Image => "image",
            MessageKind::Video => "video",
            MessageKind::Sticker => "sticker",
            MessageKind::Document => "document",
            MessageKind::Other(s) => s,
        }
    }

    /// Returns true for kinds whose content lives behind a media ID.
    pub fn is_media(&self) -> bool {
        matches!(
            self,
            MessageKind::Audio
                | MessageKind::Image
                | MessageKind::Video
                | MessageKind::Sticker
                | MessageKind::Document
        )
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single inbound message, extracted from a validated delivery.
///
/// Immutable once built. This is what the debouncer coalesces and what the
/// workflow engine receives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedMessage {
    pub sender: SenderId,

    /// Display name from the delivery's contact profile, if present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,

    pub message_id: MessageId,
    pub kind: MessageKind,

    /// Text body for `text`, or the selected title for button and
    /// interactive replies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,

    /// ID of the tapped reply button (interactive `button_reply` only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub button_id: Option<String>,

    /// ID of the message this one replies to (`context.id`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quoted_id: Option<String>,

    /// Platform send time, if the delivery carried a parseable one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
}

impl ParsedMessage {
    /// Creates a message with only the required fields set.
    pub fn new(sender: SenderId, message_id: MessageId, kind: MessageKind) -> Self {
        ParsedMessage {
            sender,
            sender_name: None,
            message_id,
            kind,
            text: None,
            media_id: None,
            caption: None,
            button_id: None,
            quoted_id: None,
            sent_at: None,
        }
    }

    /// Creates a plain text message. Mostly useful in tests.
    pub fn text(
        sender: impl Into<SenderId>,
        message_id: impl Into<MessageId>,
        body: impl Into<String>,
    ) -> Self {
        let mut msg = ParsedMessage::new(sender.into(), message_id.into(), MessageKind::Text);
        msg.text = Some(body.into());
        msg
    }
}
