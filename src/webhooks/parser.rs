//! Cloud API delivery parser.
//!
//! Turns a raw (already signature-checked) delivery body into zero or more
//! [`ParsedMessage`] values. A single delivery can batch several entries,
//! each with several changes, each with several messages; every message in
//! every change is extracted.
//!
//! # Payload shape
//!
//! ```text
//! {
//!   "object": "whatsapp_business_account",
//!   "entry": [{
//!     "id": "<waba-id>",
//!     "changes": [{
//!       "field": "messages",
//!       "value": {
//!         "contacts": [{ "wa_id": "...", "profile": { "name": "..." } }],
//!         "messages": [{ "from": "...", "id": "wamid...", "type": "text", ... }],
//!         "statuses": [ ... ]
//!       }
//!     }]
//!   }]
//! }
//! ```
//!
//! Deliveries that only carry `statuses` (sent/delivered/read receipts)
//! yield no messages. That is not an error.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

use crate::types::{MessageId, MessageKind, ParsedMessage, SenderId};

/// The only `object` value the Cloud API sends for message webhooks.
const EXPECTED_OBJECT: &str = "whatsapp_business_account";

/// Error type for delivery parsing failures.
#[derive(Debug, Error)]
pub enum ParseError {
    /// JSON deserialization failed (includes missing required fields).
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// Field has an unusable value.
    #[error("invalid field value for {field}: {value}")]
    InvalidField { field: &'static str, value: String },
}

// ============================================================================
// Raw payload structures for deserialization
//
// Unknown fields are ignored. Fields that routing depends on (`from`, `id`,
// `type`) are required; everything else is optional.
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawDelivery {
    object: Option<String>,
    #[serde(default)]
    entry: Vec<RawEntry>,
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    #[serde(default)]
    changes: Vec<RawChange>,
}

#[derive(Debug, Deserialize)]
struct RawChange {
    #[serde(default)]
    value: RawValue,
}

#[derive(Debug, Default, Deserialize)]
struct RawValue {
    #[serde(default)]
    contacts: Vec<RawContact>,
    #[serde(default)]
    messages: Vec<RawMessage>,
}

#[derive(Debug, Deserialize)]
struct RawContact {
    wa_id: Option<String>,
    profile: Option<RawProfile>,
}

#[derive(Debug, Deserialize)]
struct RawProfile {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    from: String,
    id: String,
    #[serde(rename = "type")]
    kind: String,
    timestamp: Option<String>,
    context: Option<RawContext>,
    text: Option<RawText>,
    interactive: Option<RawInteractive>,
    button: Option<RawButton>,
    audio: Option<RawMedia>,
    image: Option<RawMedia>,
    video: Option<RawMedia>,
    sticker: Option<RawMedia>,
    document: Option<RawMedia>,
}

#[derive(Debug, Deserialize)]
struct RawContext {
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawText {
    body: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawInteractive {
    button_reply: Option<RawReply>,
    list_reply: Option<RawReply>,
}

#[derive(Debug, Deserialize)]
struct RawReply {
    id: Option<String>,
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawButton {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawMedia {
    id: Option<String>,
    caption: Option<String>,
}

/// Parses a delivery body into the messages it carries.
///
/// # Returns
///
/// * `Ok(vec![])` - valid delivery with no messages (e.g. status receipts)
/// * `Ok(messages)` - one entry per message, in payload order
/// * `Err(e)` - body is not JSON, is not a Cloud API delivery, or a message
///   lacks a required field
///
/// # Examples
///
/// ```
/// use webhook_ingest::webhooks::parse_delivery;
///
/// let body = br#"{
///     "object": "whatsapp_business_account",
///     "entry": [{ "changes": [{ "value": {
///         "messages": [{
///             "from": "5511999990000",
///             "id": "wamid.A1",
///             "type": "text",
///             "text": { "body": "is this true?" }
///         }]
///     }}]}]
/// }"#;
///
/// let messages = parse_delivery(body).unwrap();
/// assert_eq!(messages.len(), 1);
/// assert_eq!(messages[0].text.as_deref(), Some("is this true?"));
/// ```
pub fn parse_delivery(payload: &[u8]) -> Result<Vec<ParsedMessage>, ParseError> {
    let raw: RawDelivery = serde_json::from_slice(payload)?;

    match raw.object.as_deref() {
        Some(object) if object != EXPECTED_OBJECT => {
            return Err(ParseError::InvalidField {
                field: "object",
                value: object.to_string(),
            });
        }
        _ => {}
    }

    let mut out = Vec::new();
    for entry in raw.entry {
        for change in entry.changes {
            let RawValue { contacts, messages } = change.value;
            for message in messages {
                let name = contact_name(&contacts, &message.from);
                out.push(convert_message(message, name)?);
            }
        }
    }
    Ok(out)
}

/// Finds the display name for a sender. Falls back to the first contact,
/// which is what single-message deliveries carry.
fn contact_name(contacts: &[RawContact], from: &str) -> Option<String> {
    let matching = contacts
        .iter()
        .find(|c| c.wa_id.as_deref() == Some(from))
        .or_else(|| contacts.first())?;
    matching
        .profile
        .as_ref()
        .and_then(|p| p.name.clone())
        .filter(|n| !n.is_empty())
}

fn convert_message(raw: RawMessage, sender_name: Option<String>) -> Result<ParsedMessage, ParseError> {
    if raw.id.is_empty() {
        return Err(ParseError::InvalidField {
            field: "id",
            value: raw.id,
        });
    }
    if raw.from.is_empty() {
        return Err(ParseError::InvalidField {
            field: "from",
            value: raw.from,
        });
    }

    let kind = MessageKind::from_wire(&raw.kind);
    let sent_at = raw.timestamp.as_deref().and_then(parse_timestamp);

    let mut text = None;
    let mut button_id = None;
    match kind {
        MessageKind::Text => text = raw.text.and_then(|t| t.body),
        MessageKind::Interactive => {
            if let Some(interactive) = raw.interactive {
                if let Some(reply) = interactive.button_reply {
                    button_id = reply.id;
                    text = reply.title;
                } else if let Some(reply) = interactive.list_reply {
                    text = reply.title;
                }
            }
        }
        MessageKind::Button => text = raw.button.and_then(|b| b.text),
        _ => {}
    }

    let media = match kind {
        MessageKind::Audio => raw.audio,
        MessageKind::Image => raw.image,
        MessageKind::Video => raw.video,
        MessageKind::Sticker => raw.sticker,
        MessageKind::Document => raw.document,
        _ => None,
    };
    let (media_id, caption) = match media {
        Some(m) => (m.id, m.caption),
        None => (None, None),
    };
    // Only images and videos carry user-visible captions.
    let caption = caption.filter(|_| matches!(kind, MessageKind::Image | MessageKind::Video));

    Ok(ParsedMessage {
        sender: SenderId::new(raw.from),
        sender_name,
        message_id: MessageId::new(raw.id),
        kind,
        text: text.filter(|t| !t.is_empty()),
        media_id: media_id.filter(|id| !id.is_empty()),
        caption: caption.filter(|c| !c.is_empty()),
        button_id: button_id.filter(|id| !id.is_empty()),
        quoted_id: raw.context.and_then(|c| c.id).filter(|id| !id.is_empty()),
        sent_at,
    })
}

/// The platform sends Unix seconds as a decimal string.
fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let secs: i64 = s.parse().ok()?;
    DateTime::from_timestamp(secs, 0)
}
