//! Core domain types for the ingestion pipeline.

pub mod ids;
pub mod message;

pub use ids::{MessageId, SenderId};
pub use message::{InboundEnvelope, MessageKind, ParsedMessage};
