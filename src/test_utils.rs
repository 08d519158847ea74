//! Shared test utilities: workflow engine doubles, delivery builders, and
//! arbitrary generators for property-based testing.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use proptest::prelude::*;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use crate::dispatch::{EngineError, WorkflowEngine};
use crate::types::{MessageId, ParsedMessage};
use crate::webhooks::{compute_signature, format_signature_header};

pub const TEST_SECRET: &str = "test-app-secret";
pub const TEST_VERIFY_TOKEN: &str = "test-verify-token";

// ─── Engine doubles ───

/// Records every message it is given.
#[derive(Debug, Default)]
pub struct RecordingEngine {
    messages: Mutex<Vec<ParsedMessage>>,
}

impl RecordingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<ParsedMessage> {
        self.messages.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.messages.lock().unwrap().len()
    }
}

#[async_trait]
impl WorkflowEngine for RecordingEngine {
    async fn execute(&self, message: &ParsedMessage) -> Result<(), EngineError> {
        self.messages.lock().unwrap().push(message.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

/// Fails every call.
#[derive(Debug, Default)]
pub struct FailingEngine {
    calls: AtomicUsize,
}

impl FailingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkflowEngine for FailingEngine {
    async fn execute(&self, _message: &ParsedMessage) -> Result<(), EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(EngineError::Rejected("downstream unavailable".into()))
    }

    fn name(&self) -> &str {
        "failing"
    }
}

/// Panics on every call.
#[derive(Debug, Default)]
pub struct PanickingEngine;

#[async_trait]
impl WorkflowEngine for PanickingEngine {
    async fn execute(&self, _message: &ParsedMessage) -> Result<(), EngineError> {
        panic!("engine exploded");
    }

    fn name(&self) -> &str {
        "panicking"
    }
}

/// Blocks every call until [`release`](Self::release) is called. Never
/// releasing it gives a downstream that hangs forever.
#[derive(Debug, Default)]
pub struct BlockingEngine {
    gate: CancellationToken,
    started: AtomicUsize,
}

impl BlockingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn release(&self) {
        self.gate.cancel();
    }
}

#[async_trait]
impl WorkflowEngine for BlockingEngine {
    async fn execute(&self, _message: &ParsedMessage) -> Result<(), EngineError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        self.gate.cancelled().await;
        Ok(())
    }

    fn name(&self) -> &str {
        "blocking"
    }
}

// ─── Delivery builders ───

/// A single inbound text message, as it appears in `value.messages[]`.
pub fn text_message(from: &str, id: &str, body: &str) -> Value {
    json!({
        "from": from,
        "id": id,
        "timestamp": "1700000000",
        "type": "text",
        "text": { "body": body }
    })
}

/// Wraps messages in a full Cloud API delivery body.
pub fn delivery(messages: Vec<Value>) -> Vec<u8> {
    let contacts: Vec<Value> = messages
        .iter()
        .filter_map(|m| m["from"].as_str())
        .map(|from| json!({ "wa_id": from, "profile": { "name": "Test User" } }))
        .collect();
    let body = json!({
        "object": "whatsapp_business_account",
        "entry": [{
            "id": "102290129340398",
            "changes": [{
                "field": "messages",
                "value": {
                    "messaging_product": "whatsapp",
                    "metadata": {
                        "display_phone_number": "15550783881",
                        "phone_number_id": "106540352242922"
                    },
                    "contacts": contacts,
                    "messages": messages
                }
            }]
        }]
    });
    serde_json::to_vec(&body).unwrap()
}

/// Delivery carrying one text message.
pub fn text_delivery(from: &str, id: &str, body: &str) -> Vec<u8> {
    delivery(vec![text_message(from, id, body)])
}

/// `X-Hub-Signature-256` value for `body` under [`TEST_SECRET`].
pub fn sign(body: &[u8]) -> String {
    format_signature_header(&compute_signature(body, TEST_SECRET.as_bytes()))
}

// ─── Property-test generators ───

pub fn arb_message_id() -> impl Strategy<Value = MessageId> {
    "wamid\\.[A-Za-z0-9]{16,48}".prop_map(MessageId::new)
}
