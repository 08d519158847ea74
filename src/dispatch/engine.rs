//! The downstream workflow engine seam.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use thiserror::Error;
use tracing::info;

use crate::types::ParsedMessage;

/// Request timeout for the HTTP engine.
pub const ENGINE_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Connect timeout for the HTTP engine.
pub const ENGINE_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors returned by a [`WorkflowEngine`].
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid workflow engine URL {url:?}: {reason}")]
    InvalidEndpoint { url: String, reason: String },

    #[error("workflow engine request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("workflow engine returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("workflow engine rejected message: {0}")]
    Rejected(String),
}

/// Runs the downstream workflow for one message.
///
/// Implementations must be safe to call concurrently; the dispatcher bounds
/// how many calls are outstanding.
#[async_trait]
pub trait WorkflowEngine: Send + Sync {
    async fn execute(&self, message: &ParsedMessage) -> Result<(), EngineError>;

    /// Short label used in logs.
    fn name(&self) -> &str;
}

/// POSTs each message as JSON to a configured endpoint.
///
/// Any 2xx response is success. Other statuses become
/// [`EngineError::Status`] carrying the (truncated) response body.
#[derive(Debug, Clone)]
pub struct HttpWorkflowEngine {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpWorkflowEngine {
    pub fn new(endpoint: &str) -> Result<Self, EngineError> {
        let endpoint = Url::parse(endpoint).map_err(|e| EngineError::InvalidEndpoint {
            url: endpoint.to_string(),
            reason: e.to_string(),
        })?;
        let client = reqwest::Client::builder()
            .timeout(ENGINE_REQUEST_TIMEOUT)
            .connect_timeout(ENGINE_CONNECT_TIMEOUT)
            .build()?;
        Ok(HttpWorkflowEngine { client, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

const MAX_ERROR_BODY: usize = 512;

#[async_trait]
impl WorkflowEngine for HttpWorkflowEngine {
    async fn execute(&self, message: &ParsedMessage) -> Result<(), EngineError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(message)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let mut body = response.text().await.unwrap_or_default();
        if body.len() > MAX_ERROR_BODY {
            let mut cut = MAX_ERROR_BODY;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }
        Err(EngineError::Status {
            status: status.as_u16(),
            body,
        })
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// Logs each message and reports success. Used when no endpoint is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingEngine;

#[async_trait]
impl WorkflowEngine for LoggingEngine {
    async fn execute(&self, message: &ParsedMessage) -> Result<(), EngineError> {
        info!(
            message_id = %message.message_id,
            sender = %message.sender,
            kind = %message.kind,
            media = message.kind.is_media(),
            has_text = message.text.is_some(),
            "message ready for workflow"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "logging"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_engine_rejects_bad_url() {
        let err = HttpWorkflowEngine::new("not a url").unwrap_err();
        assert!(matches!(err, EngineError::InvalidEndpoint { .. }));
    }

    #[test]
    fn http_engine_keeps_endpoint() {
        let engine = HttpWorkflowEngine::new("http://127.0.0.1:9/hooks/message").unwrap();
        assert_eq!(engine.endpoint().path(), "/hooks/message");
        assert_eq!(engine.name(), "http");
    }

    #[tokio::test]
    async fn http_engine_reports_connection_failure() {
        // Port 9 (discard) is closed on test machines.
        let engine = HttpWorkflowEngine::new("http://127.0.0.1:9/").unwrap();
        let msg = ParsedMessage::text("5511999990000", "wamid.X", "hi");
        assert!(matches!(
            engine.execute(&msg).await,
            Err(EngineError::Http(_))
        ));
    }

    #[tokio::test]
    async fn logging_engine_always_succeeds() {
        let msg = ParsedMessage::text("5511999990000", "wamid.X", "hi");
        assert!(LoggingEngine.execute(&msg).await.is_ok());
    }
}
