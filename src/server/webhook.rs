//! Webhook endpoint handlers.
//!
//! `POST /webhook` acknowledges first and validates later: the body is
//! queued untouched and a pre-serialized 200 goes straight back. Signature
//! checks and parsing happen in the worker pool. A full queue still gets a
//! 200, since the platform would otherwise retry into the same overload.

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::AppState;
use crate::ingest::EnqueueError;
use crate::types::InboundEnvelope;
use crate::webhooks::{SIGNATURE_HEADER, VerificationQuery, VerifyError, verify_subscription};

const RECEIVED_BODY: &str = r#"{"status":"received"}"#;
const DRAINING_BODY: &str = r#"{"status":"draining"}"#;

/// Errors from the handshake endpoint.
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error(transparent)]
    Verify(#[from] VerifyError),
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = match &self {
            WebhookError::Verify(VerifyError::MissingParameter(_)) => StatusCode::BAD_REQUEST,
            WebhookError::Verify(_) => StatusCode::FORBIDDEN,
        };
        (status, self.to_string()).into_response()
    }
}

fn json_response(status: StatusCode, body: &'static str) -> Response {
    (status, [(header::CONTENT_TYPE, "application/json")], body).into_response()
}

/// Delivery handler.
///
/// # Response
///
/// - 200 `{"status":"received"}`: always while running, whatever the body
/// - 503 `{"status":"draining"}`: shutdown has started; nothing is queued
pub async fn webhook_handler(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let counters = app_state.counters();
    counters.record_received();

    if !app_state.shutdown().is_running() {
        counters.record_rejected();
        debug!("rejecting delivery during shutdown");
        return json_response(StatusCode::SERVICE_UNAVAILABLE, DRAINING_BODY);
    }

    let signature = get_header(&headers, SIGNATURE_HEADER);
    let size = body.len();
    match app_state
        .queue()
        .try_enqueue(InboundEnvelope::new(body, signature))
    {
        Ok(()) => {
            counters.record_enqueued();
            debug!(bytes = size, "delivery queued");
        }
        Err(EnqueueError::Full(_)) => {
            counters.record_dropped();
            warn!(
                bytes = size,
                capacity = app_state.queue().capacity(),
                "queue full, dropping delivery"
            );
        }
        Err(EnqueueError::Closed(_)) => {
            counters.record_dropped();
            warn!(bytes = size, "queue closed, dropping delivery");
        }
    }

    json_response(StatusCode::OK, RECEIVED_BODY)
}

/// Subscription handshake handler.
///
/// - 200 with the challenge as plain text when mode and token match
/// - 400 when a parameter is missing
/// - 403 otherwise
pub async fn verify_handler(
    State(app_state): State<AppState>,
    Query(query): Query<VerificationQuery>,
) -> Result<String, WebhookError> {
    match verify_subscription(&query, app_state.verify_token()) {
        Ok(challenge) => {
            info!("webhook subscription verified");
            Ok(challenge)
        }
        Err(e) => {
            warn!(error = %e, "webhook subscription rejected");
            Err(e.into())
        }
    }
}

/// Extracts an optional header value as a string.
fn get_header(headers: &HeaderMap, name: &'static str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}
