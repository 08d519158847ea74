//! HTTP surface.
//!
//! # Endpoints
//!
//! - `POST /webhook` - Acknowledges a delivery immediately and queues it
//!   (200, or 503 while shutting down)
//! - `GET /webhook` - Subscription handshake (`hub.challenge` echo)
//! - `GET /health` - JSON [`HealthSnapshot`](crate::health::HealthSnapshot)

use std::sync::Arc;

use tower_http::trace::TraceLayer;

use crate::health::{Counters, HealthReporter};
use crate::ingest::BoundedQueue;
use crate::lifecycle::ShutdownState;
use crate::types::InboundEnvelope;

pub mod health;
pub mod webhook;

pub use health::health_handler;
pub use webhook::{verify_handler, webhook_handler};

/// Shared application state.
///
/// This is passed to all handlers via Axum's `State` extractor. Handlers
/// only read the lifecycle flag, push onto the queue and bump counters.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    queue: Arc<BoundedQueue<InboundEnvelope>>,
    shutdown: Arc<ShutdownState>,
    counters: Arc<Counters>,
    health: HealthReporter,
    /// Token the platform must present during the subscription handshake.
    verify_token: String,
}

impl AppState {
    pub fn new(
        queue: Arc<BoundedQueue<InboundEnvelope>>,
        shutdown: Arc<ShutdownState>,
        counters: Arc<Counters>,
        health: HealthReporter,
        verify_token: impl Into<String>,
    ) -> Self {
        AppState {
            inner: Arc::new(AppStateInner {
                queue,
                shutdown,
                counters,
                health,
                verify_token: verify_token.into(),
            }),
        }
    }

    pub fn queue(&self) -> &BoundedQueue<InboundEnvelope> {
        &self.inner.queue
    }

    pub fn shutdown(&self) -> &ShutdownState {
        &self.inner.shutdown
    }

    pub fn counters(&self) -> &Counters {
        &self.inner.counters
    }

    pub fn health(&self) -> &HealthReporter {
        &self.inner.health
    }

    pub fn verify_token(&self) -> &str {
        &self.inner.verify_token
    }
}

/// Builds the axum Router with all endpoints.
pub fn build_router(app_state: AppState) -> axum::Router {
    use axum::routing::get;

    axum::Router::new()
        .route("/webhook", get(verify_handler).post(webhook_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}
