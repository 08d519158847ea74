//! Dispatch of messages to the workflow engine.
//!
//! [`Dispatcher::dispatch`] first waits for a concurrency permit, so a caller
//! suspends while the engine is saturated and at most `max` dispatch tasks
//! ever exist. Once the permit is held the call runs in a task spawned on a
//! [`TaskTracker`] so shutdown can wait for in-flight work, and inside that a
//! second `tokio::spawn` so a panicking engine is observed as a failed
//! [`JoinHandle`](tokio::task::JoinHandle) instead of vanishing.
//!
//! ```text
//! caller ──► dispatch() ── acquire permit ──► tracker task ──► inner task
//!                                                  │               │ engine.execute()
//!                                                  │               ▼ count processed / error
//!                                                  └── on panic: log + count error
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio_util::task::TaskTracker;
use tracing::{debug, error, instrument};

use crate::health::Counters;
use crate::ingest::{ConcurrencyLimiter, DispatchPermit};
use crate::types::ParsedMessage;

use super::engine::{EngineError, WorkflowEngine};

/// Sends messages to a [`WorkflowEngine`] under a concurrency limit.
#[derive(Clone)]
pub struct Dispatcher {
    engine: Arc<dyn WorkflowEngine>,
    limiter: ConcurrencyLimiter,
    tracker: TaskTracker,
    counters: Arc<Counters>,
}

impl Dispatcher {
    pub fn new(
        engine: Arc<dyn WorkflowEngine>,
        limiter: ConcurrencyLimiter,
        counters: Arc<Counters>,
    ) -> Self {
        Dispatcher {
            engine,
            limiter,
            tracker: TaskTracker::new(),
            counters,
        }
    }

    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.limiter
    }

    /// Number of dispatch tasks not yet finished. Never more than the
    /// limiter's `max`.
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    /// Waits for a permit, then starts a supervised dispatch and returns
    /// without waiting for the engine.
    pub async fn dispatch(&self, message: ParsedMessage) {
        let permit = match self.limiter.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                error!(message_id = %message.message_id, "concurrency limiter closed, dropping message");
                self.counters.record_error();
                return;
            }
        };

        let engine = Arc::clone(&self.engine);
        let counters = Arc::clone(&self.counters);
        let message_id = message.message_id.clone();

        self.tracker.spawn(async move {
            let supervisor_counters = Arc::clone(&counters);
            let inner = tokio::spawn(run_dispatch(engine, permit, counters, message));
            match inner.await {
                Ok(_) => {}
                Err(e) if e.is_panic() => {
                    error!(message_id = %message_id, "dispatch task panicked");
                    supervisor_counters.record_error();
                }
                Err(_) => {
                    debug!(message_id = %message_id, "dispatch task cancelled");
                }
            }
        });
    }

    /// Waits until every dispatch started so far has finished, or `timeout`
    /// elapses. Returns false on timeout.
    ///
    /// The tracker stays closed afterwards. Dispatches started later are
    /// still tracked and a later call waits for them too.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        self.tracker.close();
        tokio::time::timeout(timeout, self.tracker.wait())
            .await
            .is_ok()
    }
}

/// One dispatch: engine call and accounting. The permit is released when
/// this returns or unwinds.
#[instrument(
    skip_all,
    fields(message_id = %message.message_id, sender = %message.sender, engine = engine.name())
)]
async fn run_dispatch(
    engine: Arc<dyn WorkflowEngine>,
    _permit: DispatchPermit,
    counters: Arc<Counters>,
    message: ParsedMessage,
) -> Result<(), EngineError> {
    let result = engine.execute(&message).await;

    match &result {
        Ok(()) => {
            counters.record_processed();
            debug!("message dispatched");
        }
        Err(e) => {
            counters.record_error();
            error!(error = %e, "workflow dispatch failed");
        }
    }
    result
}
