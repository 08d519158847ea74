//! Graceful shutdown.
//!
//! Shutdown runs in fixed stages, each bounded so a stuck stage cannot hold
//! the process up:
//!
//! 1. Mark the service `draining`; the HTTP layer answers 503 from now on.
//! 2. Flush every pending debounce entry and switch the debouncer to
//!    pass-through.
//! 3. Wait up to `drain` (T1) for the queue to empty.
//! 4. Cancel the workers and wait up to `in_flight` (T2) for them, for
//!    flushed messages to reach the dispatcher, and for all started
//!    dispatches.
//! 5. Mark the service `stopped`.
//!
//! A stage that times out is logged and the next stage runs anyway.

mod state;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::dispatch::Dispatcher;
use crate::ingest::{BoundedQueue, Debouncer};
use crate::types::InboundEnvelope;
use crate::worker::WorkerPool;

pub use state::{ShutdownPhase, ShutdownState};

/// Stage timeouts for [`LifecycleController::shutdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownTimeouts {
    /// T1: how long to wait for the queue to empty.
    pub drain: Duration,
    /// T2: how long to wait for workers and in-flight dispatches.
    pub in_flight: Duration,
}

impl Default for ShutdownTimeouts {
    fn default() -> Self {
        ShutdownTimeouts {
            drain: Duration::from_secs(5),
            in_flight: Duration::from_secs(10),
        }
    }
}

/// What happened during a shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    pub flushed: usize,
    pub queue_drained: bool,
    pub workers_stopped: bool,
    pub dispatches_finished: bool,
    pub elapsed: Duration,
}

pub struct LifecycleController {
    state: Arc<ShutdownState>,
    queue: Arc<BoundedQueue<InboundEnvelope>>,
    debouncer: Arc<Debouncer>,
    dispatcher: Dispatcher,
    workers: Mutex<Option<WorkerPool>>,
    background: CancellationToken,
    timeouts: ShutdownTimeouts,
}

impl LifecycleController {
    /// `background` is cancelled in stage 4 along with the workers; anything
    /// else that should stop at that point (the dedup sweeper) hangs off it.
    pub fn new(
        state: Arc<ShutdownState>,
        queue: Arc<BoundedQueue<InboundEnvelope>>,
        debouncer: Arc<Debouncer>,
        dispatcher: Dispatcher,
        workers: WorkerPool,
        background: CancellationToken,
        timeouts: ShutdownTimeouts,
    ) -> Self {
        LifecycleController {
            state,
            queue,
            debouncer,
            dispatcher,
            workers: Mutex::new(Some(workers)),
            background,
            timeouts,
        }
    }

    /// Runs the shutdown sequence. Returns `None` if a shutdown had already
    /// been started.
    pub async fn shutdown(&self) -> Option<ShutdownReport> {
        if !self.state.begin_draining() {
            warn!(phase = %self.state.phase(), "shutdown already in progress");
            return None;
        }
        let started = Instant::now();
        info!(
            queued = self.queue.len(),
            pending = self.debouncer.pending(),
            "shutdown started, draining"
        );

        let flushed = self.debouncer.flush_all();

        let queue_drained = tokio::time::timeout(self.timeouts.drain, self.queue.wait_empty())
            .await
            .is_ok();
        if !queue_drained {
            warn!(
                remaining = self.queue.len(),
                timeout_secs = self.timeouts.drain.as_secs_f64(),
                "queue did not drain in time, abandoning remaining deliveries"
            );
        }

        let deadline = Instant::now() + self.timeouts.in_flight;
        self.queue.close();
        self.background.cancel();
        let pool = self
            .workers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let workers_stopped = match pool {
            Some(mut pool) => {
                info!(workers = pool.size(), "stopping workers");
                pool.cancel();
                pool.join(deadline.saturating_duration_since(Instant::now()))
                    .await
            }
            None => true,
        };
        if !workers_stopped {
            warn!("workers did not stop in time");
        }

        let handed_off = self
            .debouncer
            .wait_handed_off(deadline.saturating_duration_since(Instant::now()))
            .await;
        let dispatches_finished = handed_off
            && self
                .dispatcher
                .wait_idle(deadline.saturating_duration_since(Instant::now()))
                .await;
        if !dispatches_finished {
            warn!(
                pending = self.dispatcher.pending(),
                timeout_secs = self.timeouts.in_flight.as_secs_f64(),
                "in-flight dispatches did not finish in time"
            );
        }

        self.state.mark_stopped();
        let report = ShutdownReport {
            flushed,
            queue_drained,
            workers_stopped,
            dispatches_finished,
            elapsed: started.elapsed(),
        };
        info!(
            flushed,
            queue_drained,
            workers_stopped,
            dispatches_finished,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "shutdown complete"
        );
        Some(report)
    }
}
