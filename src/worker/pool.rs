//! Fixed pool of workers draining the inbound queue.
//!
//! Each worker claims one envelope at a time and runs it through
//! signature check → parse → dedup → debounce. Nothing a single envelope does
//! can stop a worker: every failure is logged, counted and dropped, and the
//! worker moves on to the next item. Processing runs in its own task so a
//! panic surfaces as a failed join rather than killing the worker.
//!
//! Handing a message to the debouncer may suspend the worker while the
//! debouncer or the dispatcher is at capacity; meanwhile the inbound queue
//! absorbs deliveries until it is full.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::health::Counters;
use crate::ingest::{BoundedQueue, Debouncer, Deduplicator};
use crate::types::InboundEnvelope;
use crate::webhooks::{ParseError, SignatureError, check_signature, parse_delivery};

/// Why an envelope was dropped before any message reached the debouncer.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("signature check failed: {0}")]
    Signature(#[from] SignatureError),

    #[error("malformed payload: {0}")]
    Parse(#[from] ParseError),
}

/// What one envelope turned into.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessSummary {
    /// Messages handed to the debouncer.
    pub accepted: usize,
    /// Messages dropped as redeliveries.
    pub duplicates: usize,
}

/// Everything a worker needs, shared by the whole pool.
pub struct WorkerContext {
    pub queue: Arc<BoundedQueue<InboundEnvelope>>,
    pub dedup: Arc<Deduplicator>,
    pub debouncer: Arc<Debouncer>,
    pub app_secret: Vec<u8>,
    pub counters: Arc<Counters>,
}

impl WorkerContext {
    /// Validates, parses and routes one envelope.
    pub async fn process_envelope(
        &self,
        envelope: InboundEnvelope,
    ) -> Result<ProcessSummary, ProcessError> {
        check_signature(
            &envelope.body,
            envelope.signature.as_deref(),
            &self.app_secret,
        )?;
        let messages = parse_delivery(&envelope.body)?;

        let mut summary = ProcessSummary::default();
        for message in messages {
            if !self.dedup.check_and_record(&message.message_id).await {
                self.counters.record_duplicate();
                summary.duplicates += 1;
                debug!(message_id = %message.message_id, "duplicate message dropped");
                continue;
            }
            summary.accepted += 1;
            self.debouncer.submit(message).await;
        }
        Ok(summary)
    }

    fn record_failure(&self, err: &ProcessError) {
        match err {
            ProcessError::Signature(e) => {
                self.counters.record_invalid_signature();
                warn!(error = %e, "dropping delivery with bad signature");
            }
            ProcessError::Parse(e) => {
                self.counters.record_malformed();
                warn!(error = %e, "dropping malformed delivery");
            }
        }
    }
}

/// Runs one worker until `shutdown` fires or the queue is closed and empty.
async fn run_worker(id: usize, ctx: Arc<WorkerContext>, shutdown: CancellationToken) {
    debug!(worker = id, "worker started");
    loop {
        let envelope = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                debug!(worker = id, "shutdown signal received, stopping worker");
                break;
            }
            item = ctx.queue.dequeue() => match item {
                Some(envelope) => envelope,
                None => {
                    debug!(worker = id, "queue closed, stopping worker");
                    break;
                }
            },
        };

        let waited = envelope.enqueued_at.elapsed();
        let received_at = envelope.received_at;
        let task_ctx = Arc::clone(&ctx);
        let outcome = tokio::spawn(async move { task_ctx.process_envelope(envelope).await }).await;
        match outcome {
            Ok(Ok(summary)) => debug!(
                worker = id,
                accepted = summary.accepted,
                duplicates = summary.duplicates,
                %received_at,
                queue_wait_ms = waited.as_millis() as u64,
                "delivery processed"
            ),
            Ok(Err(e)) => ctx.record_failure(&e),
            Err(e) if e.is_panic() => {
                error!(worker = id, %received_at, "delivery processing panicked");
                ctx.counters.record_error();
            }
            Err(_) => debug!(worker = id, "delivery processing cancelled"),
        }
    }
}

/// Handle to a running set of workers.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    shutdown: CancellationToken,
}

impl WorkerPool {
    /// Spawns `size` workers. They stop when `shutdown` (or a parent) is
    /// cancelled.
    pub fn spawn(size: usize, ctx: Arc<WorkerContext>, shutdown: &CancellationToken) -> Self {
        let shutdown = shutdown.child_token();
        let handles = (0..size)
            .map(|id| tokio::spawn(run_worker(id, Arc::clone(&ctx), shutdown.clone())))
            .collect();
        info!(workers = size, "worker pool started");
        WorkerPool { handles, shutdown }
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Signals every worker to stop after its current envelope.
    pub fn cancel(&self) {
        self.shutdown.cancel();
    }

    /// Waits up to `timeout` for every worker to exit. Returns false on
    /// timeout; workers still running are left to finish on their own.
    pub async fn join(&mut self, timeout: Duration) -> bool {
        let handles = std::mem::take(&mut self.handles);
        let all = async {
            for handle in handles {
                if let Err(e) = handle.await {
                    if e.is_panic() {
                        error!("worker task panicked");
                    }
                }
            }
        };
        tokio::time::timeout(timeout, all).await.is_ok()
    }
}
