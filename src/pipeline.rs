//! Wiring: builds every stage from an [`IngestConfig`] and starts the
//! background tasks.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cache::DurableCache;
use crate::config::IngestConfig;
use crate::dispatch::{Dispatcher, EngineError, HttpWorkflowEngine, LoggingEngine, WorkflowEngine};
use crate::health::{Counters, HealthReporter};
use crate::ingest::{
    BoundedQueue, ConcurrencyLimiter, DEFAULT_SWEEP_INTERVAL, Debouncer, Deduplicator,
};
use crate::lifecycle::{LifecycleController, ShutdownState};
use crate::server::AppState;
use crate::types::InboundEnvelope;
use crate::worker::{WorkerContext, WorkerPool};

/// Picks the workflow engine named by the config.
pub fn engine_from_config(config: &IngestConfig) -> Result<Arc<dyn WorkflowEngine>, EngineError> {
    match &config.workflow_engine_url {
        Some(url) => {
            let engine = HttpWorkflowEngine::new(url)?;
            info!(endpoint = %engine.endpoint(), "dispatching to HTTP workflow engine");
            Ok(Arc::new(engine))
        }
        None => {
            info!("WORKFLOW_ENGINE_URL not set, messages will only be logged");
            Ok(Arc::new(LoggingEngine))
        }
    }
}

/// Connects the durable dedup tier named by `REDIS_URL`.
///
/// Returns `None`, and dedup stays process-local, when no URL is set, when
/// the server cannot be reached, or when the binary was built without the
/// `redis` feature.
pub async fn cache_from_config(config: &IngestConfig) -> Option<Arc<dyn DurableCache>> {
    let url = config.redis_url.as_deref()?;
    connect_cache(url).await
}

#[cfg(feature = "redis")]
async fn connect_cache(url: &str) -> Option<Arc<dyn DurableCache>> {
    match crate::cache::RedisCache::connect(url).await {
        Ok(cache) => Some(Arc::new(cache)),
        Err(e) => {
            warn!(error = %e, "redis unreachable, dedup will be process-local");
            None
        }
    }
}

#[cfg(not(feature = "redis"))]
async fn connect_cache(_url: &str) -> Option<Arc<dyn DurableCache>> {
    warn!("REDIS_URL is set but this build has no redis support; dedup will be process-local");
    None
}

/// A running pipeline.
pub struct Pipeline {
    pub counters: Arc<Counters>,
    pub shutdown_state: Arc<ShutdownState>,
    pub queue: Arc<BoundedQueue<InboundEnvelope>>,
    pub dedup: Arc<Deduplicator>,
    pub debouncer: Arc<Debouncer>,
    pub dispatcher: Dispatcher,
    pub health: HealthReporter,
    pub controller: Arc<LifecycleController>,
    verify_token: String,
}

impl Pipeline {
    /// Builds every stage and spawns the workers and the dedup sweeper.
    ///
    /// Must be called inside a tokio runtime.
    pub fn start(
        config: &IngestConfig,
        engine: Arc<dyn WorkflowEngine>,
        cache: Option<Arc<dyn DurableCache>>,
    ) -> Self {
        let counters = Arc::new(Counters::new());
        let shutdown_state = Arc::new(ShutdownState::new());
        let background = CancellationToken::new();

        let queue = Arc::new(BoundedQueue::new(
            config.queue_capacity,
            Arc::clone(&counters),
        ));

        let mut dedup = Deduplicator::new(config.dedup_ttl, Arc::clone(&counters));
        if let Some(cache) = cache {
            dedup = dedup.with_cache(cache);
        }
        let dedup = Arc::new(dedup);
        dedup.spawn_sweeper(DEFAULT_SWEEP_INTERVAL, background.clone());

        let limiter = ConcurrencyLimiter::new(config.max_concurrent_dispatch, Arc::clone(&counters));
        let dispatcher = Dispatcher::new(engine, limiter, Arc::clone(&counters));
        let debouncer = Arc::new(Debouncer::new(
            config.debounce_window,
            config.max_pending_senders,
            dispatcher.clone(),
            Arc::clone(&counters),
        ));

        let ctx = Arc::new(WorkerContext {
            queue: Arc::clone(&queue),
            dedup: Arc::clone(&dedup),
            debouncer: Arc::clone(&debouncer),
            app_secret: config.app_secret.as_bytes().to_vec(),
            counters: Arc::clone(&counters),
        });
        let workers = WorkerPool::spawn(config.workers, ctx, &background);

        let health = HealthReporter::new(
            Arc::clone(&counters),
            Arc::clone(&shutdown_state),
            config.queue_capacity,
            config.max_concurrent_dispatch,
        );
        let controller = Arc::new(LifecycleController::new(
            Arc::clone(&shutdown_state),
            Arc::clone(&queue),
            Arc::clone(&debouncer),
            dispatcher.clone(),
            workers,
            background,
            config.timeouts,
        ));

        Pipeline {
            counters,
            shutdown_state,
            queue,
            dedup,
            debouncer,
            dispatcher,
            health,
            controller,
            verify_token: config.verify_token.clone(),
        }
    }

    /// State for the HTTP layer.
    pub fn app_state(&self) -> AppState {
        AppState::new(
            Arc::clone(&self.queue),
            Arc::clone(&self.shutdown_state),
            Arc::clone(&self.counters),
            self.health.clone(),
            self.verify_token.clone(),
        )
    }
}
