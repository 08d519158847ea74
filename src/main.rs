use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use webhook_ingest::config::IngestConfig;
use webhook_ingest::lifecycle::LifecycleController;
use webhook_ingest::pipeline::{Pipeline, cache_from_config, engine_from_config};
use webhook_ingest::server::build_router;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "webhook_ingest=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = IngestConfig::from_env().context("loading configuration")?;
    tracing::debug!(?config, "configuration loaded");

    let engine = engine_from_config(&config).context("building workflow engine")?;
    let cache = cache_from_config(&config).await;
    let pipeline = Pipeline::start(&config, engine, cache);
    let app = build_router(pipeline.app_state());

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    tracing::info!("listening on {}", config.bind_addr);

    let controller = Arc::clone(&pipeline.controller);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(controller))
        .await
        .context("server error")?;

    tracing::info!("server stopped");
    Ok(())
}

/// Resolves once a termination signal arrived and the pipeline has drained.
///
/// The listener keeps answering (with 503 for deliveries) until this returns.
async fn shutdown_signal(controller: Arc<LifecycleController>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received SIGINT"),
        _ = terminate => tracing::info!("received SIGTERM"),
    }

    controller.shutdown().await;
}
