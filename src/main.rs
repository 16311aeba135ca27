//! Dataforge server — background data-processing task orchestration.
//!
//! Main entry point that wires configuration, the task store, the processor
//! registry, and the two periodic loops together.

use std::sync::Arc;

use tokio::sync::watch;
use tracing_subscriber::{EnvFilter, fmt};

use dataforge_core::config::AppConfig;
use dataforge_core::error::AppError;
use dataforge_database::{DatabasePool, PgTaskStore, TaskStore, migration};
use dataforge_worker::processors::{DatabaseProcessor, FileProcessor, NoopProcessor, UrlProcessor};
use dataforge_worker::{
    DependencyResolver, HistoryRecorder, ProcessorRegistry, RecurrenceScheduler, TaskDispatcher,
};

#[tokio::main]
async fn main() {
    let env = std::env::var("DATAFORGE_ENV").unwrap_or_else(|_| "development".to_string());

    let config = match AppConfig::load(&env) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    init_logging(&config);

    if let Err(e) = run(config).await {
        tracing::error!("Server error: {e}");
        std::process::exit(1);
    }
}

/// Initialize tracing/logging.
fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .init();
        }
        _ => {
            fmt().pretty().with_env_filter(filter).with_target(true).init();
        }
    }
}

/// Main server run function.
async fn run(config: AppConfig) -> Result<(), AppError> {
    tracing::info!("Starting Dataforge v{}", env!("CARGO_PKG_VERSION"));

    // ── Database connection + migrations ─────────────────────────
    let pool = DatabasePool::connect(&config.database).await?;
    migration::run_migrations(pool.pool()).await?;
    let store: Arc<dyn TaskStore> = Arc::new(PgTaskStore::new(pool.into_pool()));

    // ── Processor registry ───────────────────────────────────────
    let mut registry = ProcessorRegistry::new();
    registry.register(Arc::new(NoopProcessor));
    registry.register(Arc::new(FileProcessor));
    registry.register(Arc::new(UrlProcessor::new()));
    registry.register(Arc::new(DatabaseProcessor));
    let registry = Arc::new(registry);

    let resolver = Arc::new(DependencyResolver::new(Arc::clone(&store)));
    let history = Arc::new(HistoryRecorder::new(Arc::clone(&store)));

    // ── Periodic loops ───────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut loops = Vec::new();

    if config.dispatcher.enabled {
        let dispatcher = TaskDispatcher::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            Arc::clone(&resolver),
            Arc::clone(&history),
            config.dispatcher.clone(),
        );
        let shutdown = shutdown_rx.clone();
        loops.push(tokio::spawn(async move { dispatcher.run(shutdown).await }));
    } else {
        tracing::warn!("Task dispatcher is disabled");
    }

    if config.scheduler.enabled {
        let scheduler =
            RecurrenceScheduler::new(Arc::clone(&store), config.scheduler.clone());
        let shutdown = shutdown_rx.clone();
        loops.push(tokio::spawn(async move { scheduler.run(shutdown).await }));
    } else {
        tracing::warn!("Recurrence scheduler is disabled");
    }

    // ── Shutdown ─────────────────────────────────────────────────
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| AppError::internal(format!("Failed to listen for shutdown signal: {e}")))?;
    tracing::info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    for handle in loops {
        let _ = handle.await;
    }

    tracing::info!("Dataforge shut down");
    Ok(())
}
