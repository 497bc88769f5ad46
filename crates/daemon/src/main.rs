//! QueueDeck daemon - Main Entry Point
//! Registry + workers + HTTP/event-stream API over one engine

mod settings;
mod telemetry;

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use queuedeck_api_http::{AppState, HttpServer, HttpServerConfig};
use queuedeck_core::application::{
    shutdown_channel, MaintenanceScheduler, QueueRegistry, SubscriptionMultiplexer,
};
use queuedeck_core::port::{EngineFactory, Maintenance, SystemTimeProvider, TimeProvider};
use queuedeck_infra_memory::MemoryEngine;
use queuedeck_infra_sqlite::SqliteEngine;
use settings::Settings;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Upper bound on waiting for open connections to drain at shutdown
const HTTP_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Engine chosen from settings, plus what only the live engine provides
struct Engine {
    factory: Arc<dyn EngineFactory>,
    maintenance: Option<Arc<dyn Maintenance>>,
    sqlite: Option<Arc<SqliteEngine>>,
}

async fn build_engine(settings: &Settings) -> Result<Engine> {
    if settings.engine.testing {
        info!("Testing mode: in-memory engine, event streams poll job counts");
        return Ok(Engine {
            factory: Arc::new(MemoryEngine::new()),
            maintenance: None,
            sqlite: None,
        });
    }

    let connection = settings
        .engine
        .connection
        .as_ref()
        .context("engine.connection is required unless engine.testing is set")?;
    info!(url = %connection.url, "Connecting live engine...");
    let engine = Arc::new(
        SqliteEngine::connect(connection)
            .await
            .context("Live engine connection failed")?,
    );

    Ok(Engine {
        factory: engine.clone(),
        maintenance: Some(Arc::new(engine.maintenance())),
        sqlite: Some(engine),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize logging
    telemetry::init_logging()?;
    info!("QueueDeck v{} starting...", VERSION);

    // 2. Load configuration
    let settings = Settings::load().context("Failed to load configuration")?;
    let options = settings.registry_options();
    options.validate().context("Invalid queue configuration")?;

    // 3. Engine, registry, multiplexer
    let engine = build_engine(&settings).await?;
    let registry = Arc::new(QueueRegistry::new(options, engine.factory.clone())?);
    let multiplexer = Arc::new(SubscriptionMultiplexer::new(engine.factory.clone()));

    // 4. Instantiate every queue so workers start consuming now
    let names: Vec<String> = registry.names().map(str::to_string).collect();
    for name in &names {
        let handle = registry
            .get(name)
            .with_context(|| format!("Failed to open queue {}", name))?;
        info!(queue = %name, worker = handle.worker.is_some(), "Queue ready");
    }

    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let time_provider: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);

    // 5. Event-log pruning (live engine only)
    let maintenance_task = engine.maintenance.clone().map(|maintenance| {
        let scheduler = MaintenanceScheduler::new(
            maintenance,
            settings.maintenance_config(),
            settings.maintenance_period(),
            time_provider.clone(),
        );
        tokio::spawn(scheduler.run(shutdown_rx.clone()))
    });

    // 6. HTTP server
    let state = AppState::new(registry.clone(), multiplexer.clone(), shutdown_rx)
        .with_stream_config(settings.stream_config())
        .with_api_keys(settings.auth.api_keys.clone())
        .with_time_provider(time_provider);
    if state.api_keys.is_empty() {
        warn!("No API keys configured; the HTTP API is unauthenticated");
    }
    let server_config = HttpServerConfig {
        host: settings.server.host.clone(),
        port: settings.server.port,
    };
    let server = HttpServer::new(server_config, state).start().await?;

    info!(address = %server.local_addr(), queues = names.len(), "System ready");
    info!("Press Ctrl+C to shutdown");

    // 7. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Exiting gracefully...");

    // 8. Graceful shutdown: streams and server, then queues, then shared subscriptions
    shutdown_tx.shutdown();
    if tokio::time::timeout(HTTP_DRAIN_TIMEOUT, server.wait()).await.is_err() {
        warn!("HTTP server did not drain in time");
    }
    registry.close_all().await;
    multiplexer.shutdown().await;
    if let Some(task) = maintenance_task {
        if let Err(e) = task.await {
            error!(error = %e, "Maintenance task failed");
        }
    }
    if let Some(sqlite) = engine.sqlite {
        sqlite.close().await;
    }

    info!("Shutdown complete.");
    telemetry::shutdown();
    Ok(())
}
