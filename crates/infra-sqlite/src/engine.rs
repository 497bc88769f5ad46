// SQLite EngineFactory (live engine)

use crate::event_source::SqliteEventSource;
use crate::queue::SqliteQueue;
use crate::store::SqliteStore;
use crate::{create_pool, run_migrations, SqliteMaintenance};
use queuedeck_core::application::WorkerPool;
use queuedeck_core::domain::{queue_key, ConnectionConfig, QueueDefinition};
use queuedeck_core::error::{AppError, Result};
use queuedeck_core::port::{
    EngineFactory, EventSource, Processor, QueueHandle, SystemTimeProvider, TimeProvider,
    WorkerHandle,
};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Live engine: all handles share one pool on the configured database
pub struct SqliteEngine {
    pool: SqlitePool,
    connection: ConnectionConfig,
    time_provider: Arc<dyn TimeProvider>,
}

impl SqliteEngine {
    /// Open the pool and bring the schema up to date
    pub async fn connect(connection: &ConnectionConfig) -> Result<Self> {
        let pool = create_pool(connection).await?;
        run_migrations(&pool).await?;
        info!(url = %connection.url, "SQLite engine connected");
        Ok(Self::from_pool(pool, connection.clone(), Arc::new(SystemTimeProvider)))
    }

    pub fn from_pool(
        pool: SqlitePool,
        connection: ConnectionConfig,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            pool,
            connection,
            time_provider,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn maintenance(&self) -> SqliteMaintenance {
        SqliteMaintenance::new(self.pool.clone())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Handles may only target the database this engine is connected to
    fn check_connection(&self, connection: Option<&ConnectionConfig>) -> Result<()> {
        match connection {
            Some(c) if c.url != self.connection.url => Err(AppError::Config(format!(
                "engine is connected to {}, not {}",
                self.connection.url, c.url
            ))),
            _ => Ok(()),
        }
    }

    fn store(&self, prefix: Option<&str>, name: &str) -> Arc<SqliteStore> {
        Arc::new(SqliteStore::new(
            self.pool.clone(),
            queue_key(prefix, name),
            name,
            Arc::clone(&self.time_provider),
        ))
    }
}

fn require_runtime(what: &str) -> Result<()> {
    tokio::runtime::Handle::try_current()
        .map(|_| ())
        .map_err(|_| AppError::Internal(format!("{} requires a Tokio runtime", what)))
}

impl EngineFactory for SqliteEngine {
    fn create_queue(
        &self,
        definition: &QueueDefinition,
        connection: Option<&ConnectionConfig>,
        prefix: Option<&str>,
    ) -> Result<Arc<dyn QueueHandle>> {
        self.check_connection(connection)?;
        Ok(Arc::new(SqliteQueue::new(
            self.store(prefix, &definition.name),
            definition.options.default_job_options.clone(),
        )))
    }

    fn create_worker(
        &self,
        definition: &QueueDefinition,
        processor: Arc<dyn Processor>,
        connection: Option<&ConnectionConfig>,
        prefix: Option<&str>,
    ) -> Result<Arc<dyn WorkerHandle>> {
        self.check_connection(connection)?;
        require_runtime("worker")?;
        Ok(Arc::new(WorkerPool::start(
            self.store(prefix, &definition.name),
            processor,
            definition.effective_concurrency(),
            definition.options.stalled_check,
            Arc::clone(&self.time_provider),
        )))
    }

    fn open_event_source(
        &self,
        queue: &str,
        connection: Option<&ConnectionConfig>,
        prefix: Option<&str>,
    ) -> Result<Arc<dyn EventSource>> {
        self.check_connection(connection)?;
        require_runtime("event source")?;
        let poll_interval = Duration::from_millis(
            connection
                .unwrap_or(&self.connection)
                .event_poll_interval_ms
                .max(1),
        );
        Ok(Arc::new(SqliteEventSource::open(
            self.pool.clone(),
            queue_key(prefix, queue),
            queue,
            poll_interval,
            self.time_provider.now_millis(),
        )))
    }
}
