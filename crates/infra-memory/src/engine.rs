// In-memory EngineFactory

use crate::event_source::MemoryEventSource;
use crate::queue::MemoryQueue;
use crate::store::MemoryStore;
use queuedeck_core::application::WorkerPool;
use queuedeck_core::domain::{queue_key, ConnectionConfig, QueueDefinition, QueueEvent};
use queuedeck_core::error::{AppError, Result};
use queuedeck_core::port::{
    EngineFactory, EventSource, Processor, QueueHandle, SystemTimeProvider, TimeProvider,
    WorkerHandle,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Testing engine: no connection needed, state lives as long as the engine
pub struct MemoryEngine {
    stores: Mutex<HashMap<String, Arc<MemoryStore>>>,
    time_provider: Arc<dyn TimeProvider>,
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::with_time_provider(Arc::new(SystemTimeProvider))
    }

    pub fn with_time_provider(time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            stores: Mutex::new(HashMap::new()),
            time_provider,
        }
    }

    /// Store for `key`, created on first use
    fn store(&self, key: &str, name: &str) -> Arc<MemoryStore> {
        let mut stores = self.stores.lock().unwrap_or_else(|e| e.into_inner());
        let store = stores.entry(key.to_string()).or_insert_with(|| {
            debug!(key = %key, "Memory store created");
            Arc::new(MemoryStore::new(key, name, Arc::clone(&self.time_provider)))
        });
        Arc::clone(store)
    }

    /// Inject an event on a queue's bus; returns the number of receivers
    pub fn emit(&self, name: &str, prefix: Option<&str>, event: QueueEvent) -> usize {
        let key = queue_key(prefix, name);
        self.store(&key, name).publish(event)
    }
}

fn require_runtime(what: &str) -> Result<()> {
    tokio::runtime::Handle::try_current()
        .map(|_| ())
        .map_err(|_| AppError::Internal(format!("{} requires a Tokio runtime", what)))
}

impl EngineFactory for MemoryEngine {
    fn create_queue(
        &self,
        definition: &QueueDefinition,
        _connection: Option<&ConnectionConfig>,
        prefix: Option<&str>,
    ) -> Result<Arc<dyn QueueHandle>> {
        let key = queue_key(prefix, &definition.name);
        let store = self.store(&key, &definition.name);
        Ok(Arc::new(MemoryQueue::new(
            store,
            definition.options.default_job_options.clone(),
        )))
    }

    fn create_worker(
        &self,
        definition: &QueueDefinition,
        processor: Arc<dyn Processor>,
        _connection: Option<&ConnectionConfig>,
        prefix: Option<&str>,
    ) -> Result<Arc<dyn WorkerHandle>> {
        require_runtime("worker")?;
        let key = queue_key(prefix, &definition.name);
        let store = self.store(&key, &definition.name);
        Ok(Arc::new(WorkerPool::start(
            store,
            processor,
            definition.effective_concurrency(),
            definition.options.stalled_check,
            Arc::clone(&self.time_provider),
        )))
    }

    fn open_event_source(
        &self,
        queue: &str,
        _connection: Option<&ConnectionConfig>,
        prefix: Option<&str>,
    ) -> Result<Arc<dyn EventSource>> {
        require_runtime("event source")?;
        let key = queue_key(prefix, queue);
        let store = self.store(&key, queue);
        Ok(Arc::new(MemoryEventSource::open(queue, &store)))
    }
}
