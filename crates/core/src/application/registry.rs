// Queue Resource Registry
// Lazily creates and owns exactly one queue/worker pair per configured name

use crate::domain::{ConnectionConfig, QueueDefinition};
use crate::error::{AppError, Result};
use crate::port::{EngineFactory, QueueHandle, WorkerHandle};
use futures::future::{join_all, BoxFuture};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Queue handle paired with its optional worker; the unit of lifecycle management
pub struct ManagedQueueHandle {
    pub queue: Arc<dyn QueueHandle>,
    /// Present iff the definition carried a processor
    pub worker: Option<Arc<dyn WorkerHandle>>,
}

/// Registry construction options
#[derive(Debug, Clone, Default)]
pub struct RegistryOptions {
    /// Queue definitions; order is preserved by `names()`
    pub definitions: Vec<QueueDefinition>,
    pub connection: Option<ConnectionConfig>,
    pub prefix: Option<String>,
    /// In-memory engine, no connection required
    pub testing: bool,
}

impl RegistryOptions {
    /// Checks performed eagerly so misconfiguration surfaces at startup
    pub fn validate(&self) -> Result<()> {
        if !self.testing && self.connection.is_none() {
            return Err(AppError::Config(
                "connection config is required unless testing mode is enabled".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for def in &self.definitions {
            if def.name.trim().is_empty() {
                return Err(AppError::Config("queue name must not be empty".to_string()));
            }
            if !seen.insert(def.name.as_str()) {
                return Err(AppError::Config(format!(
                    "queue '{}' is defined more than once",
                    def.name
                )));
            }
        }
        Ok(())
    }
}

struct RegistryState {
    instantiated: HashMap<String, Arc<ManagedQueueHandle>>,
    closed: bool,
}

/// Owns the mapping from queue name to managed handle
pub struct QueueRegistry {
    definitions: Vec<QueueDefinition>,
    index: HashMap<String, usize>,
    connection: Option<ConnectionConfig>,
    prefix: Option<String>,
    testing: bool,
    factory: Arc<dyn EngineFactory>,
    state: Mutex<RegistryState>,
}

impl QueueRegistry {
    /// Create a registry
    ///
    /// # Errors
    /// - AppError::Config if not testing and no connection is given, or names are empty/duplicated
    pub fn new(options: RegistryOptions, factory: Arc<dyn EngineFactory>) -> Result<Self> {
        options.validate()?;

        let index = options
            .definitions
            .iter()
            .enumerate()
            .map(|(i, def)| (def.name.clone(), i))
            .collect();

        info!(
            queues = options.definitions.len(),
            testing = options.testing,
            prefix = options.prefix.as_deref().unwrap_or(""),
            "Queue registry created"
        );

        Ok(Self {
            definitions: options.definitions,
            index,
            connection: options.connection,
            prefix: options.prefix,
            testing: options.testing,
            factory,
            state: Mutex::new(RegistryState {
                instantiated: HashMap::new(),
                closed: false,
            }),
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, RegistryState> {
        // State stays consistent across a panic: every mutation is a single insert/flag write
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Get the handle for `name`, creating it on first access
    ///
    /// # Errors
    /// - AppError::RegistryClosed after `close_all`
    /// - AppError::QueueNotConfigured for unknown names
    pub fn get(&self, name: &str) -> Result<Arc<ManagedQueueHandle>> {
        let mut state = self.lock_state();
        if state.closed {
            return Err(AppError::RegistryClosed);
        }
        let definition = self
            .index
            .get(name)
            .map(|&i| &self.definitions[i])
            .ok_or_else(|| AppError::QueueNotConfigured(name.to_string()))?;

        if let Some(handle) = state.instantiated.get(name) {
            return Ok(Arc::clone(handle));
        }

        let handle = Arc::new(self.create_handle(definition)?);
        state
            .instantiated
            .insert(name.to_string(), Arc::clone(&handle));
        Ok(handle)
    }

    fn create_handle(&self, definition: &QueueDefinition) -> Result<ManagedQueueHandle> {
        let connection = self.connection.as_ref();
        let prefix = self.prefix.as_deref();

        let queue = self.factory.create_queue(definition, connection, prefix)?;
        let worker = match &definition.processor {
            Some(processor) => {
                let created = self.factory.create_worker(
                    definition,
                    Arc::clone(processor),
                    connection,
                    prefix,
                );
                match created {
                    Ok(worker) => Some(worker),
                    Err(e) => {
                        // Queue was created but will never be registered
                        let orphan = Arc::clone(&queue);
                        spawn_close(definition.name.clone(), orphan);
                        return Err(e);
                    }
                }
            }
            None => None,
        };

        debug!(
            queue = %definition.name,
            worker = worker.is_some(),
            "Queue handle instantiated"
        );
        Ok(ManagedQueueHandle { queue, worker })
    }

    /// Whether `name` is configured (independent of instantiation or closed state)
    pub fn has(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Configured names in definition order
    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.definitions.iter().map(|d| d.name.as_str())
    }

    pub fn connection(&self) -> Option<&ConnectionConfig> {
        self.connection.as_ref()
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    pub fn is_testing(&self) -> bool {
        self.testing
    }

    pub fn is_closed(&self) -> bool {
        self.lock_state().closed
    }

    /// Number of handles created so far
    pub fn instantiated_count(&self) -> usize {
        self.lock_state().instantiated.len()
    }

    /// Close every instantiated worker and queue concurrently
    ///
    /// Always marks the registry closed. Individual close failures are logged,
    /// never returned. Calling again performs no further closes.
    pub async fn close_all(&self) {
        let handles: Vec<(String, Arc<ManagedQueueHandle>)> = {
            let mut state = self.lock_state();
            state.closed = true;
            state.instantiated.drain().collect()
        };

        if handles.is_empty() {
            return;
        }

        let mut closes: Vec<BoxFuture<'_, (String, &'static str, Result<()>)>> = Vec::new();
        for (name, handle) in &handles {
            if let Some(worker) = &handle.worker {
                let worker = Arc::clone(worker);
                let name = name.clone();
                closes.push(Box::pin(async move { (name, "worker", worker.close().await) }));
            }
            let queue = Arc::clone(&handle.queue);
            let name = name.clone();
            closes.push(Box::pin(async move { (name, "queue", queue.close().await) }));
        }

        let total = closes.len();
        let failures: Vec<_> = join_all(closes)
            .await
            .into_iter()
            .filter_map(|(name, kind, result)| result.err().map(|e| (name, kind, e)))
            .collect();

        for (name, kind, error) in &failures {
            warn!(queue = %name, handle = kind, error = %error, "Failed to close handle");
        }

        info!(
            queues = handles.len(),
            closed = total - failures.len(),
            failed = failures.len(),
            "Queue registry closed"
        );
    }
}

fn spawn_close(name: String, queue: Arc<dyn QueueHandle>) {
    if let Ok(runtime) = tokio::runtime::Handle::try_current() {
        runtime.spawn(async move {
            if let Err(e) = queue.close().await {
                warn!(queue = %name, error = %e, "Failed to close orphaned queue handle");
            }
        });
    }
}
