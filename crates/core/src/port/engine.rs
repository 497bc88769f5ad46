// Engine Factory Port
// Selected once at startup: live (SQLite) or testing (in-memory)

use super::event_source::EventSource;
use super::processor::Processor;
use super::queue::{QueueHandle, WorkerHandle};
use crate::domain::{ConnectionConfig, QueueDefinition};
use crate::error::Result;
use std::sync::Arc;

/// Constructs engine handles for a queue
///
/// Methods are synchronous so the registry can create-if-absent under one lock.
pub trait EngineFactory: Send + Sync {
    fn create_queue(
        &self,
        definition: &QueueDefinition,
        connection: Option<&ConnectionConfig>,
        prefix: Option<&str>,
    ) -> Result<Arc<dyn QueueHandle>>;

    /// Must be called within a Tokio runtime (worker loops are spawned)
    fn create_worker(
        &self,
        definition: &QueueDefinition,
        processor: Arc<dyn Processor>,
        connection: Option<&ConnectionConfig>,
        prefix: Option<&str>,
    ) -> Result<Arc<dyn WorkerHandle>>;

    /// Subscribe to the engine's change feed for one queue
    fn open_event_source(
        &self,
        queue: &str,
        connection: Option<&ConnectionConfig>,
        prefix: Option<&str>,
    ) -> Result<Arc<dyn EventSource>>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::port::event_source::mocks::MockEventSource;
    use crate::port::queue::mocks::{StubQueue, StubWorker};
    use std::collections::HashSet;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorded {
        queues: Vec<Arc<StubQueue>>,
        workers: Vec<Arc<StubWorker>>,
        sources: Vec<Arc<MockEventSource>>,
    }

    /// Factory recording every handle it creates
    #[derive(Default)]
    pub struct RecordingEngine {
        recorded: Mutex<Recorded>,
        failing_closes: HashSet<String>,
    }

    impl RecordingEngine {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queues and event sources created for `name` fail on close
        pub fn with_failing_close(mut self, name: impl Into<String>) -> Self {
            self.failing_closes.insert(name.into());
            self
        }

        fn recorded(&self) -> std::sync::MutexGuard<'_, Recorded> {
            self.recorded.lock().unwrap_or_else(|e| e.into_inner())
        }

        pub fn queues(&self) -> Vec<Arc<StubQueue>> {
            self.recorded().queues.clone()
        }

        pub fn workers(&self) -> Vec<Arc<StubWorker>> {
            self.recorded().workers.clone()
        }

        pub fn sources(&self) -> Vec<Arc<MockEventSource>> {
            self.recorded().sources.clone()
        }

        /// Most recently opened source for `queue`
        pub fn source(&self, queue: &str) -> Option<Arc<MockEventSource>> {
            self.recorded()
                .sources
                .iter()
                .rev()
                .find(|s| s.queue_name() == queue)
                .cloned()
        }
    }

    impl EngineFactory for RecordingEngine {
        fn create_queue(
            &self,
            definition: &QueueDefinition,
            _connection: Option<&ConnectionConfig>,
            _prefix: Option<&str>,
        ) -> Result<Arc<dyn QueueHandle>> {
            let mut queue = StubQueue::new(definition.name.clone());
            if self.failing_closes.contains(&definition.name) {
                queue = queue.failing_close();
            }
            let queue = Arc::new(queue);
            self.recorded().queues.push(Arc::clone(&queue));
            Ok(queue)
        }

        fn create_worker(
            &self,
            definition: &QueueDefinition,
            _processor: Arc<dyn Processor>,
            _connection: Option<&ConnectionConfig>,
            _prefix: Option<&str>,
        ) -> Result<Arc<dyn WorkerHandle>> {
            let worker = Arc::new(StubWorker::new(definition.name.clone()));
            self.recorded().workers.push(Arc::clone(&worker));
            Ok(worker)
        }

        fn open_event_source(
            &self,
            queue: &str,
            _connection: Option<&ConnectionConfig>,
            _prefix: Option<&str>,
        ) -> Result<Arc<dyn EventSource>> {
            let mut source = MockEventSource::new(queue);
            if self.failing_closes.contains(queue) {
                source = source.failing_close();
            }
            let source = Arc::new(source);
            self.recorded().sources.push(Arc::clone(&source));
            Ok(source)
        }
    }
}
