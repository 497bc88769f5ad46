// Port Layer - Interfaces for external dependencies

pub mod engine;
pub mod event_source;
pub mod job_store;
pub mod maintenance;
pub mod processor;
pub mod queue;
pub mod time_provider; // For deterministic testing

// Re-exports
pub use engine::EngineFactory;
pub use event_source::EventSource;
pub use job_store::JobStore;
pub use maintenance::{Maintenance, MaintenanceConfig, MaintenanceStats};
pub use processor::{ExecutionError, Processor, ProgressReporter};
pub use queue::{QueueHandle, WorkerHandle};
pub use time_provider::{SystemTimeProvider, TimeProvider};
