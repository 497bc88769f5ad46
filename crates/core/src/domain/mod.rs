// Domain Layer - Pure business logic and entities

pub mod error;
pub mod event;
pub mod job;
pub mod queue;

// Re-exports
pub use error::DomainError;
pub use event::{EventKind, QueueEvent};
pub use job::{
    Backoff, BackoffKind, Job, JobCounts, JobId, JobOptions, JobState, NewJob, MAX_DELAY_MS,
};
pub use queue::{queue_key, ConnectionConfig, QueueDefinition, QueueOptions};
