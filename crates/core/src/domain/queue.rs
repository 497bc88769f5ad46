// Queue Domain Model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use super::job::JobOptions;
use crate::port::Processor;

/// Default interval for tailing the engine's event log (ms)
pub const DEFAULT_EVENT_POLL_INTERVAL_MS: u64 = 100;

/// Default connection pool size
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Engine-specific queue options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueOptions {
    /// Applied to jobs added without explicit options
    pub default_job_options: JobOptions,
    /// Move jobs left active by a previous process back to waiting when a worker starts
    pub stalled_check: bool,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            default_job_options: JobOptions::default(),
            stalled_check: true,
        }
    }
}

/// Read-only queue configuration, supplied once at registry construction
#[derive(Clone)]
pub struct QueueDefinition {
    pub name: String,
    /// A worker is created only when a processor is present
    pub processor: Option<Arc<dyn Processor>>,
    pub concurrency: Option<usize>,
    pub options: QueueOptions,
}

impl QueueDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            processor: None,
            concurrency: None,
            options: QueueOptions::default(),
        }
    }

    pub fn with_processor(mut self, processor: Arc<dyn Processor>) -> Self {
        self.processor = Some(processor);
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    pub fn with_options(mut self, options: QueueOptions) -> Self {
        self.options = options;
        self
    }

    /// Worker concurrency, never below one
    pub fn effective_concurrency(&self) -> usize {
        self.concurrency.unwrap_or(1).max(1)
    }
}

impl fmt::Debug for QueueDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueDefinition")
            .field("name", &self.name)
            .field("processor", &self.processor.is_some())
            .field("concurrency", &self.concurrency)
            .field("options", &self.options)
            .finish()
    }
}

/// Connection details for the live engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_event_poll_interval_ms")]
    pub event_poll_interval_ms: u64,
}

fn default_max_connections() -> u32 {
    DEFAULT_MAX_CONNECTIONS
}

fn default_event_poll_interval_ms() -> u64 {
    DEFAULT_EVENT_POLL_INTERVAL_MS
}

impl ConnectionConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            event_poll_interval_ms: DEFAULT_EVENT_POLL_INTERVAL_MS,
        }
    }
}

/// Engine-side key for a queue: `prefix:name`, or the bare name
pub fn queue_key(prefix: Option<&str>, name: &str) -> String {
    match prefix {
        Some(p) if !p.is_empty() => format!("{}:{}", p, name),
        _ => name.to_string(),
    }
}
