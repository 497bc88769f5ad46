// Processor Port
// Abstraction for running a job's work (subprocess or in-process)

use crate::domain::Job;
use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Execution errors
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Spawn failed: {0}")]
    SpawnFailed(String),

    #[error("Process timeout after {0}ms")]
    Timeout(u64),

    #[error("Process killed: {0}")]
    Killed(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("IO error: {0}")]
    IoError(String),

    /// The job ran and reported failure
    #[error("{0}")]
    Failed(String),
}

/// Sink for progress updates while a job runs
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProgressReporter: Send + Sync {
    async fn report(&self, progress: Value) -> Result<()>;
}

/// Job processor
///
/// Implementations:
/// - SubprocessProcessor: spawns an external command per job
/// - mocks::MockProcessor: scripted behavior for tests
#[async_trait]
pub trait Processor: Send + Sync {
    /// Run a job and return its result value
    ///
    /// # Errors
    /// - ExecutionError::SpawnFailed if the work cannot be started
    /// - ExecutionError::Timeout if execution exceeds its deadline
    /// - ExecutionError::Failed if the job itself reports failure
    async fn process(
        &self,
        job: &Job,
        progress: &dyn ProgressReporter,
    ) -> std::result::Result<Value, ExecutionError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Mock processor behavior
    #[derive(Debug, Clone)]
    pub enum MockBehavior {
        /// Always succeed with the given value
        Success(Value),
        /// Report each progress value, then succeed
        ProgressThenSuccess(Vec<Value>, Value),
        /// Always fail with message
        Fail(String),
        /// Fail the first N calls, then succeed
        FailTimes(usize, String),
        /// Panic with message (for panic isolation testing)
        Panic(String),
        /// Sleep before succeeding (for shutdown tests)
        Slow(Duration),
    }

    /// Mock Processor for testing
    pub struct MockProcessor {
        behavior: Mutex<MockBehavior>,
        call_count: AtomicUsize,
    }

    impl MockProcessor {
        pub fn new(behavior: MockBehavior) -> Self {
            Self {
                behavior: Mutex::new(behavior),
                call_count: AtomicUsize::new(0),
            }
        }
        pub fn new_success() -> Self {
            Self::new(MockBehavior::Success(Value::from("ok")))
        }
        pub fn new_fail(message: impl Into<String>) -> Self {
            Self::new(MockBehavior::Fail(message.into()))
        }
        pub fn new_panic_inducing(message: impl Into<String>) -> Self {
            Self::new(MockBehavior::Panic(message.into()))
        }
        pub fn call_count(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Processor for MockProcessor {
        async fn process(
            &self,
            _job: &Job,
            progress: &dyn ProgressReporter,
        ) -> std::result::Result<Value, ExecutionError> {
            let call = self.call_count.fetch_add(1, Ordering::SeqCst);
            let behavior = self
                .behavior
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone();

            match behavior {
                MockBehavior::Success(value) => Ok(value),
                MockBehavior::ProgressThenSuccess(steps, value) => {
                    for step in steps {
                        progress
                            .report(step)
                            .await
                            .map_err(|e| ExecutionError::IoError(e.to_string()))?;
                    }
                    Ok(value)
                }
                MockBehavior::Fail(msg) => Err(ExecutionError::Failed(msg)),
                MockBehavior::FailTimes(times, msg) => {
                    if call < times {
                        Err(ExecutionError::Failed(msg))
                    } else {
                        Ok(Value::from("ok"))
                    }
                }
                MockBehavior::Panic(msg) => {
                    panic!("{}", msg); // Actually panic for panic isolation testing
                }
                MockBehavior::Slow(duration) => {
                    tokio::time::sleep(duration).await;
                    Ok(Value::from("ok"))
                }
            }
        }
    }
}
