// Queue & Worker Handle Ports
// Capability interfaces the registry manages; one implementation per engine

use crate::domain::{Job, JobCounts, JobId, JobState, NewJob};
use crate::error::Result;
use async_trait::async_trait;

/// Producer-side handle to one named queue
#[async_trait]
pub trait QueueHandle: Send + Sync {
    /// Queue name (not the engine key)
    fn name(&self) -> &str;

    /// Enqueue a job, applying the queue's default options when none are given
    async fn add(&self, job: NewJob) -> Result<Job>;

    async fn get_job(&self, id: &str) -> Result<Option<Job>>;

    /// Jobs in any of `states`, newest first, `start..=end` inclusive
    async fn get_jobs(&self, states: &[JobState], start: usize, end: usize) -> Result<Vec<Job>>;

    /// One count per state
    ///
    /// # Errors
    /// - AppError::InvalidState once the handle is closed
    async fn get_job_counts(&self) -> Result<JobCounts>;

    async fn pause(&self) -> Result<()>;

    async fn resume(&self) -> Result<()>;

    async fn is_paused(&self) -> Result<bool>;

    /// Remove waiting jobs (and delayed ones when asked); returns the number removed
    async fn drain(&self, include_delayed: bool) -> Result<u64>;

    /// Move up to `count` jobs in a finished `state` back to waiting (0 = all)
    async fn retry_jobs(&self, state: JobState, count: usize) -> Result<u64>;

    /// Delete jobs in `state` finished more than `grace_ms` ago, at most `limit` (0 = no limit)
    async fn clean(&self, grace_ms: u64, limit: usize, state: JobState) -> Result<Vec<JobId>>;

    async fn close(&self) -> Result<()>;
}

/// Consumer attached to a queue; exists only when a processor is configured
#[async_trait]
pub trait WorkerHandle: Send + Sync {
    fn queue_name(&self) -> &str;

    fn is_running(&self) -> bool;

    /// Stop taking jobs and wait for in-flight ones
    async fn close(&self) -> Result<()>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// In-memory queue stub with settable counts and close accounting
    pub struct StubQueue {
        name: String,
        counts: Mutex<JobCounts>,
        closed: AtomicBool,
        fail_close: bool,
        hang_counts: bool,
        count_reads: AtomicUsize,
        close_calls: AtomicUsize,
    }

    impl StubQueue {
        pub fn new(name: impl Into<String>) -> Self {
            Self {
                name: name.into(),
                counts: Mutex::new(JobCounts::default()),
                closed: AtomicBool::new(false),
                fail_close: false,
                hang_counts: false,
                count_reads: AtomicUsize::new(0),
                close_calls: AtomicUsize::new(0),
            }
        }

        /// `get_job_counts` never resolves
        pub fn hanging_counts(mut self) -> Self {
            self.hang_counts = true;
            self
        }

        /// Number of `get_job_counts` calls started
        pub fn count_reads(&self) -> usize {
            self.count_reads.load(Ordering::SeqCst)
        }

        /// Close calls report an error (the handle still counts as closed)
        pub fn failing_close(mut self) -> Self {
            self.fail_close = true;
            self
        }

        pub fn set_counts(&self, counts: JobCounts) {
            *self.counts.lock().unwrap_or_else(|e| e.into_inner()) = counts;
        }

        pub fn close_calls(&self) -> usize {
            self.close_calls.load(Ordering::SeqCst)
        }

        fn ensure_open(&self) -> Result<()> {
            if self.closed.load(Ordering::SeqCst) {
                return Err(AppError::InvalidState(format!("queue {} is closed", self.name)));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl QueueHandle for StubQueue {
        fn name(&self) -> &str {
            &self.name
        }
        async fn add(&self, _job: NewJob) -> Result<Job> {
            Err(AppError::Internal("StubQueue does not store jobs".to_string()))
        }
        async fn get_job(&self, _id: &str) -> Result<Option<Job>> {
            Ok(None)
        }
        async fn get_jobs(&self, _states: &[JobState], _start: usize, _end: usize) -> Result<Vec<Job>> {
            Ok(Vec::new())
        }
        async fn get_job_counts(&self) -> Result<JobCounts> {
            self.count_reads.fetch_add(1, Ordering::SeqCst);
            if self.hang_counts {
                std::future::pending::<()>().await;
            }
            self.ensure_open()?;
            Ok(*self.counts.lock().unwrap_or_else(|e| e.into_inner()))
        }
        async fn pause(&self) -> Result<()> {
            Ok(())
        }
        async fn resume(&self) -> Result<()> {
            Ok(())
        }
        async fn is_paused(&self) -> Result<bool> {
            Ok(false)
        }
        async fn drain(&self, _include_delayed: bool) -> Result<u64> {
            Ok(0)
        }
        async fn retry_jobs(&self, _state: JobState, _count: usize) -> Result<u64> {
            Ok(0)
        }
        async fn clean(&self, _grace_ms: u64, _limit: usize, _state: JobState) -> Result<Vec<JobId>> {
            Ok(Vec::new())
        }
        async fn close(&self) -> Result<()> {
            self.close_calls.fetch_add(1, Ordering::SeqCst);
            self.closed.store(true, Ordering::SeqCst);
            if self.fail_close {
                return Err(AppError::Internal("close failed".to_string()));
            }
            Ok(())
        }
    }

    /// Worker stub recording close calls
    pub struct StubWorker {
        queue_name: String,
        running: AtomicBool,
        close_calls: AtomicUsize,
    }

    impl StubWorker {
        pub fn new(queue_name: impl Into<String>) -> Self {
            Self {
                queue_name: queue_name.into(),
                running: AtomicBool::new(true),
                close_calls: AtomicUsize::new(0),
            }
        }

        pub fn close_calls(&self) -> usize {
            self.close_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl WorkerHandle for StubWorker {
        fn queue_name(&self) -> &str {
            &self.queue_name
        }
        fn is_running(&self) -> bool {
            self.running.load(Ordering::SeqCst)
        }
        async fn close(&self) -> Result<()> {
            self.close_calls.fetch_add(1, Ordering::SeqCst);
            self.running.store(false, Ordering::SeqCst);
            Ok(())
        }
    }
}
