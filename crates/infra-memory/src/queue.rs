// QueueHandle over a shared MemoryStore

use crate::store::MemoryStore;
use async_trait::async_trait;
use queuedeck_core::domain::{Job, JobCounts, JobId, JobOptions, JobState, NewJob};
use queuedeck_core::error::{AppError, Result};
use queuedeck_core::port::QueueHandle;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Producer handle; after `close` every call fails with InvalidState
pub struct MemoryQueue {
    store: Arc<MemoryStore>,
    defaults: JobOptions,
    closed: AtomicBool,
}

impl MemoryQueue {
    pub fn new(store: Arc<MemoryStore>, defaults: JobOptions) -> Self {
        Self {
            store,
            defaults,
            closed: AtomicBool::new(false),
        }
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    fn ensure_open(&self) -> Result<&MemoryStore> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AppError::InvalidState(format!(
                "queue {} is closed",
                self.store.name()
            )));
        }
        Ok(&self.store)
    }
}

#[async_trait]
impl QueueHandle for MemoryQueue {
    fn name(&self) -> &str {
        self.store.name()
    }

    async fn add(&self, job: NewJob) -> Result<Job> {
        self.ensure_open()?.add(job, &self.defaults)
    }

    async fn get_job(&self, id: &str) -> Result<Option<Job>> {
        Ok(self.ensure_open()?.get_job(id))
    }

    async fn get_jobs(&self, states: &[JobState], start: usize, end: usize) -> Result<Vec<Job>> {
        Ok(self.ensure_open()?.get_jobs(states, start, end))
    }

    async fn get_job_counts(&self) -> Result<JobCounts> {
        Ok(self.ensure_open()?.counts())
    }

    async fn pause(&self) -> Result<()> {
        self.ensure_open()?.set_paused(true);
        Ok(())
    }

    async fn resume(&self) -> Result<()> {
        self.ensure_open()?.set_paused(false);
        Ok(())
    }

    async fn is_paused(&self) -> Result<bool> {
        Ok(self.ensure_open()?.is_paused())
    }

    async fn drain(&self, include_delayed: bool) -> Result<u64> {
        Ok(self.ensure_open()?.drain(include_delayed))
    }

    async fn retry_jobs(&self, state: JobState, count: usize) -> Result<u64> {
        self.ensure_open()?.retry_jobs(state, count)
    }

    async fn clean(&self, grace_ms: u64, limit: usize, state: JobState) -> Result<Vec<JobId>> {
        Ok(self.ensure_open()?.clean(grace_ms, limit, state))
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
