// QueueHandle over a SqliteStore

use crate::store::SqliteStore;
use async_trait::async_trait;
use queuedeck_core::domain::{Job, JobCounts, JobId, JobOptions, JobState, NewJob};
use queuedeck_core::error::{AppError, Result};
use queuedeck_core::port::QueueHandle;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Producer handle; after `close` every call fails with InvalidState
pub struct SqliteQueue {
    store: Arc<SqliteStore>,
    defaults: JobOptions,
    closed: AtomicBool,
}

impl SqliteQueue {
    pub fn new(store: Arc<SqliteStore>, defaults: JobOptions) -> Self {
        Self {
            store,
            defaults,
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<&SqliteStore> {
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
impl QueueHandle for SqliteQueue {
    fn name(&self) -> &str {
        self.store.name()
    }

    async fn add(&self, job: NewJob) -> Result<Job> {
        self.ensure_open()?.add(job, &self.defaults).await
    }

    async fn get_job(&self, id: &str) -> Result<Option<Job>> {
        self.ensure_open()?.get_job(id).await
    }

    async fn get_jobs(&self, states: &[JobState], start: usize, end: usize) -> Result<Vec<Job>> {
        self.ensure_open()?.get_jobs(states, start, end).await
    }

    async fn get_job_counts(&self) -> Result<JobCounts> {
        self.ensure_open()?.counts().await
    }

    async fn pause(&self) -> Result<()> {
        self.ensure_open()?.set_paused(true).await
    }

    async fn resume(&self) -> Result<()> {
        self.ensure_open()?.set_paused(false).await
    }

    async fn is_paused(&self) -> Result<bool> {
        self.ensure_open()?.is_paused().await
    }

    async fn drain(&self, include_delayed: bool) -> Result<u64> {
        self.ensure_open()?.drain(include_delayed).await
    }

    async fn retry_jobs(&self, state: JobState, count: usize) -> Result<u64> {
        self.ensure_open()?.retry_jobs(state, count).await
    }

    async fn clean(&self, grace_ms: u64, limit: usize, state: JobState) -> Result<Vec<JobId>> {
        self.ensure_open()?.clean(grace_ms, limit, state).await
    }

    // The pool belongs to the engine and outlives its handles
    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
