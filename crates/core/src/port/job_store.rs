// Job Store Port (Interface)
// Worker-facing persistence for one queue; the store emits the matching queue events

use crate::domain::{Job, JobId};
use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;

/// Storage operations a worker needs for one queue
#[async_trait]
pub trait JobStore: Send + Sync {
    fn queue_name(&self) -> &str;

    /// Move delayed jobs whose time has come to waiting; returns how many moved
    async fn promote_delayed(&self, now: i64) -> Result<u64>;

    /// Atomically take the next waiting job and mark it active
    ///
    /// Returns None when the queue is empty or paused.
    async fn claim_next(&self, now: i64) -> Result<Option<Job>>;

    async fn update_progress(&self, job_id: &JobId, progress: Value) -> Result<()>;

    async fn complete(&self, job_id: &JobId, returnvalue: Value, now: i64) -> Result<()>;

    /// Final failure
    async fn fail(&self, job_id: &JobId, reason: &str, now: i64) -> Result<()>;

    /// Failure with another attempt scheduled at `run_at`
    async fn retry_later(&self, job_id: &JobId, reason: &str, run_at: i64) -> Result<()>;

    /// Move jobs left active by a previous process back to waiting
    async fn recover_stalled(&self) -> Result<Vec<JobId>>;
}
