// Worker - Job execution loop and the pool that runs it

pub mod constants;

use constants::*;

use crate::application::recovery::StalledJobRecovery;
use crate::application::retry::{RetryDecision, RetryPolicy};
use crate::application::shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};
use crate::domain::{Job, JobId};
use crate::error::Result;
use crate::port::{JobStore, Processor, ProgressReporter, TimeProvider, WorkerHandle};
use async_trait::async_trait;
use futures::future::join_all;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{error, info, warn};

/// Reports progress straight into the job store
struct StoreProgressReporter {
    store: Arc<dyn JobStore>,
    job_id: JobId,
}

#[async_trait]
impl ProgressReporter for StoreProgressReporter {
    async fn report(&self, progress: Value) -> Result<()> {
        self.store.update_progress(&self.job_id, progress).await
    }
}

/// Worker processes jobs from one queue
pub struct Worker {
    store: Arc<dyn JobStore>,
    processor: Arc<dyn Processor>,
    retry_policy: RetryPolicy,
    time_provider: Arc<dyn TimeProvider>,
}

impl Worker {
    pub fn new(
        store: Arc<dyn JobStore>,
        processor: Arc<dyn Processor>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            store,
            processor,
            retry_policy: RetryPolicy::new(),
            time_provider,
        }
    }

    /// Run worker loop with graceful shutdown support
    pub async fn run(&self, mut shutdown: ShutdownToken) {
        let queue = self.store.queue_name().to_string();
        info!(queue = %queue, "Worker started");
        loop {
            if shutdown.is_shutdown() {
                break;
            }
            match self.process_next_job().await {
                Ok(true) => {}
                Ok(false) => {
                    // No job available, sleep briefly (or wait for shutdown)
                    tokio::select! {
                        _ = sleep(IDLE_SLEEP_DURATION) => {},
                        _ = shutdown.wait() => break,
                    }
                }
                Err(e) => {
                    error!(queue = %queue, error = %e, "Worker error");
                    tokio::select! {
                        _ = sleep(ERROR_RECOVERY_SLEEP_DURATION) => {},
                        _ = shutdown.wait() => break,
                    }
                }
            }
        }
        info!(queue = %queue, "Worker stopped");
    }

    /// Process next job from queue (returns true if a job was processed)
    pub async fn process_next_job(&self) -> Result<bool> {
        let now = self.time_provider.now_millis();
        self.store.promote_delayed(now).await?;

        // Claimed job is already active in the store
        let job = match self.store.claim_next(now).await? {
            Some(j) => Arc::new(j),
            None => return Ok(false),
        };

        // Processor runs in its own task: a panic must not take the worker down
        let processor = Arc::clone(&self.processor);
        let reporter = StoreProgressReporter {
            store: Arc::clone(&self.store),
            job_id: job.id.clone(),
        };
        let job_for_exec = Arc::clone(&job);
        let handle = tokio::spawn(async move { processor.process(&job_for_exec, &reporter).await });

        let now = self.time_provider.now_millis();
        match handle.await {
            Ok(Ok(value)) => {
                self.store.complete(&job.id, value, now).await?;
                info!(queue = %job.queue, job_id = %job.id, "Job completed");
            }
            Ok(Err(e)) => self.handle_failure(&job, &e.to_string(), now).await?,
            Err(join_err) => {
                // Panics are not retried
                if join_err.is_panic() {
                    error!(queue = %job.queue, job_id = %job.id, "Job panicked");
                } else {
                    error!(queue = %job.queue, job_id = %job.id, "Job cancelled");
                }
                self.store.fail(&job.id, PANIC_FAILURE_REASON, now).await?;
            }
        }
        Ok(true)
    }

    async fn handle_failure(&self, job: &Job, reason: &str, now: i64) -> Result<()> {
        match self.retry_policy.should_retry(job) {
            RetryDecision::Retry(delay_ms) => {
                warn!(
                    queue = %job.queue,
                    job_id = %job.id,
                    attempt = job.attempts_made + 1,
                    delay_ms,
                    error = %reason,
                    "Job failed, retrying"
                );
                self.store
                    .retry_later(&job.id, reason, now + delay_ms as i64)
                    .await
            }
            RetryDecision::Failed => {
                error!(queue = %job.queue, job_id = %job.id, error = %reason, "Job failed");
                self.store.fail(&job.id, reason, now).await
            }
        }
    }
}

/// `concurrency` worker loops over one store; the WorkerHandle both engines hand out
pub struct WorkerPool {
    queue_name: String,
    shutdown: ShutdownSender,
    running: Arc<AtomicBool>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Start the pool (must be called within a Tokio runtime)
    ///
    /// Stalled recovery, when enabled, finishes before any loop claims a job.
    pub fn start(
        store: Arc<dyn JobStore>,
        processor: Arc<dyn Processor>,
        concurrency: usize,
        stalled_check: bool,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        let queue_name = store.queue_name().to_string();
        let (shutdown, token) = shutdown_channel();
        let running = Arc::new(AtomicBool::new(true));
        let worker = Arc::new(Worker::new(Arc::clone(&store), processor, time_provider));

        let flag = Arc::clone(&running);
        let supervisor = tokio::spawn(async move {
            if stalled_check {
                if let Err(e) = StalledJobRecovery::new(store).recover().await {
                    error!(queue = %worker.store.queue_name(), error = %e, "Stalled job recovery failed");
                }
            }
            let loops = (0..concurrency.max(1)).map(|_| {
                let worker = Arc::clone(&worker);
                let token = token.clone();
                tokio::spawn(async move { worker.run(token).await })
            });
            for result in join_all(loops).await {
                if let Err(e) = result {
                    error!(error = %e, "Worker loop aborted");
                }
            }
            flag.store(false, Ordering::SeqCst);
        });

        Self {
            queue_name,
            shutdown,
            running,
            supervisor: Mutex::new(Some(supervisor)),
        }
    }
}

#[async_trait]
impl WorkerHandle for WorkerPool {
    fn queue_name(&self) -> &str {
        &self.queue_name
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        self.shutdown.shutdown();
        if let Some(supervisor) = self.supervisor.lock().await.take() {
            if let Err(e) = supervisor.await {
                warn!(queue = %self.queue_name, error = %e, "Worker supervisor ended abnormally");
            }
        }
        self.running.store(false, Ordering::SeqCst);
        info!(queue = %self.queue_name, "Worker pool closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{JobOptions, JobState, NewJob};
    use crate::error::AppError;
    use crate::port::processor::mocks::{MockBehavior, MockProcessor};
    use crate::port::processor::MockProgressReporter;
    use crate::port::time_provider::mocks::ManualTimeProvider;
    use std::sync::Mutex as StdMutex;

    /// Minimal single-queue store recording worker calls
    struct RecordingStore {
        jobs: StdMutex<Vec<Job>>,
        calls: StdMutex<Vec<String>>,
    }

    impl RecordingStore {
        fn with_jobs(jobs: Vec<Job>) -> Self {
            Self {
                jobs: StdMutex::new(jobs),
                calls: StdMutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    #[async_trait]
    impl JobStore for RecordingStore {
        fn queue_name(&self) -> &str {
            "emails"
        }
        async fn promote_delayed(&self, _now: i64) -> Result<u64> {
            Ok(0)
        }
        async fn claim_next(&self, now: i64) -> Result<Option<Job>> {
            let mut jobs = self.jobs.lock().unwrap();
            match jobs.iter_mut().find(|j| j.state == JobState::Waiting) {
                Some(job) => {
                    job.activate(now).map_err(AppError::from)?;
                    Ok(Some(job.clone()))
                }
                None => Ok(None),
            }
        }
        async fn update_progress(&self, job_id: &JobId, progress: Value) -> Result<()> {
            self.record(format!("progress:{}:{}", job_id, progress));
            Ok(())
        }
        async fn complete(&self, job_id: &JobId, _value: Value, _now: i64) -> Result<()> {
            self.record(format!("complete:{}", job_id));
            Ok(())
        }
        async fn fail(&self, job_id: &JobId, reason: &str, _now: i64) -> Result<()> {
            self.record(format!("fail:{}:{}", job_id, reason));
            Ok(())
        }
        async fn retry_later(&self, job_id: &JobId, _reason: &str, run_at: i64) -> Result<()> {
            self.record(format!("retry:{}:{}", job_id, run_at));
            Ok(())
        }
        async fn recover_stalled(&self) -> Result<Vec<JobId>> {
            self.record("recover".to_string());
            Ok(Vec::new())
        }
    }

    fn job(id: &str, opts: JobOptions) -> Job {
        Job::new(
            id.to_string(),
            "emails",
            NewJob::new("send", serde_json::json!({})).with_options(opts),
            &JobOptions::default(),
            0,
        )
    }

    fn worker(store: Arc<RecordingStore>, processor: MockProcessor) -> Worker {
        Worker::new(store, Arc::new(processor), Arc::new(ManualTimeProvider::new(10_000)))
    }

    #[tokio::test]
    async fn test_success_completes_job() {
        let store = Arc::new(RecordingStore::with_jobs(vec![job("1", JobOptions::default())]));
        let worker = worker(store.clone(), MockProcessor::new_success());

        assert!(worker.process_next_job().await.unwrap());
        assert!(!worker.process_next_job().await.unwrap());
        assert_eq!(store.calls(), vec!["complete:1"]);
    }

    #[tokio::test]
    async fn test_failure_with_attempts_left_is_retried() {
        let opts = JobOptions {
            attempts: 2,
            backoff: Some(crate::domain::Backoff {
                kind: crate::domain::BackoffKind::Fixed,
                delay: 500,
            }),
            ..Default::default()
        };
        let store = Arc::new(RecordingStore::with_jobs(vec![job("1", opts)]));
        let worker = worker(store.clone(), MockProcessor::new_fail("smtp down"));

        worker.process_next_job().await.unwrap();
        assert_eq!(store.calls(), vec!["retry:1:10500"]);
    }

    #[tokio::test]
    async fn test_final_failure_records_reason() {
        let store = Arc::new(RecordingStore::with_jobs(vec![job("1", JobOptions::default())]));
        let worker = worker(store.clone(), MockProcessor::new_fail("smtp down"));

        worker.process_next_job().await.unwrap();
        assert_eq!(store.calls(), vec!["fail:1:smtp down"]);
    }

    #[tokio::test]
    async fn test_panic_is_isolated_and_fails_job() {
        let store = Arc::new(RecordingStore::with_jobs(vec![job("1", JobOptions::default())]));
        let worker = worker(store.clone(), MockProcessor::new_panic_inducing("boom"));

        assert!(worker.process_next_job().await.unwrap());
        assert_eq!(store.calls(), vec![format!("fail:1:{}", PANIC_FAILURE_REASON)]);
    }

    #[tokio::test]
    async fn test_progress_reported_through_store() {
        let store = Arc::new(RecordingStore::with_jobs(vec![job("1", JobOptions::default())]));
        let processor = MockProcessor::new(MockBehavior::ProgressThenSuccess(
            vec![serde_json::json!(50)],
            serde_json::json!("done"),
        ));
        let worker = worker(store.clone(), processor);

        worker.process_next_job().await.unwrap();
        assert_eq!(store.calls(), vec!["progress:1:50", "complete:1"]);
    }

    #[tokio::test]
    async fn test_mock_reporter_receives_progress() {
        let mut reporter = MockProgressReporter::new();
        reporter
            .expect_report()
            .withf(|v| v == &serde_json::json!(10))
            .times(1)
            .returning(|_| Ok(()));

        let processor = MockProcessor::new(MockBehavior::ProgressThenSuccess(
            vec![serde_json::json!(10)],
            serde_json::json!(1),
        ));
        let value = processor
            .process(&job("9", JobOptions::default()), &reporter)
            .await
            .unwrap();
        assert_eq!(value, serde_json::json!(1));
    }

    #[tokio::test]
    async fn test_pool_recovers_then_processes_and_closes() {
        let store = Arc::new(RecordingStore::with_jobs(vec![
            job("1", JobOptions::default()),
            job("2", JobOptions::default()),
        ]));
        let pool = WorkerPool::start(
            store.clone(),
            Arc::new(MockProcessor::new_success()),
            2,
            true,
            Arc::new(ManualTimeProvider::new(0)),
        );
        assert_eq!(pool.queue_name(), "emails");
        assert!(pool.is_running());

        for _ in 0..50 {
            if store.calls().len() >= 3 {
                break;
            }
            sleep(std::time::Duration::from_millis(10)).await;
        }
        pool.close().await.unwrap();

        let calls = store.calls();
        assert_eq!(calls[0], "recover");
        assert!(calls.contains(&"complete:1".to_string()));
        assert!(calls.contains(&"complete:2".to_string()));
        assert!(!pool.is_running());
    }
}
