// In-memory job store for one queue key

use queuedeck_core::domain::{Job, JobCounts, JobId, JobOptions, JobState, NewJob, QueueEvent};
use queuedeck_core::error::{AppError, Result};
use queuedeck_core::port::{JobStore, TimeProvider};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;

/// Capacity of each queue's event bus
pub const EVENT_BUS_CAPACITY: usize = 1024;

#[derive(Default)]
struct StoreState {
    jobs: BTreeMap<u64, Job>,
    next_id: u64,
    paused: bool,
}

/// Jobs and event bus for one queue key, shared by every handle on that key
pub struct MemoryStore {
    key: String,
    name: String,
    state: Mutex<StoreState>,
    bus: broadcast::Sender<QueueEvent>,
    time_provider: Arc<dyn TimeProvider>,
}

impl MemoryStore {
    pub fn new(
        key: impl Into<String>,
        name: impl Into<String>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        let (bus, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self {
            key: key.into(),
            name: name.into(),
            state: Mutex::new(StoreState {
                next_id: 1,
                ..Default::default()
            }),
            bus,
            time_provider,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Publish on the queue's bus; returns the number of receivers
    pub fn publish(&self, event: QueueEvent) -> usize {
        self.bus.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.bus.subscribe()
    }

    fn job_mut<'a>(state: &'a mut StoreState, job_id: &str) -> Result<&'a mut Job> {
        job_id
            .parse::<u64>()
            .ok()
            .and_then(|id| state.jobs.get_mut(&id))
            .ok_or_else(|| AppError::NotFound(format!("job {}", job_id)))
    }

    /// `defaults` apply when the job carries no options
    pub fn add(&self, new_job: NewJob, defaults: &JobOptions) -> Result<Job> {
        new_job.validate()?;
        let now = self.time_provider.now_millis();
        let job = {
            let mut state = self.lock();
            let id = state.next_id;
            state.next_id += 1;
            let job = Job::new(id.to_string(), self.name.clone(), new_job, defaults, now);
            state.jobs.insert(id, job.clone());
            job
        };
        if job.state == JobState::Waiting {
            self.publish(QueueEvent::waiting(&job.id));
        }
        Ok(job)
    }

    pub fn get_job(&self, id: &str) -> Option<Job> {
        let id = id.parse::<u64>().ok()?;
        self.lock().jobs.get(&id).cloned()
    }

    pub fn get_jobs(&self, states: &[JobState], start: usize, end: usize) -> Vec<Job> {
        if end < start {
            return Vec::new();
        }
        self.lock()
            .jobs
            .values()
            .rev()
            .filter(|j| states.is_empty() || states.contains(&j.state))
            .skip(start)
            .take(end - start + 1)
            .cloned()
            .collect()
    }

    pub fn counts(&self) -> JobCounts {
        let state = self.lock();
        let mut counts = JobCounts::default();
        for job in state.jobs.values() {
            counts.set(job.state, counts.get(job.state) + 1);
        }
        counts
    }

    pub fn set_paused(&self, paused: bool) {
        self.lock().paused = paused;
    }

    pub fn is_paused(&self) -> bool {
        self.lock().paused
    }

    pub fn drain(&self, include_delayed: bool) -> u64 {
        let mut state = self.lock();
        let before = state.jobs.len();
        state.jobs.retain(|_, j| match j.state {
            JobState::Waiting => false,
            JobState::Delayed => !include_delayed,
            _ => true,
        });
        (before - state.jobs.len()) as u64
    }

    pub fn retry_jobs(&self, job_state: JobState, count: usize) -> Result<u64> {
        if !job_state.is_finished() {
            return Err(AppError::Validation(format!(
                "only completed or failed jobs can be retried, got {}",
                job_state
            )));
        }
        let requeued: Vec<JobId> = {
            let mut state = self.lock();
            let limit = if count == 0 { usize::MAX } else { count };
            let mut ids = Vec::new();
            for job in state
                .jobs
                .values_mut()
                .filter(|j| j.state == job_state)
                .take(limit)
            {
                job.requeue()?;
                ids.push(job.id.clone());
            }
            ids
        };
        for id in &requeued {
            self.publish(QueueEvent::waiting(id));
        }
        Ok(requeued.len() as u64)
    }

    pub fn clean(&self, grace_ms: u64, limit: usize, job_state: JobState) -> Vec<JobId> {
        let grace = i64::try_from(grace_ms).unwrap_or(i64::MAX);
        let cutoff = self.time_provider.now_millis().saturating_sub(grace);
        let limit = if limit == 0 { usize::MAX } else { limit };
        let mut state = self.lock();
        let doomed: Vec<u64> = state
            .jobs
            .iter()
            .filter(|(_, j)| j.state == job_state)
            .filter(|(_, j)| j.finished_on.unwrap_or(j.timestamp) <= cutoff)
            .map(|(id, _)| *id)
            .take(limit)
            .collect();
        for id in &doomed {
            state.jobs.remove(id);
        }
        doomed.into_iter().map(|id| id.to_string()).collect()
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    fn queue_name(&self) -> &str {
        &self.name
    }

    async fn promote_delayed(&self, now: i64) -> Result<u64> {
        let promoted: Vec<JobId> = {
            let mut state = self.lock();
            state
                .jobs
                .values_mut()
                .filter(|j| j.state == JobState::Delayed && j.delay_until.map_or(true, |t| t <= now))
                .map(|j| {
                    j.state = JobState::Waiting;
                    j.delay_until = None;
                    j.id.clone()
                })
                .collect()
        };
        for id in &promoted {
            self.publish(QueueEvent::waiting(id));
        }
        Ok(promoted.len() as u64)
    }

    async fn claim_next(&self, now: i64) -> Result<Option<Job>> {
        let claimed = {
            let mut state = self.lock();
            if state.paused {
                return Ok(None);
            }
            let next = state
                .jobs
                .iter()
                .filter(|(_, j)| j.state == JobState::Waiting)
                .min_by_key(|(id, j)| (j.opts.priority, **id))
                .map(|(id, _)| *id);
            match next.and_then(|id| state.jobs.get_mut(&id)) {
                Some(job) => {
                    job.activate(now)?;
                    job.clone()
                }
                None => return Ok(None),
            }
        };
        self.publish(QueueEvent::active(&claimed.id));
        Ok(Some(claimed))
    }

    async fn update_progress(&self, job_id: &JobId, progress: Value) -> Result<()> {
        {
            let mut state = self.lock();
            Self::job_mut(&mut state, job_id)?.progress = progress.clone();
        }
        self.publish(QueueEvent::progress(job_id, progress));
        Ok(())
    }

    async fn complete(&self, job_id: &JobId, returnvalue: Value, now: i64) -> Result<()> {
        {
            let mut state = self.lock();
            Self::job_mut(&mut state, job_id)?.complete(returnvalue.clone(), now)?;
        }
        self.publish(QueueEvent::completed(job_id, returnvalue));
        Ok(())
    }

    async fn fail(&self, job_id: &JobId, reason: &str, now: i64) -> Result<()> {
        {
            let mut state = self.lock();
            Self::job_mut(&mut state, job_id)?.fail(reason, now)?;
        }
        self.publish(QueueEvent::failed(job_id, reason));
        Ok(())
    }

    async fn retry_later(&self, job_id: &JobId, reason: &str, run_at: i64) -> Result<()> {
        {
            let mut state = self.lock();
            Self::job_mut(&mut state, job_id)?.schedule_retry(reason, run_at)?;
        }
        // Every failed attempt is reported, retried or not
        self.publish(QueueEvent::failed(job_id, reason));
        Ok(())
    }

    async fn recover_stalled(&self) -> Result<Vec<JobId>> {
        let stalled: Vec<JobId> = {
            let mut state = self.lock();
            state
                .jobs
                .values_mut()
                .filter(|j| j.state == JobState::Active)
                .map(|j| {
                    j.state = JobState::Waiting;
                    j.processed_on = None;
                    j.id.clone()
                })
                .collect()
        };
        for id in &stalled {
            self.publish(QueueEvent::stalled(id));
        }
        Ok(stalled)
    }
}
