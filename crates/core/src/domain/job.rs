// Job Domain Model

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use super::error::DomainError;

/// Job ID (engine-assigned, numeric string)
pub type JobId = String;

/// Longest accepted `delay` (one year)
pub const MAX_DELAY_MS: u64 = 365 * 24 * 60 * 60 * 1000;

/// Job state as seen by queue clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Waiting,
    Active,
    Completed,
    Failed,
    Delayed,
}

impl JobState {
    /// All states, in the order counts are reported
    pub const ALL: [JobState; 5] = [
        JobState::Waiting,
        JobState::Active,
        JobState::Completed,
        JobState::Failed,
        JobState::Delayed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Delayed => "delayed",
        }
    }

    /// Finished jobs are the only ones `clean` and `retry_jobs` touch
    pub fn is_finished(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(JobState::Waiting),
            "active" => Ok(JobState::Active),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            "delayed" => Ok(JobState::Delayed),
            other => Err(DomainError::UnknownState(other.to_string())),
        }
    }
}

/// Backoff strategy applied between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    Fixed,
    Exponential,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backoff {
    #[serde(rename = "type")]
    pub kind: BackoffKind,
    pub delay: u64,
}

/// Per-job options (defaults come from the queue definition)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct JobOptions {
    /// Total attempts including the first run
    pub attempts: u32,
    pub backoff: Option<Backoff>,
    /// Delay before the job becomes waiting (ms)
    pub delay: u64,
    /// Lower value runs first; 0 means no priority
    pub priority: i32,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            attempts: 1,
            backoff: None,
            delay: 0,
            priority: 0,
        }
    }
}

/// Request to enqueue a job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    pub name: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub opts: Option<JobOptions>,
}

impl NewJob {
    pub fn new(name: impl Into<String>, data: Value) -> Self {
        Self {
            name: name.into(),
            data,
            opts: None,
        }
    }

    pub fn with_options(mut self, opts: JobOptions) -> Self {
        self.opts = Some(opts);
        self
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if self.name.trim().is_empty() {
            return Err(DomainError::ValidationError(
                "job name must not be empty".to_string(),
            ));
        }
        if let Some(opts) = &self.opts {
            if opts.attempts == 0 {
                return Err(DomainError::ValidationError(
                    "attempts must be at least 1".to_string(),
                ));
            }
            if opts.delay > MAX_DELAY_MS {
                return Err(DomainError::ValidationError(format!(
                    "delay must not exceed {} ms",
                    MAX_DELAY_MS
                )));
            }
            if opts.priority < 0 {
                return Err(DomainError::ValidationError(
                    "priority must not be negative".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Job entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    /// Queue name (not the prefixed key)
    pub queue: String,
    pub name: String,
    pub data: Value,
    pub opts: JobOptions,
    pub state: JobState,
    pub progress: Value,
    pub attempts_made: u32,
    pub failed_reason: Option<String>,
    pub returnvalue: Option<Value>,

    pub timestamp: i64, // epoch ms
    pub processed_on: Option<i64>,
    pub finished_on: Option<i64>,
    /// When a delayed job becomes waiting
    pub delay_until: Option<i64>,
}

impl Job {
    /// Build a freshly added job; delayed when `opts.delay > 0`
    pub fn new(id: JobId, queue: impl Into<String>, new_job: NewJob, defaults: &JobOptions, now: i64) -> Self {
        let opts = new_job.opts.unwrap_or_else(|| defaults.clone());
        let (state, delay_until) = if opts.delay > 0 {
            let delay = i64::try_from(opts.delay).unwrap_or(i64::MAX);
            (JobState::Delayed, Some(now.saturating_add(delay)))
        } else {
            (JobState::Waiting, None)
        };
        Self {
            id,
            queue: queue.into(),
            name: new_job.name,
            data: new_job.data,
            opts,
            state,
            progress: Value::from(0),
            attempts_made: 0,
            failed_reason: None,
            returnvalue: None,
            timestamp: now,
            processed_on: None,
            finished_on: None,
            delay_until,
        }
    }

    /// Transition waiting -> active
    pub fn activate(&mut self, now: i64) -> Result<(), DomainError> {
        self.transition(JobState::Waiting, JobState::Active)?;
        self.processed_on = Some(now);
        Ok(())
    }

    /// Transition active -> completed
    pub fn complete(&mut self, returnvalue: Value, now: i64) -> Result<(), DomainError> {
        self.transition(JobState::Active, JobState::Completed)?;
        self.attempts_made += 1;
        self.returnvalue = Some(returnvalue);
        self.finished_on = Some(now);
        Ok(())
    }

    /// Transition active -> failed (final)
    pub fn fail(&mut self, reason: impl Into<String>, now: i64) -> Result<(), DomainError> {
        self.transition(JobState::Active, JobState::Failed)?;
        self.attempts_made += 1;
        self.failed_reason = Some(reason.into());
        self.finished_on = Some(now);
        Ok(())
    }

    /// Transition active -> delayed (another attempt at `run_at`)
    pub fn schedule_retry(&mut self, reason: impl Into<String>, run_at: i64) -> Result<(), DomainError> {
        self.transition(JobState::Active, JobState::Delayed)?;
        self.attempts_made += 1;
        self.failed_reason = Some(reason.into());
        self.processed_on = None;
        self.delay_until = Some(run_at);
        Ok(())
    }

    /// Move a finished job back to waiting (manual retry)
    pub fn requeue(&mut self) -> Result<(), DomainError> {
        if !self.state.is_finished() {
            return Err(DomainError::InvalidStateTransition {
                from: self.state.to_string(),
                to: JobState::Waiting.to_string(),
            });
        }
        self.state = JobState::Waiting;
        self.attempts_made = 0;
        self.failed_reason = None;
        self.returnvalue = None;
        self.processed_on = None;
        self.finished_on = None;
        Ok(())
    }

    fn transition(&mut self, from: JobState, to: JobState) -> Result<(), DomainError> {
        if self.state != from {
            return Err(DomainError::InvalidStateTransition {
                from: self.state.to_string(),
                to: to.to_string(),
            });
        }
        self.state = to;
        Ok(())
    }
}

/// Aggregate counts, one per state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub delayed: u64,
}

impl JobCounts {
    pub fn get(&self, state: JobState) -> u64 {
        match state {
            JobState::Waiting => self.waiting,
            JobState::Active => self.active,
            JobState::Completed => self.completed,
            JobState::Failed => self.failed,
            JobState::Delayed => self.delayed,
        }
    }

    pub fn set(&mut self, state: JobState, count: u64) {
        match state {
            JobState::Waiting => self.waiting = count,
            JobState::Active => self.active = count,
            JobState::Completed => self.completed = count,
            JobState::Failed => self.failed = count,
            JobState::Delayed => self.delayed = count,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (JobState, u64)> + '_ {
        JobState::ALL.iter().map(move |s| (*s, self.get(*s)))
    }

    /// States whose count differs from `prev`, as `(state, count, prev)`
    pub fn changes_since(&self, prev: &JobCounts) -> Vec<(JobState, u64, u64)> {
        self.iter()
            .filter_map(|(state, count)| {
                let before = prev.get(state);
                (count != before).then_some((state, count, before))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn waiting_job() -> Job {
        Job::new(
            "1".to_string(),
            "emails",
            NewJob::new("send", json!({"to": "a@b.c"})),
            &JobOptions::default(),
            1000,
        )
    }

    #[test]
    fn test_new_job_is_waiting_without_delay() {
        let job = waiting_job();
        assert_eq!(job.state, JobState::Waiting);
        assert_eq!(job.delay_until, None);
        assert_eq!(job.opts.attempts, 1);
    }

    #[test]
    fn test_new_job_with_delay_is_delayed() {
        let opts = JobOptions {
            delay: 500,
            ..Default::default()
        };
        let job = Job::new(
            "2".to_string(),
            "emails",
            NewJob::new("send", json!({})).with_options(opts),
            &JobOptions::default(),
            1000,
        );
        assert_eq!(job.state, JobState::Delayed);
        assert_eq!(job.delay_until, Some(1500));
    }

    #[test]
    fn test_oversized_delay_is_rejected() {
        let too_long = |delay| {
            NewJob::new("send", json!({})).with_options(JobOptions {
                delay,
                ..Default::default()
            })
        };
        assert!(too_long(MAX_DELAY_MS).validate().is_ok());
        assert!(matches!(
            too_long(MAX_DELAY_MS + 1).validate(),
            Err(DomainError::ValidationError(_))
        ));
        assert!(too_long(i64::MAX as u64).validate().is_err());
        assert!(too_long(u64::MAX).validate().is_err());
    }

    #[test]
    fn test_delay_never_wraps_into_the_past() {
        // Queue defaults skip validation, so construction saturates
        for delay in [i64::MAX as u64, u64::MAX] {
            let defaults = JobOptions {
                delay,
                ..Default::default()
            };
            let job = Job::new("3".to_string(), "emails", NewJob::new("send", json!({})), &defaults, 1000);
            assert_eq!(job.state, JobState::Delayed);
            assert_eq!(job.delay_until, Some(i64::MAX));
        }
    }

    #[test]
    fn test_lifecycle_transitions() {
        let mut job = waiting_job();
        job.activate(1100).unwrap();
        assert_eq!(job.processed_on, Some(1100));

        job.complete(json!("ok"), 1200).unwrap();
        assert_eq!(job.state, JobState::Completed);
        assert_eq!(job.attempts_made, 1);
        assert_eq!(job.returnvalue, Some(json!("ok")));

        // Completed job cannot be failed
        assert!(job.fail("late", 1300).is_err());

        job.requeue().unwrap();
        assert_eq!(job.state, JobState::Waiting);
        assert_eq!(job.attempts_made, 0);
    }

    #[test]
    fn test_schedule_retry_moves_to_delayed() {
        let mut job = waiting_job();
        job.activate(1100).unwrap();
        job.schedule_retry("boom", 5000).unwrap();
        assert_eq!(job.state, JobState::Delayed);
        assert_eq!(job.delay_until, Some(5000));
        assert_eq!(job.failed_reason.as_deref(), Some("boom"));
    }

    #[test]
    fn test_state_parse_roundtrip_and_unknown() {
        for state in JobState::ALL {
            assert_eq!(state.as_str().parse::<JobState>().unwrap(), state);
        }
        assert!("paused".parse::<JobState>().is_err());
    }

    #[test]
    fn test_counts_changes_since() {
        let before = JobCounts {
            waiting: 3,
            completed: 1,
            ..Default::default()
        };
        let mut after = before;
        after.set(JobState::Waiting, 2);

        let changes = after.changes_since(&before);
        assert_eq!(changes, vec![(JobState::Waiting, 2, 3)]);
        assert!(before.changes_since(&before).is_empty());
    }

    #[test]
    fn test_new_job_validation() {
        assert!(NewJob::new("  ", json!({})).validate().is_err());
        let zero = JobOptions {
            attempts: 0,
            ..Default::default()
        };
        assert!(NewJob::new("x", json!({})).with_options(zero).validate().is_err());
        assert!(NewJob::new("x", json!({})).validate().is_ok());
    }
}
