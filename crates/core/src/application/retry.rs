// Retry policy: attempts and backoff between them
use crate::domain::{Backoff, BackoffKind, Job};
use tracing::{info, warn};

/// Upper bound for a single backoff delay (1 hour)
pub const MAX_BACKOFF_MS: u64 = 60 * 60 * 1000;

/// Retry decision result
#[derive(Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry the job after this many ms
    Retry(u64),
    /// Do not retry, job has failed permanently
    Failed,
}

/// Decides whether a failed attempt gets another run
///
/// - `attempts` counts every run, so `attempts = 1` means no retry
/// - fixed backoff waits `delay` each time
/// - exponential backoff waits `delay * 2^(attempt - 1)`
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryPolicy;

impl RetryPolicy {
    pub fn new() -> Self {
        Self
    }

    /// Decide for a job whose current attempt just failed
    ///
    /// `job.attempts_made` does not yet include the failed attempt.
    pub fn should_retry(&self, job: &Job) -> RetryDecision {
        let attempt = job.attempts_made + 1;
        if attempt >= job.opts.attempts {
            warn!(
                job_id = %job.id,
                attempts = attempt,
                max_attempts = job.opts.attempts,
                "Max retry attempts reached"
            );
            return RetryDecision::Failed;
        }

        let delay_ms = job
            .opts
            .backoff
            .as_ref()
            .map_or(0, |backoff| Self::backoff_delay(backoff, attempt));

        info!(
            job_id = %job.id,
            attempt,
            max_attempts = job.opts.attempts,
            delay_ms,
            "Scheduling retry"
        );
        RetryDecision::Retry(delay_ms)
    }

    /// Delay before the attempt following `attempt` (1-based)
    pub fn backoff_delay(backoff: &Backoff, attempt: u32) -> u64 {
        let delay = match backoff.kind {
            BackoffKind::Fixed => backoff.delay,
            BackoffKind::Exponential => {
                let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
                backoff.delay.saturating_mul(factor)
            }
        };
        delay.min(MAX_BACKOFF_MS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{JobOptions, NewJob};
    use serde_json::json;

    fn job_with(opts: JobOptions, attempts_made: u32) -> Job {
        let mut job = Job::new(
            "1".to_string(),
            "emails",
            NewJob::new("send", json!({})).with_options(opts),
            &JobOptions::default(),
            0,
        );
        job.attempts_made = attempts_made;
        job
    }

    #[test]
    fn test_single_attempt_never_retries() {
        let job = job_with(JobOptions::default(), 0);
        assert_eq!(RetryPolicy::new().should_retry(&job), RetryDecision::Failed);
    }

    #[test]
    fn test_retries_until_attempts_exhausted() {
        let opts = JobOptions {
            attempts: 3,
            ..Default::default()
        };
        let policy = RetryPolicy::new();
        assert_eq!(policy.should_retry(&job_with(opts.clone(), 0)), RetryDecision::Retry(0));
        assert_eq!(policy.should_retry(&job_with(opts.clone(), 1)), RetryDecision::Retry(0));
        assert_eq!(policy.should_retry(&job_with(opts, 2)), RetryDecision::Failed);
    }

    #[test]
    fn test_exponential_backoff() {
        let backoff = Backoff {
            kind: BackoffKind::Exponential,
            delay: 1000,
        };
        assert_eq!(RetryPolicy::backoff_delay(&backoff, 1), 1000);
        assert_eq!(RetryPolicy::backoff_delay(&backoff, 2), 2000);
        assert_eq!(RetryPolicy::backoff_delay(&backoff, 4), 8000);
        assert_eq!(RetryPolicy::backoff_delay(&backoff, 64), MAX_BACKOFF_MS);
    }

    #[test]
    fn test_fixed_backoff_applied_to_retry() {
        let opts = JobOptions {
            attempts: 5,
            backoff: Some(Backoff {
                kind: BackoffKind::Fixed,
                delay: 250,
            }),
            ..Default::default()
        };
        assert_eq!(
            RetryPolicy::new().should_retry(&job_with(opts, 3)),
            RetryDecision::Retry(250)
        );
    }
}
