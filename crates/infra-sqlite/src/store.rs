// SQLite job store for one queue key
// Every state change and its queue_events row are written in one transaction

use crate::error::map_sqlx_error;
use async_trait::async_trait;
use queuedeck_core::domain::{
    Job, JobCounts, JobId, JobOptions, JobState, NewJob, QueueEvent,
};
use queuedeck_core::error::{AppError, Result};
use queuedeck_core::port::{JobStore, TimeProvider};
use serde_json::Value;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use std::sync::Arc;
use tracing::debug;

/// Jobs of one queue key, backed by the shared pool
pub struct SqliteStore {
    pool: SqlitePool,
    key: String,
    name: String,
    time_provider: Arc<dyn TimeProvider>,
}

#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: i64,
    queue: String,
    name: String,
    data: String,
    opts: String,
    state: String,
    progress: String,
    attempts_made: i64,
    failed_reason: Option<String>,
    returnvalue: Option<String>,
    timestamp: i64,
    processed_on: Option<i64>,
    finished_on: Option<i64>,
    delay_until: Option<i64>,
}

impl JobRow {
    fn into_job(self) -> Result<Job> {
        Ok(Job {
            id: self.id.to_string(),
            queue: self.queue,
            name: self.name,
            data: serde_json::from_str(&self.data)?,
            opts: serde_json::from_str(&self.opts)?,
            state: self.state.parse::<JobState>()?,
            progress: serde_json::from_str(&self.progress)?,
            attempts_made: u32::try_from(self.attempts_made).unwrap_or(0),
            failed_reason: self.failed_reason,
            returnvalue: self
                .returnvalue
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            timestamp: self.timestamp,
            processed_on: self.processed_on,
            finished_on: self.finished_on,
            delay_until: self.delay_until,
        })
    }
}

/// Job ids are the integer primary key rendered as text
fn parse_id(job_id: &str) -> Result<i64> {
    job_id
        .parse::<i64>()
        .map_err(|_| AppError::NotFound(format!("job {}", job_id)))
}

/// SQLite treats a negative LIMIT as no limit
fn sql_limit(limit: usize) -> i64 {
    if limit == 0 {
        -1
    } else {
        i64::try_from(limit).unwrap_or(-1)
    }
}

impl SqliteStore {
    pub fn new(
        pool: SqlitePool,
        key: impl Into<String>,
        name: impl Into<String>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            pool,
            key: key.into(),
            name: name.into(),
            time_provider,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append one event row inside the caller's transaction
    async fn append_event(
        &self,
        conn: &mut SqliteConnection,
        event: &QueueEvent,
    ) -> Result<()> {
        let payload = serde_json::to_string(&Value::Object(event.fields.clone()))?;
        sqlx::query(
            "INSERT INTO queue_events (queue_key, event, payload, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&self.key)
        .bind(event.kind.as_str())
        .bind(payload)
        .bind(self.time_provider.now_millis())
        .execute(conn)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    pub async fn add(&self, new_job: NewJob, defaults: &JobOptions) -> Result<Job> {
        new_job.validate()?;
        let now = self.time_provider.now_millis();
        // Id is assigned by the insert
        let mut job = Job::new(String::new(), self.name.clone(), new_job, defaults, now);

        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO jobs (
                queue_key, queue, name, data, opts, state, priority, progress,
                attempts_made, timestamp, delay_until
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?)
            RETURNING id
            "#,
        )
        .bind(&self.key)
        .bind(&job.queue)
        .bind(&job.name)
        .bind(serde_json::to_string(&job.data)?)
        .bind(serde_json::to_string(&job.opts)?)
        .bind(job.state.as_str())
        .bind(job.opts.priority)
        .bind(serde_json::to_string(&job.progress)?)
        .bind(job.timestamp)
        .bind(job.delay_until)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        job.id = id.to_string();
        if job.state == JobState::Waiting {
            self.append_event(&mut tx, &QueueEvent::waiting(&job.id)).await?;
        }
        tx.commit().await.map_err(map_sqlx_error)?;

        debug!(queue = %self.key, job_id = %job.id, state = %job.state, "Job added");
        Ok(job)
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Option<Job>> {
        let Ok(id) = job_id.parse::<i64>() else {
            return Ok(None);
        };
        let row: Option<JobRow> =
            sqlx::query_as("SELECT * FROM jobs WHERE queue_key = ? AND id = ?")
                .bind(&self.key)
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
        row.map(JobRow::into_job).transpose()
    }

    /// Newest first; `start..=end` over the filtered list
    pub async fn get_jobs(&self, states: &[JobState], start: usize, end: usize) -> Result<Vec<Job>> {
        if end < start {
            return Ok(Vec::new());
        }
        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT * FROM jobs WHERE queue_key = ");
        query.push_bind(&self.key);
        if !states.is_empty() {
            query.push(" AND state IN (");
            let mut separated = query.separated(", ");
            for state in states {
                separated.push_bind(state.as_str());
            }
            separated.push_unseparated(")");
        }
        query.push(" ORDER BY id DESC LIMIT ");
        query.push_bind(sql_limit(end - start + 1));
        query.push(" OFFSET ");
        query.push_bind(i64::try_from(start).unwrap_or(i64::MAX));

        let rows: Vec<JobRow> = query
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        rows.into_iter().map(JobRow::into_job).collect()
    }

    pub async fn counts(&self) -> Result<JobCounts> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT state, COUNT(*) FROM jobs WHERE queue_key = ? GROUP BY state",
        )
        .bind(&self.key)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let mut counts = JobCounts::default();
        for (state, count) in rows {
            counts.set(state.parse::<JobState>()?, u64::try_from(count).unwrap_or(0));
        }
        Ok(counts)
    }

    pub async fn set_paused(&self, paused: bool) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO queue_meta (queue_key, paused) VALUES (?, ?)
            ON CONFLICT(queue_key) DO UPDATE SET paused = excluded.paused
            "#,
        )
        .bind(&self.key)
        .bind(paused)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    pub async fn is_paused(&self) -> Result<bool> {
        let paused: Option<bool> =
            sqlx::query_scalar("SELECT paused FROM queue_meta WHERE queue_key = ?")
                .bind(&self.key)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
        Ok(paused.unwrap_or(false))
    }

    pub async fn drain(&self, include_delayed: bool) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM jobs
            WHERE queue_key = ? AND (state = 'waiting' OR (? AND state = 'delayed'))
            "#,
        )
        .bind(&self.key)
        .bind(include_delayed)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(result.rows_affected())
    }

    pub async fn retry_jobs(&self, state: JobState, count: usize) -> Result<u64> {
        if !state.is_finished() {
            return Err(AppError::Validation(format!(
                "only completed or failed jobs can be retried, got {}",
                state
            )));
        }
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let ids: Vec<i64> = sqlx::query_scalar(
            r#"
            UPDATE jobs
            SET state = 'waiting', attempts_made = 0, failed_reason = NULL,
                returnvalue = NULL, processed_on = NULL, finished_on = NULL
            WHERE id IN (
                SELECT id FROM jobs WHERE queue_key = ? AND state = ?
                ORDER BY id ASC LIMIT ?
            )
            RETURNING id
            "#,
        )
        .bind(&self.key)
        .bind(state.as_str())
        .bind(sql_limit(count))
        .fetch_all(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        for id in &ids {
            self.append_event(&mut tx, &QueueEvent::waiting(&id.to_string()))
                .await?;
        }
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(ids.len() as u64)
    }

    pub async fn clean(&self, grace_ms: u64, limit: usize, state: JobState) -> Result<Vec<JobId>> {
        let grace = i64::try_from(grace_ms).unwrap_or(i64::MAX);
        let cutoff = self.time_provider.now_millis().saturating_sub(grace);
        let ids: Vec<i64> = sqlx::query_scalar(
            r#"
            DELETE FROM jobs
            WHERE id IN (
                SELECT id FROM jobs
                WHERE queue_key = ? AND state = ? AND COALESCE(finished_on, timestamp) <= ?
                ORDER BY id ASC LIMIT ?
            )
            RETURNING id
            "#,
        )
        .bind(&self.key)
        .bind(state.as_str())
        .bind(cutoff)
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(ids.into_iter().map(|id| id.to_string()).collect())
    }

    /// Update an active job to a terminal or delayed state and log the event
    async fn finish_active(
        &self,
        job_id: &JobId,
        sql: &str,
        binds: FinishBinds<'_>,
        event: QueueEvent,
    ) -> Result<()> {
        let id = parse_id(job_id)?;
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let result = sqlx::query(sql)
            .bind(binds.text)
            .bind(binds.at)
            .bind(&self.key)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        if result.rows_affected() == 0 {
            return Err(AppError::InvalidState(format!(
                "job {} is not active in {}",
                job_id, self.key
            )));
        }
        self.append_event(&mut tx, &event).await?;
        tx.commit().await.map_err(map_sqlx_error)
    }
}

struct FinishBinds<'a> {
    text: &'a str,
    at: i64,
}

#[async_trait]
impl JobStore for SqliteStore {
    fn queue_name(&self) -> &str {
        &self.name
    }

    async fn promote_delayed(&self, now: i64) -> Result<u64> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let ids: Vec<i64> = sqlx::query_scalar(
            r#"
            UPDATE jobs SET state = 'waiting', delay_until = NULL
            WHERE queue_key = ? AND state = 'delayed' AND COALESCE(delay_until, 0) <= ?
            RETURNING id
            "#,
        )
        .bind(&self.key)
        .bind(now)
        .fetch_all(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        for id in &ids {
            self.append_event(&mut tx, &QueueEvent::waiting(&id.to_string()))
                .await?;
        }
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(ids.len() as u64)
    }

    async fn claim_next(&self, now: i64) -> Result<Option<Job>> {
        if self.is_paused().await? {
            return Ok(None);
        }
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        // Subquery + UPDATE in one statement keeps the claim atomic across workers
        let row: Option<JobRow> = sqlx::query_as(
            r#"
            UPDATE jobs SET state = 'active', processed_on = ?
            WHERE id = (
                SELECT id FROM jobs
                WHERE queue_key = ? AND state = 'waiting'
                ORDER BY priority ASC, id ASC
                LIMIT 1
            )
            RETURNING *
            "#,
        )
        .bind(now)
        .bind(&self.key)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        let Some(row) = row else {
            tx.commit().await.map_err(map_sqlx_error)?;
            return Ok(None);
        };
        let job = row.into_job()?;
        self.append_event(&mut tx, &QueueEvent::active(&job.id)).await?;
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(Some(job))
    }

    async fn update_progress(&self, job_id: &JobId, progress: Value) -> Result<()> {
        let id = parse_id(job_id)?;
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let result = sqlx::query("UPDATE jobs SET progress = ? WHERE queue_key = ? AND id = ?")
            .bind(serde_json::to_string(&progress)?)
            .bind(&self.key)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("job {}", job_id)));
        }
        self.append_event(&mut tx, &QueueEvent::progress(job_id, progress))
            .await?;
        tx.commit().await.map_err(map_sqlx_error)
    }

    async fn complete(&self, job_id: &JobId, returnvalue: Value, now: i64) -> Result<()> {
        let encoded = serde_json::to_string(&returnvalue)?;
        self.finish_active(
            job_id,
            r#"
            UPDATE jobs SET state = 'completed', returnvalue = ?, finished_on = ?,
                attempts_made = attempts_made + 1
            WHERE queue_key = ? AND id = ? AND state = 'active'
            "#,
            FinishBinds { text: &encoded, at: now },
            QueueEvent::completed(job_id, returnvalue),
        )
        .await
    }

    async fn fail(&self, job_id: &JobId, reason: &str, now: i64) -> Result<()> {
        self.finish_active(
            job_id,
            r#"
            UPDATE jobs SET state = 'failed', failed_reason = ?, finished_on = ?,
                attempts_made = attempts_made + 1
            WHERE queue_key = ? AND id = ? AND state = 'active'
            "#,
            FinishBinds { text: reason, at: now },
            QueueEvent::failed(job_id, reason),
        )
        .await
    }

    async fn retry_later(&self, job_id: &JobId, reason: &str, run_at: i64) -> Result<()> {
        self.finish_active(
            job_id,
            r#"
            UPDATE jobs SET state = 'delayed', failed_reason = ?, delay_until = ?,
                processed_on = NULL, attempts_made = attempts_made + 1
            WHERE queue_key = ? AND id = ? AND state = 'active'
            "#,
            FinishBinds { text: reason, at: run_at },
            QueueEvent::failed(job_id, reason),
        )
        .await
    }

    async fn recover_stalled(&self) -> Result<Vec<JobId>> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let ids: Vec<i64> = sqlx::query_scalar(
            r#"
            UPDATE jobs SET state = 'waiting', processed_on = NULL
            WHERE queue_key = ? AND state = 'active'
            RETURNING id
            "#,
        )
        .bind(&self.key)
        .fetch_all(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        let ids: Vec<JobId> = ids.into_iter().map(|id| id.to_string()).collect();
        for id in &ids {
            self.append_event(&mut tx, &QueueEvent::stalled(id)).await?;
        }
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool, run_migrations};
    use queuedeck_core::domain::ConnectionConfig;
    use queuedeck_core::port::time_provider::mocks::ManualTimeProvider;
    use serde_json::json;

    async fn setup() -> (SqlitePool, Arc<ManualTimeProvider>) {
        let pool = create_pool(&ConnectionConfig::new("sqlite::memory:"))
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();
        (pool, Arc::new(ManualTimeProvider::new(1_000)))
    }

    async fn event_kinds(pool: &SqlitePool, key: &str) -> Vec<String> {
        sqlx::query_scalar("SELECT event FROM queue_events WHERE queue_key = ? ORDER BY id")
            .bind(key)
            .fetch_all(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_add_claim_complete_logs_events() {
        let (pool, time) = setup().await;
        let store = SqliteStore::new(pool.clone(), "emails", "emails", time);

        let job = store
            .add(NewJob::new("send", json!({"to": "a@b"})), &JobOptions::default())
            .await
            .unwrap();
        assert_eq!(job.id, "1");
        assert_eq!(job.state, JobState::Waiting);

        let claimed = store.claim_next(1_100).await.unwrap().unwrap();
        assert_eq!(claimed.id, job.id);
        assert_eq!(claimed.state, JobState::Active);
        assert_eq!(claimed.processed_on, Some(1_100));

        store.complete(&job.id, json!("sent"), 1_200).await.unwrap();
        let done = store.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(done.state, JobState::Completed);
        assert_eq!(done.returnvalue, Some(json!("sent")));
        assert_eq!(done.attempts_made, 1);

        assert_eq!(
            event_kinds(&pool, "emails").await,
            vec!["waiting", "active", "completed"]
        );
        assert_eq!(store.counts().await.unwrap().completed, 1);
    }

    #[tokio::test]
    async fn test_complete_requires_active() {
        let (pool, time) = setup().await;
        let store = SqliteStore::new(pool, "emails", "emails", time);
        let job = store
            .add(NewJob::new("send", json!({})), &JobOptions::default())
            .await
            .unwrap();

        let err = store.complete(&job.id, json!(null), 1_000).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_claim_respects_priority_and_pause() {
        let (pool, time) = setup().await;
        let store = SqliteStore::new(pool, "q", "q", time);
        let low = JobOptions { priority: 5, ..Default::default() };
        store.add(NewJob::new("low", json!({})).with_options(low), &JobOptions::default()).await.unwrap();
        let urgent = store.add(NewJob::new("urgent", json!({})), &JobOptions::default()).await.unwrap();

        store.set_paused(true).await.unwrap();
        assert!(store.claim_next(1_000).await.unwrap().is_none());

        store.set_paused(false).await.unwrap();
        assert_eq!(store.claim_next(1_000).await.unwrap().unwrap().id, urgent.id);
    }

    #[tokio::test]
    async fn test_keys_are_isolated() {
        let (pool, time) = setup().await;
        let a = SqliteStore::new(pool.clone(), "qd:emails", "emails", time.clone());
        let b = SqliteStore::new(pool, "emails", "emails", time);
        a.add(NewJob::new("send", json!({})), &JobOptions::default()).await.unwrap();

        assert_eq!(a.counts().await.unwrap().waiting, 1);
        assert_eq!(b.counts().await.unwrap().waiting, 0);
        assert!(b.get_job("1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delayed_job_is_promoted() {
        let (pool, time) = setup().await;
        let store = SqliteStore::new(pool, "q", "q", time.clone());
        let opts = JobOptions { delay: 500, ..Default::default() };
        let job = store
            .add(NewJob::new("later", json!({})).with_options(opts), &JobOptions::default())
            .await
            .unwrap();
        assert_eq!(job.state, JobState::Delayed);
        assert_eq!(job.delay_until, Some(1_500));

        assert_eq!(store.promote_delayed(1_499).await.unwrap(), 0);
        assert_eq!(store.promote_delayed(1_500).await.unwrap(), 1);
        assert_eq!(store.counts().await.unwrap().waiting, 1);
    }

    #[tokio::test]
    async fn test_retry_later_then_fail() {
        let (pool, time) = setup().await;
        let store = SqliteStore::new(pool.clone(), "q", "q", time);
        let job = store.add(NewJob::new("flaky", json!({})), &JobOptions::default()).await.unwrap();

        store.claim_next(1_000).await.unwrap();
        store.retry_later(&job.id, "boom", 2_000).await.unwrap();
        let delayed = store.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(delayed.state, JobState::Delayed);
        assert_eq!(delayed.attempts_made, 1);
        assert_eq!(delayed.failed_reason.as_deref(), Some("boom"));

        store.promote_delayed(2_000).await.unwrap();
        store.claim_next(2_000).await.unwrap();
        store.fail(&job.id, "boom again", 2_100).await.unwrap();

        let failed = store.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(failed.state, JobState::Failed);
        assert_eq!(failed.attempts_made, 2);

        let kinds = event_kinds(&pool, "q").await;
        assert_eq!(kinds.iter().filter(|k| *k == "failed").count(), 2);
    }

    #[tokio::test]
    async fn test_retry_and_clean_finished_jobs() {
        let (pool, time) = setup().await;
        let store = SqliteStore::new(pool, "q", "q", time.clone());
        for _ in 0..3 {
            let job = store.add(NewJob::new("x", json!({})), &JobOptions::default()).await.unwrap();
            store.claim_next(1_000).await.unwrap();
            store.fail(&job.id, "nope", 1_000).await.unwrap();
        }

        assert!(matches!(
            store.retry_jobs(JobState::Waiting, 0).await,
            Err(AppError::Validation(_))
        ));
        assert_eq!(store.retry_jobs(JobState::Failed, 1).await.unwrap(), 1);
        let counts = store.counts().await.unwrap();
        assert_eq!((counts.waiting, counts.failed), (1, 2));

        time.advance(10_000);
        assert!(store.clean(60_000, 0, JobState::Failed).await.unwrap().is_empty());
        assert!(store.clean(u64::MAX, 0, JobState::Failed).await.unwrap().is_empty());
        let removed = store.clean(5_000, 1, JobState::Failed).await.unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(store.counts().await.unwrap().failed, 1);
    }

    #[tokio::test]
    async fn test_get_jobs_newest_first_with_range() {
        let (pool, time) = setup().await;
        let store = SqliteStore::new(pool, "q", "q", time);
        for i in 0..4 {
            store.add(NewJob::new(format!("job-{}", i), json!({})), &JobOptions::default()).await.unwrap();
        }

        let page = store.get_jobs(&[JobState::Waiting], 1, 2).await.unwrap();
        let names: Vec<&str> = page.iter().map(|j| j.name.as_str()).collect();
        assert_eq!(names, vec!["job-2", "job-1"]);
        assert!(store.get_jobs(&[JobState::Failed], 0, 10).await.unwrap().is_empty());
        assert_eq!(store.get_jobs(&[], 0, 100).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_drain_and_recover_stalled() {
        let (pool, time) = setup().await;
        let store = SqliteStore::new(pool.clone(), "q", "q", time);
        let delayed = JobOptions { delay: 1_000, ..Default::default() };
        store.add(NewJob::new("a", json!({})), &JobOptions::default()).await.unwrap();
        store.add(NewJob::new("b", json!({})), &JobOptions::default()).await.unwrap();
        store.add(NewJob::new("c", json!({})).with_options(delayed), &JobOptions::default()).await.unwrap();

        store.claim_next(1_000).await.unwrap();
        assert_eq!(store.recover_stalled().await.unwrap(), vec!["1".to_string()]);
        assert_eq!(event_kinds(&pool, "q").await.last().map(String::as_str), Some("stalled"));

        assert_eq!(store.drain(false).await.unwrap(), 2);
        assert_eq!(store.counts().await.unwrap().delayed, 1);
        assert_eq!(store.drain(true).await.unwrap(), 1);
    }
}
