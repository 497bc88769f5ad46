// Job handlers

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use queuedeck_core::domain::{Job, JobState, NewJob};
use serde::Deserialize;
use tracing::debug;

/// Page size when `end` is not given
pub const DEFAULT_PAGE_SIZE: usize = 50;

#[derive(Debug, Default, Deserialize)]
pub struct ListJobsQuery {
    /// Comma-separated states; all states when absent
    pub state: Option<String>,
    pub start: Option<usize>,
    pub end: Option<usize>,
}

impl ListJobsQuery {
    fn states(&self) -> ApiResult<Vec<JobState>> {
        match self.state.as_deref() {
            None | Some("") => Ok(Vec::new()),
            Some(raw) => raw
                .split(',')
                .map(|s| {
                    s.trim()
                        .parse::<JobState>()
                        .map_err(|e| ApiError::bad_request(e.to_string()))
                })
                .collect(),
        }
    }

    fn range(&self) -> (usize, usize) {
        let start = self.start.unwrap_or(0);
        let end = self
            .end
            .unwrap_or_else(|| start.saturating_add(DEFAULT_PAGE_SIZE - 1));
        (start, end)
    }
}

/// GET /queues/:name/jobs
pub async fn list_jobs(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<ListJobsQuery>,
) -> ApiResult<Json<Vec<Job>>> {
    let states = query.states()?;
    let (start, end) = query.range();
    let handle = state.registry.get(&name)?;
    Ok(Json(handle.queue.get_jobs(&states, start, end).await?))
}

/// POST /queues/:name/jobs
pub async fn add_job(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(new_job): Json<NewJob>,
) -> ApiResult<(StatusCode, Json<Job>)> {
    let handle = state.registry.get(&name)?;
    let job = handle.queue.add(new_job).await?;
    debug!(queue = %name, job_id = %job.id, "Job added via API");
    Ok((StatusCode::CREATED, Json(job)))
}

/// GET /queues/:name/jobs/:id
pub async fn get_job(
    State(state): State<AppState>,
    Path((name, id)): Path<(String, String)>,
) -> ApiResult<Json<Job>> {
    let handle = state.registry.get(&name)?;
    handle
        .queue
        .get_job(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("Job {} not found in {}", id, name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_parsing() {
        let query = ListJobsQuery {
            state: Some("failed, completed".to_string()),
            start: Some(10),
            end: None,
        };
        assert_eq!(query.states().unwrap(), vec![JobState::Failed, JobState::Completed]);
        assert_eq!(query.range(), (10, 59));

        let bad = ListJobsQuery {
            state: Some("lost".to_string()),
            ..Default::default()
        };
        assert_eq!(bad.states().unwrap_err().status, StatusCode::BAD_REQUEST);
        assert!(ListJobsQuery::default().states().unwrap().is_empty());
    }
}
