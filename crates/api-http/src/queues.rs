// Queue-level handlers

use crate::error::ApiResult;
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    Json,
};
use queuedeck_core::domain::{JobCounts, JobId, JobState};
use queuedeck_core::port::QueueHandle;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Serialize, Deserialize)]
pub struct QueueSummary {
    pub name: String,
    pub paused: bool,
    pub counts: JobCounts,
}

async fn summarize(name: &str, queue: &dyn QueueHandle) -> ApiResult<QueueSummary> {
    Ok(QueueSummary {
        name: name.to_string(),
        paused: queue.is_paused().await?,
        counts: queue.get_job_counts().await?,
    })
}

/// GET /queues
pub async fn list_queues(State(state): State<AppState>) -> ApiResult<Json<Vec<QueueSummary>>> {
    let mut summaries = Vec::new();
    for name in state.registry.names() {
        let handle = state.registry.get(name)?;
        summaries.push(summarize(name, handle.queue.as_ref()).await?);
    }
    Ok(Json(summaries))
}

/// GET /queues/:name
pub async fn get_queue(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<QueueSummary>> {
    let handle = state.registry.get(&name)?;
    Ok(Json(summarize(&name, handle.queue.as_ref()).await?))
}

/// POST /queues/:name/pause
pub async fn pause_queue(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<QueueSummary>> {
    let handle = state.registry.get(&name)?;
    handle.queue.pause().await?;
    info!(queue = %name, "Queue paused");
    Ok(Json(summarize(&name, handle.queue.as_ref()).await?))
}

/// POST /queues/:name/resume
pub async fn resume_queue(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<QueueSummary>> {
    let handle = state.registry.get(&name)?;
    handle.queue.resume().await?;
    info!(queue = %name, "Queue resumed");
    Ok(Json(summarize(&name, handle.queue.as_ref()).await?))
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DrainRequest {
    /// Also remove delayed jobs
    pub delayed: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CountResponse {
    pub count: u64,
}

/// POST /queues/:name/drain
pub async fn drain_queue(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<DrainRequest>,
) -> ApiResult<Json<CountResponse>> {
    let handle = state.registry.get(&name)?;
    let count = handle.queue.drain(req.delayed).await?;
    info!(queue = %name, count, delayed = req.delayed, "Queue drained");
    Ok(Json(CountResponse { count }))
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryRequest {
    pub state: JobState,
    /// 0 retries every matching job
    pub count: usize,
}

impl Default for RetryRequest {
    fn default() -> Self {
        Self {
            state: JobState::Failed,
            count: 0,
        }
    }
}

/// POST /queues/:name/retry
pub async fn retry_jobs(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<RetryRequest>,
) -> ApiResult<Json<CountResponse>> {
    let handle = state.registry.get(&name)?;
    let count = handle.queue.retry_jobs(req.state, req.count).await?;
    info!(queue = %name, count, state = %req.state, "Jobs retried");
    Ok(Json(CountResponse { count }))
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanRequest {
    pub grace_ms: u64,
    /// 0 means no limit
    pub limit: usize,
    pub state: JobState,
}

impl Default for CleanRequest {
    fn default() -> Self {
        Self {
            grace_ms: 0,
            limit: 0,
            state: JobState::Completed,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CleanResponse {
    pub removed: Vec<JobId>,
}

/// POST /queues/:name/clean
pub async fn clean_queue(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<CleanRequest>,
) -> ApiResult<Json<CleanResponse>> {
    let handle = state.registry.get(&name)?;
    let removed = handle
        .queue
        .clean(req.grace_ms, req.limit, req.state)
        .await?;
    info!(queue = %name, removed = removed.len(), state = %req.state, "Queue cleaned");
    Ok(Json(CleanResponse { removed }))
}
