// Route table

use crate::auth::require_api_key;
use crate::state::AppState;
use crate::{events, jobs, queues};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

/// Basic health check (always OK while the server runs)
pub async fn health_check() -> &'static str {
    "OK"
}

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/queues", get(queues::list_queues))
        .route("/queues/:name", get(queues::get_queue))
        .route("/queues/:name/jobs", get(jobs::list_jobs).post(jobs::add_job))
        .route("/queues/:name/jobs/:id", get(jobs::get_job))
        .route("/queues/:name/pause", post(queues::pause_queue))
        .route("/queues/:name/resume", post(queues::resume_queue))
        .route("/queues/:name/drain", post(queues::drain_queue))
        .route("/queues/:name/retry", post(queues::retry_jobs))
        .route("/queues/:name/clean", post(queues::clean_queue))
        .route("/queues/:name/events", get(events::stream_events))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_api_key));

    Router::new()
        .route("/health", get(health_check))
        .merge(api)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
