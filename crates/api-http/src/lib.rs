//! QueueDeck HTTP API
//!
//! Queue inspection and control over JSON, plus per-queue event streams
//! (server-sent events) backed by stream sessions.

pub mod auth;
pub mod error;
pub mod events;
pub mod jobs;
pub mod queues;
pub mod router;
pub mod server;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use router::create_router;
pub use server::{HttpServer, HttpServerConfig, HttpServerHandle};
pub use state::AppState;
