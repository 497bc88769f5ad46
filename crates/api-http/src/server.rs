//! HTTP Server
//!
//! Binds the router and serves until the shutdown token fires.

use crate::router::create_router;
use crate::state::AppState;
use queuedeck_core::error::{AppError, Result};
use std::net::SocketAddr;
use tokio::task::JoinHandle;
use tracing::{error, info};

const DEFAULT_HTTP_HOST: &str = "127.0.0.1";
const DEFAULT_HTTP_PORT: u16 = 8520;

/// HTTP Server Configuration
#[derive(Debug, Clone)]
pub struct HttpServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HTTP_HOST.to_string(),
            port: DEFAULT_HTTP_PORT,
        }
    }
}

/// HTTP Server
pub struct HttpServer {
    config: HttpServerConfig,
    state: AppState,
}

/// Running server
pub struct HttpServerHandle {
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl HttpServerHandle {
    /// Bound address (useful with port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait for the server to finish after the shutdown token fires
    ///
    /// Open event streams observe the same token and end first.
    pub async fn wait(self) {
        if let Err(e) = self.task.await {
            error!(error = %e, "HTTP server task failed");
        }
    }
}

impl HttpServer {
    pub fn new(config: HttpServerConfig, state: AppState) -> Self {
        Self { config, state }
    }

    /// Bind and start serving in the background
    pub async fn start(self) -> Result<HttpServerHandle> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| AppError::Config(format!("Failed to bind HTTP address {}: {}", addr, e)))?;
        let local_addr = listener.local_addr()?;

        info!(address = %local_addr, "HTTP server listening");

        let mut shutdown = self.state.shutdown.clone();
        let router = create_router(self.state);
        let task = tokio::spawn(async move {
            let graceful = async move { shutdown.wait().await };
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(graceful)
                .await
            {
                error!(error = %e, "HTTP server error");
            }
            info!("HTTP server shut down gracefully");
        });

        Ok(HttpServerHandle { local_addr, task })
    }
}
