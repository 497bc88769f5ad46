// Shared application state

use queuedeck_core::application::{
    QueueRegistry, ShutdownToken, StreamConfig, SubscriptionMultiplexer,
};
use queuedeck_core::port::{SystemTimeProvider, TimeProvider};
use std::sync::Arc;

/// Handed to every handler; cheap to clone
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<QueueRegistry>,
    pub multiplexer: Arc<SubscriptionMultiplexer>,
    pub time: Arc<dyn TimeProvider>,
    pub stream_config: StreamConfig,
    /// Fires when the server is stopping; open event streams end on it
    pub shutdown: ShutdownToken,
    /// Accepted API keys; empty disables authentication
    pub api_keys: Arc<Vec<String>>,
}

impl AppState {
    pub fn new(
        registry: Arc<QueueRegistry>,
        multiplexer: Arc<SubscriptionMultiplexer>,
        shutdown: ShutdownToken,
    ) -> Self {
        Self {
            registry,
            multiplexer,
            time: Arc::new(SystemTimeProvider),
            stream_config: StreamConfig::default(),
            shutdown,
            api_keys: Arc::new(Vec::new()),
        }
    }

    pub fn with_stream_config(mut self, stream_config: StreamConfig) -> Self {
        self.stream_config = stream_config;
        self
    }

    pub fn with_api_keys(mut self, api_keys: Vec<String>) -> Self {
        self.api_keys = Arc::new(api_keys);
        self
    }

    pub fn with_time_provider(mut self, time: Arc<dyn TimeProvider>) -> Self {
        self.time = time;
        self
    }
}
