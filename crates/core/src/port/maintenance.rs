// Event log maintenance port
use crate::error::Result;
use async_trait::async_trait;

/// Default retention for stored queue events (1 hour)
pub const DEFAULT_EVENT_RETENTION_MS: i64 = 60 * 60 * 1000;

/// Maintenance statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintenanceStats {
    pub events_pruned: u64,
    pub events_remaining: u64,
}

/// Maintenance configuration
#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    /// Events older than this are deleted (ms)
    pub event_retention_ms: i64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            event_retention_ms: DEFAULT_EVENT_RETENTION_MS,
        }
    }
}

/// Engine housekeeping operations
#[async_trait]
pub trait Maintenance: Send + Sync {
    /// Delete stored events created before `before_millis`
    ///
    /// # Returns
    /// Number of events deleted
    async fn prune_events(&self, before_millis: i64) -> Result<u64>;

    /// Number of stored events
    async fn event_count(&self) -> Result<u64>;

    /// Prune with the configured retention relative to `now_millis`
    async fn run_full_maintenance(
        &self,
        config: &MaintenanceConfig,
        now_millis: i64,
    ) -> Result<MaintenanceStats> {
        let events_pruned = self
            .prune_events(now_millis - config.event_retention_ms)
            .await?;
        let events_remaining = self.event_count().await?;
        Ok(MaintenanceStats {
            events_pruned,
            events_remaining,
        })
    }
}
