// Maintenance Service
// Periodic pruning of the engine's event log

use crate::application::shutdown::ShutdownToken;
use crate::error::Result;
use crate::port::maintenance::{Maintenance, MaintenanceConfig, MaintenanceStats};
use crate::port::TimeProvider;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

/// Maintenance scheduler
///
/// Runs maintenance every `period` until shutdown; spawn with tokio::spawn
pub struct MaintenanceScheduler {
    maintenance: Arc<dyn Maintenance>,
    config: MaintenanceConfig,
    period: Duration,
    time_provider: Arc<dyn TimeProvider>,
}

impl MaintenanceScheduler {
    pub fn new(
        maintenance: Arc<dyn Maintenance>,
        config: MaintenanceConfig,
        period: Duration,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            maintenance,
            config,
            period,
            time_provider,
        }
    }

    /// Run maintenance loop (background task)
    pub async fn run(self, mut shutdown: ShutdownToken) {
        info!(
            period_secs = self.period.as_secs(),
            retention_ms = self.config.event_retention_ms,
            "Maintenance scheduler started"
        );

        let mut tick = interval(self.period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // First tick completes immediately; skip it so startup stays quiet
        tick.tick().await;

        loop {
            tokio::select! {
                _ = tick.tick() => {}
                _ = shutdown.wait() => break,
            }

            if let Err(e) = self.run_now().await {
                error!(error = %e, "Scheduled maintenance failed");
            }
        }
        info!("Maintenance scheduler stopped");
    }

    /// Run maintenance immediately
    pub async fn run_now(&self) -> Result<MaintenanceStats> {
        let now = self.time_provider.now_millis();
        let stats = self
            .maintenance
            .run_full_maintenance(&self.config, now)
            .await?;
        info!(
            events_pruned = stats.events_pruned,
            events_remaining = stats.events_remaining,
            "Maintenance completed"
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::shutdown::shutdown_channel;
    use crate::port::time_provider::mocks::ManualTimeProvider;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingMaintenance {
        cutoffs: Mutex<Vec<i64>>,
    }

    #[async_trait]
    impl Maintenance for RecordingMaintenance {
        async fn prune_events(&self, before_millis: i64) -> Result<u64> {
            self.cutoffs.lock().unwrap().push(before_millis);
            Ok(2)
        }
        async fn event_count(&self) -> Result<u64> {
            Ok(5)
        }
    }

    #[tokio::test]
    async fn test_run_now_uses_retention_cutoff() {
        let maintenance = Arc::new(RecordingMaintenance::default());
        let scheduler = MaintenanceScheduler::new(
            maintenance.clone(),
            MaintenanceConfig {
                event_retention_ms: 1_000,
            },
            Duration::from_secs(60),
            Arc::new(ManualTimeProvider::new(10_000)),
        );

        let stats = scheduler.run_now().await.unwrap();
        assert_eq!(
            stats,
            MaintenanceStats {
                events_pruned: 2,
                events_remaining: 5
            }
        );
        assert_eq!(*maintenance.cutoffs.lock().unwrap(), vec![9_000]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_ticks_until_shutdown() {
        let maintenance = Arc::new(RecordingMaintenance::default());
        let scheduler = MaintenanceScheduler::new(
            maintenance.clone(),
            MaintenanceConfig::default(),
            Duration::from_secs(60),
            Arc::new(ManualTimeProvider::new(0)),
        );
        let (sender, token) = shutdown_channel();
        let task = tokio::spawn(scheduler.run(token));

        tokio::time::sleep(Duration::from_secs(150)).await;
        sender.shutdown();
        task.await.unwrap();

        assert_eq!(maintenance.cutoffs.lock().unwrap().len(), 2);
    }
}
