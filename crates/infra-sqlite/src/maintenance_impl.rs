// SQLite Maintenance Implementation
use crate::error::map_sqlx_error;
use async_trait::async_trait;
use queuedeck_core::error::Result;
use queuedeck_core::port::Maintenance;
use sqlx::SqlitePool;
use tracing::info;

/// Event log pruning for the live engine
pub struct SqliteMaintenance {
    pool: SqlitePool,
}

impl SqliteMaintenance {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Maintenance for SqliteMaintenance {
    async fn prune_events(&self, before_millis: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM queue_events WHERE created_at < ?")
            .bind(before_millis)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        let deleted = result.rows_affected();
        if deleted > 0 {
            info!(deleted, before_millis, "Pruned queue events");
        }
        Ok(deleted)
    }

    async fn event_count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM queue_events")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}
