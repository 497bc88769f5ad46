// Stalled job recovery
use crate::error::Result;
use crate::port::JobStore;
use std::sync::Arc;
use tracing::{info, warn};

/// On worker start, moves jobs left active by a previous process back to waiting
///
/// The store emits a `stalled` event for each recovered job.
pub struct StalledJobRecovery {
    store: Arc<dyn JobStore>,
}

impl StalledJobRecovery {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// Returns the number of recovered jobs
    pub async fn recover(&self) -> Result<usize> {
        let recovered = self.store.recover_stalled().await?;
        if recovered.is_empty() {
            return Ok(0);
        }
        for job_id in &recovered {
            warn!(queue = %self.store.queue_name(), job_id = %job_id, "Stalled job moved back to waiting");
        }
        info!(
            queue = %self.store.queue_name(),
            recovered = recovered.len(),
            "Stalled job recovery complete"
        );
        Ok(recovered.len())
    }
}
