// Subscription Multiplexer
// One shared event source per queue name, reference counted across stream sessions

use crate::domain::ConnectionConfig;
use crate::error::{AppError, Result};
use crate::port::{EngineFactory, EventSource};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

struct Subscription {
    source: Arc<dyn EventSource>,
    ref_count: usize,
}

/// Shares one engine subscription across every session watching the same queue
pub struct SubscriptionMultiplexer {
    factory: Arc<dyn EngineFactory>,
    subscriptions: Mutex<HashMap<String, Subscription>>,
    // Written and read under the `subscriptions` lock
    closed: AtomicBool,
}

impl SubscriptionMultiplexer {
    pub fn new(factory: Arc<dyn EngineFactory>) -> Self {
        Self {
            factory,
            subscriptions: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Subscription>> {
        self.subscriptions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Return the shared source for `name`, opening it on first use
    ///
    /// Fails with `InvalidState` once `shutdown` has run.
    pub fn acquire(
        &self,
        name: &str,
        connection: Option<&ConnectionConfig>,
        prefix: Option<&str>,
    ) -> Result<Arc<dyn EventSource>> {
        let mut subscriptions = self.lock();
        if self.closed.load(Ordering::SeqCst) {
            return Err(AppError::InvalidState(
                "subscription multiplexer is shut down".to_string(),
            ));
        }
        if let Some(entry) = subscriptions.get_mut(name) {
            entry.ref_count += 1;
            return Ok(Arc::clone(&entry.source));
        }

        let source = self.factory.open_event_source(name, connection, prefix)?;
        subscriptions.insert(
            name.to_string(),
            Subscription {
                source: Arc::clone(&source),
                ref_count: 1,
            },
        );
        debug!(queue = %name, "Event subscription opened");
        Ok(source)
    }

    /// Acquire wrapped in a guard that releases on drop
    pub fn lease(
        self: &Arc<Self>,
        name: &str,
        connection: Option<&ConnectionConfig>,
        prefix: Option<&str>,
    ) -> Result<SubscriptionLease> {
        let source = self.acquire(name, connection, prefix)?;
        Ok(SubscriptionLease {
            mux: Arc::clone(self),
            name: name.to_string(),
            source,
            released: false,
        })
    }

    /// Drop one reference; returns the source to close when it was the last one
    ///
    /// The entry leaves the map before the caller closes the source, so an
    /// acquire arriving during the close opens a fresh source.
    fn detach(&self, name: &str) -> Option<Arc<dyn EventSource>> {
        let mut subscriptions = self.lock();
        let entry = subscriptions.get_mut(name)?;
        entry.ref_count = entry.ref_count.saturating_sub(1);
        if entry.ref_count > 0 {
            return None;
        }
        subscriptions.remove(name).map(|s| s.source)
    }

    /// Release one reference, closing the source when none remain
    ///
    /// Releasing a name with no subscription is a no-op.
    pub async fn release(&self, name: &str) {
        if let Some(source) = self.detach(name) {
            close_source(name, source).await;
        }
    }

    pub fn ref_count(&self, name: &str) -> usize {
        self.lock().get(name).map_or(0, |s| s.ref_count)
    }

    /// Names with an open subscription
    pub fn active(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Close every remaining source regardless of reference counts
    ///
    /// Later acquires fail; releases of outstanding leases become no-ops.
    pub async fn shutdown(&self) {
        let drained: Vec<(String, Arc<dyn EventSource>)> = {
            let mut subscriptions = self.lock();
            self.closed.store(true, Ordering::SeqCst);
            subscriptions
                .drain()
                .map(|(name, s)| (name, s.source))
                .collect()
        };
        if drained.is_empty() {
            return;
        }
        let count = drained.len();
        join_all(
            drained
                .into_iter()
                .map(|(name, source)| async move { close_source(&name, source).await }),
        )
        .await;
        info!(subscriptions = count, "Subscription multiplexer shut down");
    }
}

async fn close_source(name: &str, source: Arc<dyn EventSource>) {
    match source.close().await {
        Ok(()) => debug!(queue = %name, "Event subscription closed"),
        Err(e) => warn!(queue = %name, error = %e, "Failed to close event source"),
    }
}

/// One multiplexer reference held by a stream session
///
/// Call `release` on every exit path. Dropping an unreleased lease still
/// gives the reference back and closes the source in a background task.
pub struct SubscriptionLease {
    mux: Arc<SubscriptionMultiplexer>,
    name: String,
    source: Arc<dyn EventSource>,
    released: bool,
}

impl SubscriptionLease {
    pub fn source(&self) -> &Arc<dyn EventSource> {
        &self.source
    }

    pub fn queue_name(&self) -> &str {
        &self.name
    }

    pub async fn release(mut self) {
        self.released = true;
        self.mux.release(&self.name).await;
    }
}

impl Drop for SubscriptionLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Some(source) = self.mux.detach(&self.name) {
            let name = self.name.clone();
            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    runtime.spawn(async move { close_source(&name, source).await });
                }
                Err(_) => warn!(queue = %name, "No runtime to close event source"),
            }
        }
    }
}
