// EventSource fed from a MemoryStore's bus

use crate::store::{MemoryStore, EVENT_BUS_CAPACITY};
use async_trait::async_trait;
use queuedeck_core::domain::QueueEvent;
use queuedeck_core::error::Result;
use queuedeck_core::port::event_source::closed_receiver;
use queuedeck_core::port::EventSource;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::debug;

struct Feed {
    tx: broadcast::Sender<QueueEvent>,
    pump: JoinHandle<()>,
}

/// Forwards the store bus into a channel this source alone can close
pub struct MemoryEventSource {
    queue: String,
    feed: Mutex<Option<Feed>>,
}

impl MemoryEventSource {
    /// Must be called within a Tokio runtime
    pub fn open(queue: impl Into<String>, store: &MemoryStore) -> Self {
        let queue = queue.into();
        let (tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        let mut upstream = store.subscribe();
        let forward = tx.clone();
        let name = queue.clone();

        let pump = tokio::spawn(async move {
            loop {
                match upstream.recv().await {
                    Ok(event) => {
                        // No listeners is fine: events are not buffered for late subscribers
                        let _ = forward.send(event);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(queue = %name, skipped, "Memory event pump lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        Self {
            queue,
            feed: Mutex::new(Some(Feed { tx, pump })),
        }
    }

    fn with_feed<T>(&self, f: impl FnOnce(Option<&Feed>) -> T) -> T {
        let feed = self.feed.lock().unwrap_or_else(|e| e.into_inner());
        f(feed.as_ref())
    }
}

#[async_trait]
impl EventSource for MemoryEventSource {
    fn queue_name(&self) -> &str {
        &self.queue
    }

    fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.with_feed(|feed| feed.map_or_else(closed_receiver, |f| f.tx.subscribe()))
    }

    fn listener_count(&self) -> usize {
        self.with_feed(|feed| feed.map_or(0, |f| f.tx.receiver_count()))
    }

    fn is_closed(&self) -> bool {
        self.with_feed(|feed| feed.is_none())
    }

    async fn close(&self) -> Result<()> {
        let feed = self.feed.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(feed) = feed {
            // Aborting the pump drops its sender; with ours dropped too, listeners see Closed
            feed.pump.abort();
            drop(feed.tx);
            let _ = feed.pump.await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use queuedeck_core::domain::EventKind;
    use queuedeck_core::port::SystemTimeProvider;

    fn store() -> MemoryStore {
        MemoryStore::new("emails", "emails", Arc::new(SystemTimeProvider))
    }

    #[tokio::test]
    async fn test_forwards_store_events() {
        let store = store();
        let source = MemoryEventSource::open("emails", &store);
        let mut rx = source.subscribe();
        assert_eq!(source.listener_count(), 1);

        store.publish(QueueEvent::completed(&"1".to_string(), serde_json::json!(true)));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::Completed);
    }

    #[tokio::test]
    async fn test_close_ends_listeners() {
        let store = store();
        let source = MemoryEventSource::open("emails", &store);
        let mut rx = source.subscribe();

        source.close().await.unwrap();
        assert!(source.is_closed());
        assert!(matches!(rx.recv().await, Err(RecvError::Closed)));
        assert!(matches!(source.subscribe().recv().await, Err(RecvError::Closed)));

        // Closing twice is harmless
        source.close().await.unwrap();
    }
}
