// Event Source Port
// Change feed for one queue, shared by every stream session watching it

use crate::domain::QueueEvent;
use crate::error::Result;
use async_trait::async_trait;
use tokio::sync::broadcast;

/// Engine object emitting change notifications for one queue
#[async_trait]
pub trait EventSource: Send + Sync {
    fn queue_name(&self) -> &str;

    /// Attach a listener; dropping the receiver detaches it
    ///
    /// After `close` the returned receiver yields `RecvError::Closed`.
    fn subscribe(&self) -> broadcast::Receiver<QueueEvent>;

    /// Number of attached listeners
    fn listener_count(&self) -> usize;

    fn is_closed(&self) -> bool;

    /// Stop the feed; attached listeners observe `Closed`
    async fn close(&self) -> Result<()>;
}

/// Receiver that is already closed (for sources that were shut down)
pub fn closed_receiver() -> broadcast::Receiver<QueueEvent> {
    let (_tx, rx) = broadcast::channel(1);
    rx
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const MOCK_CHANNEL_CAPACITY: usize = 64;

    /// Event source driven by the test through `emit`
    pub struct MockEventSource {
        queue: String,
        tx: Mutex<Option<broadcast::Sender<QueueEvent>>>,
        close_calls: AtomicUsize,
        fail_close: bool,
    }

    impl MockEventSource {
        pub fn new(queue: impl Into<String>) -> Self {
            let (tx, _) = broadcast::channel(MOCK_CHANNEL_CAPACITY);
            Self {
                queue: queue.into(),
                tx: Mutex::new(Some(tx)),
                close_calls: AtomicUsize::new(0),
                fail_close: false,
            }
        }

        pub fn failing_close(mut self) -> Self {
            self.fail_close = true;
            self
        }

        /// Deliver an event to every listener; returns how many received it
        pub fn emit(&self, event: QueueEvent) -> usize {
            match self.tx.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
                Some(tx) => tx.send(event).unwrap_or(0),
                None => 0,
            }
        }

        pub fn close_calls(&self) -> usize {
            self.close_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl EventSource for MockEventSource {
        fn queue_name(&self) -> &str {
            &self.queue
        }
        fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
            match self.tx.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
                Some(tx) => tx.subscribe(),
                None => closed_receiver(),
            }
        }
        fn listener_count(&self) -> usize {
            self.tx
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .as_ref()
                .map_or(0, |tx| tx.receiver_count())
        }
        fn is_closed(&self) -> bool {
            self.tx.lock().unwrap_or_else(|e| e.into_inner()).is_none()
        }
        async fn close(&self) -> Result<()> {
            self.close_calls.fetch_add(1, Ordering::SeqCst);
            self.tx.lock().unwrap_or_else(|e| e.into_inner()).take();
            if self.fail_close {
                return Err(AppError::Internal("close failed".to_string()));
            }
            Ok(())
        }
    }
}
