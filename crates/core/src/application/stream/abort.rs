// Abort signal for stream sessions
// Fired by the transport when the client goes away or the server shuts down

use tokio::sync::watch;
use std::sync::Arc;

/// Fires the abort; cloneable so transport and server can both hold one
#[derive(Clone)]
pub struct AbortHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl AbortHandle {
    pub fn abort(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Observed by the session at every loop iteration and await point
#[derive(Clone)]
pub struct AbortSignal {
    rx: watch::Receiver<bool>,
}

impl AbortSignal {
    /// Aborted explicitly, or every handle was dropped
    pub fn is_aborted(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Resolve once aborted
    pub async fn wait(&mut self) {
        // Err means every AbortHandle is gone: nobody can keep the session alive
        let _ = self.rx.wait_for(|aborted| *aborted).await;
    }
}

/// Create an abort handle/signal pair
pub fn abort_pair() -> (AbortHandle, AbortSignal) {
    let (tx, rx) = watch::channel(false);
    (AbortHandle { tx: Arc::new(tx) }, AbortSignal { rx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio_test::assert_pending;

    #[tokio::test]
    async fn test_abort_wakes_waiter() {
        let (handle, mut signal) = abort_pair();
        assert!(!signal.is_aborted());

        let waiter = tokio::spawn(async move {
            signal.wait().await;
            signal.is_aborted()
        });
        handle.abort();

        assert!(waiter.await.unwrap());
        assert!(handle.is_aborted());
    }

    #[tokio::test]
    async fn test_dropping_all_handles_counts_as_abort() {
        let (handle, mut signal) = abort_pair();
        let clone = handle.clone();
        drop(handle);
        assert!(!signal.is_aborted());
        drop(clone);

        assert!(signal.is_aborted());
        tokio::time::timeout(Duration::from_secs(1), signal.wait())
            .await
            .unwrap();
    }

    #[test]
    fn test_wait_pending_until_abort() {
        let (handle, mut signal) = abort_pair();
        let mut wait = tokio_test::task::spawn(signal.wait());
        assert_pending!(wait.poll());
        handle.abort();
        assert!(wait.is_woken());
    }
}
