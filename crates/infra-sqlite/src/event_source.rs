// EventSource tailing the queue_events table

use crate::error::map_sqlx_error;
use async_trait::async_trait;
use queuedeck_core::application::{shutdown_channel, ShutdownSender, ShutdownToken};
use queuedeck_core::domain::QueueEvent;
use queuedeck_core::error::Result;
use queuedeck_core::port::event_source::closed_receiver;
use queuedeck_core::port::EventSource;
use sqlx::SqlitePool;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Buffered events per source before slow listeners lag
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Rows fetched per poll
const TAIL_BATCH_SIZE: i64 = 500;

struct Feed {
    tx: broadcast::Sender<QueueEvent>,
    shutdown: ShutdownSender,
    tail: JoinHandle<()>,
}

/// Polls for rows newer than the last one seen and broadcasts them
///
/// Rows stamped at or after `opened_at` are delivered, even when they land
/// before the tail task takes its first position.
pub struct SqliteEventSource {
    queue: String,
    feed: Mutex<Option<Feed>>,
}

impl SqliteEventSource {
    /// Must be called within a Tokio runtime; `opened_at` is epoch ms on the
    /// same clock the store stamps events with
    pub fn open(
        pool: SqlitePool,
        key: impl Into<String>,
        queue: impl Into<String>,
        poll_interval: Duration,
        opened_at: i64,
    ) -> Self {
        let key = key.into();
        let queue = queue.into();
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (shutdown, token) = shutdown_channel();

        let tail = tokio::spawn(tail_events(pool, key, tx.clone(), token, poll_interval, opened_at));

        Self {
            queue,
            feed: Mutex::new(Some(Feed { tx, shutdown, tail })),
        }
    }

    fn with_feed<T>(&self, f: impl FnOnce(Option<&Feed>) -> T) -> T {
        let feed = self.feed.lock().unwrap_or_else(|e| e.into_inner());
        f(feed.as_ref())
    }
}

/// Last row written before the source opened
async fn high_water_mark(pool: &SqlitePool, key: &str, opened_at: i64) -> Result<i64> {
    sqlx::query_scalar(
        "SELECT COALESCE(MAX(id), 0) FROM queue_events WHERE queue_key = ? AND created_at < ?",
    )
    .bind(key)
    .bind(opened_at)
    .fetch_one(pool)
    .await
    .map_err(map_sqlx_error)
}

async fn fetch_after(pool: &SqlitePool, key: &str, after: i64) -> Result<Vec<(i64, String, String)>> {
    sqlx::query_as(
        r#"
        SELECT id, event, payload FROM queue_events
        WHERE queue_key = ? AND id > ?
        ORDER BY id ASC
        LIMIT ?
        "#,
    )
    .bind(key)
    .bind(after)
    .bind(TAIL_BATCH_SIZE)
    .fetch_all(pool)
    .await
    .map_err(map_sqlx_error)
}

async fn tail_events(
    pool: SqlitePool,
    key: String,
    tx: broadcast::Sender<QueueEvent>,
    mut token: ShutdownToken,
    poll_interval: Duration,
    opened_at: i64,
) {
    let mut last_seen = match high_water_mark(&pool, &key, opened_at).await {
        Ok(id) => id,
        Err(e) => {
            warn!(queue = %key, error = %e, "Cannot read event log position, starting from 0");
            0
        }
    };
    debug!(queue = %key, last_seen, "Event tail started");

    loop {
        tokio::select! {
            _ = token.wait() => break,
            _ = tokio::time::sleep(poll_interval) => {}
        }

        // Queries are never cancelled mid-flight; shutdown is checked between polls
        match fetch_after(&pool, &key, last_seen).await {
            Ok(rows) => {
                for (id, event, payload) in rows {
                    last_seen = id;
                    match QueueEvent::from_stored(&event, &payload) {
                        Ok(event) => {
                            let _ = tx.send(event);
                        }
                        Err(e) => warn!(queue = %key, id, error = %e, "Skipping malformed event row"),
                    }
                }
            }
            Err(e) => warn!(queue = %key, error = %e, "Event tail poll failed"),
        }
    }
    debug!(queue = %key, "Event tail stopped");
}

#[async_trait]
impl EventSource for SqliteEventSource {
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
            feed.shutdown.shutdown();
            drop(feed.tx);
            let _ = feed.tail.await;
        }
        Ok(())
    }
}
