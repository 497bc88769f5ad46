// Stream Session
// Per-client loop: forward live events, or poll counts and emit deltas

use super::abort::AbortSignal;
use super::constants::{COUNTS_EVENT, HEARTBEAT_EVENT, HEARTBEAT_INTERVAL, POLL_INTERVAL};
use super::frame::{FrameSink, StreamFrame};
use crate::application::multiplexer::{SubscriptionLease, SubscriptionMultiplexer};
use crate::application::registry::QueueRegistry;
use crate::domain::{JobCounts, QueueEvent};
use crate::error::Result;
use crate::port::{QueueHandle, TimeProvider};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// Timing knobs for stream sessions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConfig {
    pub heartbeat_interval: Duration,
    pub poll_interval: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: HEARTBEAT_INTERVAL,
            poll_interval: POLL_INTERVAL,
        }
    }
}

/// Live change feed, or count polling when no feed is available
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    Live,
    Polling,
}

impl StreamMode {
    /// Testing registries run the in-memory engine and poll
    pub fn for_registry(registry: &QueueRegistry) -> Self {
        if registry.is_testing() {
            StreamMode::Polling
        } else {
            StreamMode::Live
        }
    }
}

/// Why a session stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Abort signal fired
    Aborted,
    /// Writing a frame failed
    Disconnected,
    /// The shared event source was closed
    SourceClosed,
    /// Reading counts failed (e.g. the queue was closed)
    ReadFailed,
}

enum Feed {
    Live {
        lease: SubscriptionLease,
        events: broadcast::Receiver<QueueEvent>,
    },
    Polling {
        queue: Arc<dyn QueueHandle>,
    },
}

/// Frame writer: owns the sink, the id counter and the abort signal
struct Emitter<S> {
    queue: String,
    sink: S,
    abort: AbortSignal,
    next_id: u64,
}

impl<S: FrameSink> Emitter<S> {
    fn check_abort(&self) -> std::result::Result<(), SessionEnd> {
        if self.abort.is_aborted() {
            return Err(SessionEnd::Aborted);
        }
        Ok(())
    }

    async fn emit(&mut self, event: &str, data: Value) -> std::result::Result<(), SessionEnd> {
        self.check_abort()?;
        let frame = StreamFrame {
            event: event.to_string(),
            data,
            id: self.next_id,
        };
        self.next_id += 1;

        tokio::select! {
            biased;
            _ = self.abort.wait() => Err(SessionEnd::Aborted),
            sent = self.sink.send(frame) => sent.map_err(|_| SessionEnd::Disconnected),
        }
    }
}

/// One client's event stream for one queue
pub struct StreamSession<S> {
    emitter: Emitter<S>,
    feed: Feed,
    config: StreamConfig,
    time: Arc<dyn TimeProvider>,
}

impl<S: FrameSink> StreamSession<S> {
    /// Open a session, choosing the mode from the registry
    ///
    /// # Errors
    /// - AppError::QueueNotConfigured / AppError::RegistryClosed from the registry
    pub fn open(
        registry: &QueueRegistry,
        mux: &Arc<SubscriptionMultiplexer>,
        name: &str,
        sink: S,
        abort: AbortSignal,
        config: StreamConfig,
        time: Arc<dyn TimeProvider>,
    ) -> Result<Self> {
        let mode = StreamMode::for_registry(registry);
        Self::open_with_mode(mode, registry, mux, name, sink, abort, config, time)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn open_with_mode(
        mode: StreamMode,
        registry: &QueueRegistry,
        mux: &Arc<SubscriptionMultiplexer>,
        name: &str,
        sink: S,
        abort: AbortSignal,
        config: StreamConfig,
        time: Arc<dyn TimeProvider>,
    ) -> Result<Self> {
        let handle = registry.get(name)?;
        match mode {
            StreamMode::Live => {
                let lease = mux.lease(name, registry.connection(), registry.prefix())?;
                Ok(Self::live(lease, sink, abort, config, time))
            }
            StreamMode::Polling => Ok(Self::polling(
                name,
                Arc::clone(&handle.queue),
                sink,
                abort,
                config,
                time,
            )),
        }
    }

    /// Live session over an already acquired subscription
    pub fn live(
        lease: SubscriptionLease,
        sink: S,
        abort: AbortSignal,
        config: StreamConfig,
        time: Arc<dyn TimeProvider>,
    ) -> Self {
        let events = lease.source().subscribe();
        Self {
            emitter: Emitter {
                queue: lease.queue_name().to_string(),
                sink,
                abort,
                next_id: 0,
            },
            feed: Feed::Live { lease, events },
            config,
            time,
        }
    }

    /// Polling session over a queue handle
    pub fn polling(
        name: &str,
        queue: Arc<dyn QueueHandle>,
        sink: S,
        abort: AbortSignal,
        config: StreamConfig,
        time: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            emitter: Emitter {
                queue: name.to_string(),
                sink,
                abort,
                next_id: 0,
            },
            feed: Feed::Polling { queue },
            config,
            time,
        }
    }

    pub fn mode(&self) -> StreamMode {
        match self.feed {
            Feed::Live { .. } => StreamMode::Live,
            Feed::Polling { .. } => StreamMode::Polling,
        }
    }

    /// Run until abort, disconnect, or feed failure
    ///
    /// Listeners are detached and the subscription released before this returns.
    pub async fn run(self) -> SessionEnd {
        let StreamSession {
            mut emitter,
            feed,
            config,
            time,
        } = self;

        let end = match feed {
            Feed::Live { lease, events } => {
                let end = run_live(&mut emitter, events, &config, time.as_ref()).await;
                lease.release().await;
                end
            }
            Feed::Polling { queue } => run_polling(&mut emitter, queue.as_ref(), &config).await,
        };

        debug!(
            queue = %emitter.queue,
            frames = emitter.next_id,
            end = ?end,
            "Stream session ended"
        );
        end
    }
}

async fn run_live<S: FrameSink>(
    emitter: &mut Emitter<S>,
    mut events: broadcast::Receiver<QueueEvent>,
    config: &StreamConfig,
    time: &dyn TimeProvider,
) -> SessionEnd {
    let mut heartbeat = interval_at(
        Instant::now() + config.heartbeat_interval,
        config.heartbeat_interval,
    );
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if let Err(end) = emitter.check_abort() {
            return end;
        }

        let written = tokio::select! {
            biased;
            _ = emitter.abort.wait() => return SessionEnd::Aborted,
            received = events.recv() => match received {
                Ok(event) => {
                    let payload = event.to_payload(&emitter.queue);
                    emitter.emit(event.kind.as_str(), payload).await
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(queue = %emitter.queue, skipped, "Stream session lagged, events dropped");
                    Ok(())
                }
                Err(RecvError::Closed) => return SessionEnd::SourceClosed,
            },
            _ = heartbeat.tick() => {
                emitter.emit(HEARTBEAT_EVENT, json!({ "time": time.now_millis() })).await
            }
        };

        if let Err(end) = written {
            return end;
        }
    }
}

async fn run_polling<S: FrameSink>(
    emitter: &mut Emitter<S>,
    queue: &dyn QueueHandle,
    config: &StreamConfig,
) -> SessionEnd {
    let mut last = match read_counts(emitter, queue).await {
        Ok(counts) => counts,
        Err(end) => return end,
    };

    loop {
        let fresh = match read_counts(emitter, queue).await {
            Ok(counts) => counts,
            Err(end) => return end,
        };

        for (state, count, prev) in fresh.changes_since(&last) {
            let delta = json!({
                "queue": emitter.queue,
                "state": state.as_str(),
                "count": count,
                "prev": prev,
            });
            if let Err(end) = emitter.emit(COUNTS_EVENT, delta).await {
                return end;
            }
        }
        last = fresh;

        if let Err(end) = emitter.check_abort() {
            return end;
        }
        tokio::select! {
            biased;
            _ = emitter.abort.wait() => return SessionEnd::Aborted,
            _ = sleep(config.poll_interval) => {}
        }
    }
}

/// Abort is checked before and after the read, and raced against it
async fn read_counts<S: FrameSink>(
    emitter: &mut Emitter<S>,
    queue: &dyn QueueHandle,
) -> std::result::Result<JobCounts, SessionEnd> {
    emitter.check_abort()?;
    let read = tokio::select! {
        biased;
        _ = emitter.abort.wait() => return Err(SessionEnd::Aborted),
        read = queue.get_job_counts() => read,
    };
    emitter.check_abort()?;

    read.map_err(|e| {
        debug!(queue = %emitter.queue, error = %e, "Count read failed, ending stream session");
        SessionEnd::ReadFailed
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::registry::RegistryOptions;
    use crate::application::stream::abort::abort_pair;
    use crate::domain::{ConnectionConfig, JobState, QueueDefinition};
    use crate::error::AppError;
    use crate::port::engine::mocks::RecordingEngine;
    use crate::port::event_source::EventSource;
    use crate::port::queue::mocks::StubQueue;
    use crate::port::time_provider::mocks::ManualTimeProvider;
    use tokio::sync::mpsc;

    fn clock() -> Arc<dyn TimeProvider> {
        Arc::new(ManualTimeProvider::new(1_700_000_000_000))
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<StreamFrame>) -> Vec<StreamFrame> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    fn live_registry(engine: Arc<RecordingEngine>) -> QueueRegistry {
        QueueRegistry::new(
            RegistryOptions {
                definitions: vec![QueueDefinition::new("emails"), QueueDefinition::new("reports")],
                connection: Some(ConnectionConfig::new("sqlite::memory:")),
                prefix: None,
                testing: false,
            },
            engine,
        )
        .unwrap()
    }

    fn counts(waiting: u64, completed: u64) -> JobCounts {
        JobCounts {
            waiting,
            completed,
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_steady_counts_emit_nothing() {
        let queue = Arc::new(StubQueue::new("emails"));
        queue.set_counts(counts(3, 1));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (abort, signal) = abort_pair();

        let session = StreamSession::polling("emails", queue.clone(), tx, signal, StreamConfig::default(), clock());
        let task = tokio::spawn(session.run());

        sleep(Duration::from_millis(5_500)).await;
        abort.abort();

        assert_eq!(task.await.unwrap(), SessionEnd::Aborted);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_single_change_emits_one_delta() {
        let queue = Arc::new(StubQueue::new("emails"));
        queue.set_counts(counts(3, 1));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (abort, signal) = abort_pair();

        let session = StreamSession::polling("emails", queue.clone(), tx, signal, StreamConfig::default(), clock());
        let task = tokio::spawn(session.run());

        sleep(Duration::from_millis(1_500)).await;
        queue.set_counts(counts(2, 1));
        sleep(Duration::from_millis(3_000)).await;
        abort.abort();
        task.await.unwrap();

        let frames = drain(&mut rx);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "counts");
        assert_eq!(frames[0].id, 0);
        assert_eq!(
            frames[0].data,
            json!({"queue": "emails", "state": "waiting", "count": 2, "prev": 3})
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_multiple_changes_one_frame_each() {
        let queue = Arc::new(StubQueue::new("emails"));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (abort, signal) = abort_pair();

        let task = tokio::spawn(
            StreamSession::polling("emails", queue.clone(), tx, signal, StreamConfig::default(), clock()).run(),
        );
        sleep(Duration::from_millis(500)).await;
        queue.set_counts(counts(1, 4));
        sleep(Duration::from_millis(2_000)).await;
        abort.abort();
        task.await.unwrap();

        let frames = drain(&mut rx);
        let states: Vec<&str> = frames.iter().map(|f| f.data["state"].as_str().unwrap()).collect();
        assert_eq!(states, vec![JobState::Waiting.as_str(), JobState::Completed.as_str()]);
        assert_eq!(frames.iter().map(|f| f.id).collect::<Vec<_>>(), vec![0, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_read_failure_ends_silently() {
        let queue = Arc::new(StubQueue::new("emails"));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (_abort, signal) = abort_pair();

        let task = tokio::spawn(
            StreamSession::polling("emails", queue.clone(), tx, signal, StreamConfig::default(), clock()).run(),
        );
        sleep(Duration::from_millis(1_500)).await;
        queue.close().await.unwrap();

        assert_eq!(task.await.unwrap(), SessionEnd::ReadFailed);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_aborted_before_run_writes_nothing() {
        let queue = Arc::new(StubQueue::new("emails"));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (abort, signal) = abort_pair();
        abort.abort();

        let end = StreamSession::polling("emails", queue, tx, signal, StreamConfig::default(), clock())
            .run()
            .await;
        assert_eq!(end, SessionEnd::Aborted);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_live_sessions_each_get_one_frame() {
        let engine = Arc::new(RecordingEngine::new());
        let registry = live_registry(engine.clone());
        let mux = Arc::new(SubscriptionMultiplexer::new(engine.clone()));

        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let (abort_a, signal_a) = abort_pair();
        let (abort_b, signal_b) = abort_pair();

        let a = StreamSession::open(&registry, &mux, "emails", tx_a, signal_a, StreamConfig::default(), clock()).unwrap();
        let b = StreamSession::open(&registry, &mux, "emails", tx_b, signal_b, StreamConfig::default(), clock()).unwrap();
        assert_eq!(a.mode(), StreamMode::Live);
        assert_eq!(mux.ref_count("emails"), 2);

        let task_a = tokio::spawn(a.run());
        let task_b = tokio::spawn(b.run());

        let source = engine.source("emails").unwrap();
        assert_eq!(engine.sources().len(), 1);
        assert_eq!(
            source.emit(QueueEvent::completed(&"42".to_string(), json!({"ok": true}))),
            2
        );
        sleep(Duration::from_millis(10)).await;

        abort_a.abort();
        abort_b.abort();
        assert_eq!(task_a.await.unwrap(), SessionEnd::Aborted);
        assert_eq!(task_b.await.unwrap(), SessionEnd::Aborted);

        for rx in [&mut rx_a, &mut rx_b] {
            let frames = drain(rx);
            assert_eq!(frames.len(), 1);
            assert_eq!(frames[0].event, "completed");
            assert_eq!(frames[0].id, 0);
            assert_eq!(frames[0].data["queue"], json!("emails"));
            assert_eq!(frames[0].data["jobId"], json!("42"));
        }

        assert_eq!(mux.ref_count("emails"), 0);
        assert_eq!(source.close_calls(), 1);
        assert_eq!(source.listener_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeats_share_the_id_counter() {
        let engine = Arc::new(RecordingEngine::new());
        let registry = live_registry(engine.clone());
        let mux = Arc::new(SubscriptionMultiplexer::new(engine.clone()));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (abort, signal) = abort_pair();
        let time = clock();

        let session =
            StreamSession::open(&registry, &mux, "emails", tx, signal, StreamConfig::default(), time.clone()).unwrap();
        let task = tokio::spawn(session.run());

        sleep(Duration::from_secs(31)).await;
        engine
            .source("emails")
            .unwrap()
            .emit(QueueEvent::progress(&"1".to_string(), json!(50)));
        sleep(Duration::from_millis(10)).await;
        abort.abort();
        task.await.unwrap();

        let frames = drain(&mut rx);
        let summary: Vec<(&str, u64)> = frames.iter().map(|f| (f.event.as_str(), f.id)).collect();
        assert_eq!(summary, vec![("heartbeat", 0), ("heartbeat", 1), ("progress", 2)]);
        assert_eq!(frames[0].data, json!({"time": time.now_millis()}));
    }

    #[tokio::test]
    async fn test_abort_interrupts_pending_count_read() {
        let queue = Arc::new(StubQueue::new("emails").hanging_counts());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (abort, signal) = abort_pair();

        let session = StreamSession::polling("emails", queue.clone(), tx, signal, StreamConfig::default(), clock());
        let task = tokio::spawn(session.run());
        while queue.count_reads() == 0 {
            tokio::task::yield_now().await;
        }

        abort.abort();
        let end = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(end, SessionEnd::Aborted);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_abort_interrupts_blocked_write() {
        let engine = Arc::new(RecordingEngine::new());
        let registry = live_registry(engine.clone());
        let mux = Arc::new(SubscriptionMultiplexer::new(engine.clone()));
        // Room for one frame and nobody reading
        let (tx, mut rx) = mpsc::channel::<StreamFrame>(1);
        let (abort, signal) = abort_pair();

        let session = StreamSession::open(&registry, &mux, "emails", tx, signal, StreamConfig::default(), clock()).unwrap();
        let task = tokio::spawn(session.run());

        let source = engine.source("emails").unwrap();
        source.emit(QueueEvent::waiting(&"1".to_string()));
        source.emit(QueueEvent::waiting(&"2".to_string()));
        sleep(Duration::from_millis(50)).await;
        assert!(!task.is_finished());

        abort.abort();
        let end = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(end, SessionEnd::Aborted);
        assert_eq!(mux.ref_count("emails"), 0);
        assert_eq!(source.listener_count(), 0);

        let first = rx.try_recv().unwrap();
        assert_eq!(first.data["jobId"], json!("1"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_disconnected_sink_releases_subscription() {
        let engine = Arc::new(RecordingEngine::new());
        let registry = live_registry(engine.clone());
        let mux = Arc::new(SubscriptionMultiplexer::new(engine.clone()));
        let (tx, rx) = mpsc::unbounded_channel::<StreamFrame>();
        let (_abort, signal) = abort_pair();

        let session = StreamSession::open(&registry, &mux, "emails", tx, signal, StreamConfig::default(), clock()).unwrap();
        drop(rx);
        engine
            .source("emails")
            .unwrap()
            .emit(QueueEvent::active(&"1".to_string()));

        assert_eq!(session.run().await, SessionEnd::Disconnected);
        assert_eq!(mux.ref_count("emails"), 0);
        assert_eq!(engine.source("emails").unwrap().close_calls(), 1);
    }

    #[tokio::test]
    async fn test_source_closed_ends_live_session() {
        let engine = Arc::new(RecordingEngine::new());
        let registry = live_registry(engine.clone());
        let mux = Arc::new(SubscriptionMultiplexer::new(engine.clone()));
        let (tx, _rx) = mpsc::unbounded_channel::<StreamFrame>();
        let (_abort, signal) = abort_pair();

        let session = StreamSession::open(&registry, &mux, "reports", tx, signal, StreamConfig::default(), clock()).unwrap();
        mux.shutdown().await;

        assert_eq!(session.run().await, SessionEnd::SourceClosed);
        assert_eq!(mux.ref_count("reports"), 0);
    }

    #[tokio::test]
    async fn test_open_propagates_registry_errors() {
        let engine = Arc::new(RecordingEngine::new());
        let registry = live_registry(engine.clone());
        let mux = Arc::new(SubscriptionMultiplexer::new(engine.clone()));
        let (_abort, signal) = abort_pair();

        let unknown = StreamSession::open(
            &registry,
            &mux,
            "billing",
            mpsc::unbounded_channel::<StreamFrame>().0,
            signal.clone(),
            StreamConfig::default(),
            clock(),
        );
        assert!(matches!(unknown, Err(AppError::QueueNotConfigured(_))));

        registry.close_all().await;
        let closed = StreamSession::open(
            &registry,
            &mux,
            "emails",
            mpsc::unbounded_channel::<StreamFrame>().0,
            signal,
            StreamConfig::default(),
            clock(),
        );
        assert!(matches!(closed, Err(AppError::RegistryClosed)));
        assert!(engine.sources().is_empty());
    }

    #[tokio::test]
    async fn test_testing_registry_selects_polling() {
        let engine = Arc::new(RecordingEngine::new());
        let registry = QueueRegistry::new(
            RegistryOptions {
                definitions: vec![QueueDefinition::new("emails")],
                testing: true,
                ..Default::default()
            },
            engine.clone(),
        )
        .unwrap();
        let mux = Arc::new(SubscriptionMultiplexer::new(engine.clone()));
        let (_abort, signal) = abort_pair();

        let session = StreamSession::open(
            &registry,
            &mux,
            "emails",
            mpsc::unbounded_channel::<StreamFrame>().0,
            signal,
            StreamConfig::default(),
            clock(),
        )
        .unwrap();
        assert_eq!(session.mode(), StreamMode::Polling);
        assert!(mux.active().is_empty());
    }
}
