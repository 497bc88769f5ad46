// Live stream sessions sharing one subscription, on both engines

use queuedeck_core::application::{
    abort_pair, QueueRegistry, RegistryOptions, SessionEnd, StreamConfig, StreamFrame,
    StreamMode, StreamSession, SubscriptionMultiplexer,
};
use queuedeck_core::domain::{ConnectionConfig, NewJob, QueueDefinition};
use queuedeck_core::port::processor::mocks::{MockBehavior, MockProcessor};
use queuedeck_core::port::{EngineFactory, SystemTimeProvider};
use queuedeck_infra_memory::MemoryEngine;
use queuedeck_infra_sqlite::SqliteEngine;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn live_options(definitions: Vec<QueueDefinition>, connection: ConnectionConfig) -> RegistryOptions {
    RegistryOptions {
        definitions,
        connection: Some(connection),
        prefix: Some("qd".to_string()),
        testing: false,
    }
}

/// Collect frames until one named `event` arrives
async fn frames_until(rx: &mut mpsc::UnboundedReceiver<StreamFrame>, event: &str) -> Vec<StreamFrame> {
    tokio::time::timeout(Duration::from_secs(5), async {
        let mut frames = Vec::new();
        while let Some(frame) = rx.recv().await {
            let done = frame.event == event;
            frames.push(frame);
            if done {
                break;
            }
        }
        frames
    })
    .await
    .unwrap_or_else(|_| panic!("no {} frame", event))
}

struct Client {
    rx: mpsc::UnboundedReceiver<StreamFrame>,
    abort: queuedeck_core::application::AbortHandle,
    task: tokio::task::JoinHandle<SessionEnd>,
}

fn connect(registry: &QueueRegistry, mux: &Arc<SubscriptionMultiplexer>, name: &str) -> Client {
    let (tx, rx) = mpsc::unbounded_channel();
    let (abort, signal) = abort_pair();
    let session = StreamSession::open(
        registry,
        mux,
        name,
        tx,
        signal,
        StreamConfig::default(),
        Arc::new(SystemTimeProvider),
    )
    .unwrap();
    assert_eq!(session.mode(), StreamMode::Live);
    Client {
        rx,
        abort,
        task: tokio::spawn(session.run()),
    }
}

fn assert_ids_consecutive(frames: &[StreamFrame]) {
    for (i, frame) in frames.iter().enumerate() {
        assert_eq!(frame.id, i as u64, "frame {:?}", frame);
    }
}

#[tokio::test]
async fn test_memory_engine_two_clients_share_one_subscription() {
    let engine = Arc::new(MemoryEngine::new());
    let processor = Arc::new(MockProcessor::new(MockBehavior::ProgressThenSuccess(
        vec![json!(50)],
        json!({"sent": true}),
    )));
    let options = live_options(
        vec![QueueDefinition::new("emails").with_processor(processor.clone())],
        ConnectionConfig::new("memory://unused"),
    );
    let registry = QueueRegistry::new(options, engine.clone()).unwrap();
    let mux = Arc::new(SubscriptionMultiplexer::new(engine.clone()));

    let mut a = connect(&registry, &mux, "emails");
    let mut b = connect(&registry, &mux, "emails");
    assert_eq!(mux.ref_count("emails"), 2);

    let emails = registry.get("emails").unwrap();
    let job = emails.queue.add(NewJob::new("send", json!({}))).await.unwrap();

    for client in [&mut a, &mut b] {
        let frames = frames_until(&mut client.rx, "completed").await;
        assert_ids_consecutive(&frames);

        let names: Vec<&str> = frames.iter().map(|f| f.event.as_str()).collect();
        assert!(names.contains(&"progress"), "{:?}", names);

        let completed = frames.last().unwrap();
        assert_eq!(completed.data["queue"], json!("emails"));
        assert_eq!(completed.data["jobId"], json!(job.id));
        assert_eq!(completed.data["returnvalue"], json!({"sent": true}));
    }

    a.abort.abort();
    assert_eq!(a.task.await.unwrap(), SessionEnd::Aborted);
    assert_eq!(mux.ref_count("emails"), 1);

    b.abort.abort();
    assert_eq!(b.task.await.unwrap(), SessionEnd::Aborted);
    assert_eq!(mux.ref_count("emails"), 0);
    assert!(mux.active().is_empty());

    registry.close_all().await;
}

#[tokio::test]
async fn test_multiplexer_shutdown_ends_live_sessions() {
    let engine = Arc::new(MemoryEngine::new());
    let options = live_options(
        vec![QueueDefinition::new("reports")],
        ConnectionConfig::new("memory://unused"),
    );
    let registry = QueueRegistry::new(options, engine.clone()).unwrap();
    let mux = Arc::new(SubscriptionMultiplexer::new(engine.clone()));

    let client = connect(&registry, &mux, "reports");
    mux.shutdown().await;

    let end = tokio::time::timeout(Duration::from_secs(5), client.task)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(end, SessionEnd::SourceClosed);
    registry.close_all().await;
}

#[tokio::test]
async fn test_sqlite_engine_worker_events_reach_live_session() {
    let mut connection = ConnectionConfig::new("sqlite::memory:");
    connection.event_poll_interval_ms = 10;
    let engine = Arc::new(SqliteEngine::connect(&connection).await.unwrap());
    let factory: Arc<dyn EngineFactory> = engine.clone();

    let processor = Arc::new(MockProcessor::new_fail("template missing"));
    let options = live_options(
        vec![
            QueueDefinition::new("emails").with_processor(processor.clone()),
            QueueDefinition::new("reports"),
        ],
        connection,
    );
    let registry = QueueRegistry::new(options, factory.clone()).unwrap();
    let mux = Arc::new(SubscriptionMultiplexer::new(factory));

    // Added right after connecting: the first event must still arrive
    let mut client = connect(&registry, &mux, "emails");

    let emails = registry.get("emails").unwrap();
    let job = emails.queue.add(NewJob::new("send", json!({"to": "x"}))).await.unwrap();

    let frames = frames_until(&mut client.rx, "failed").await;
    assert_ids_consecutive(&frames);
    assert_eq!(frames[0].event, "waiting");

    let failed = frames.last().unwrap();
    assert_eq!(failed.data["queue"], json!("emails"));
    assert_eq!(failed.data["jobId"], json!(job.id));
    assert_eq!(failed.data["failedReason"], json!("template missing"));

    // Other queues' events stay on their own key
    let reports = registry.get("reports").unwrap();
    reports.queue.add(NewJob::new("build", json!({}))).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(client.rx.try_recv().is_err());

    client.abort.abort();
    assert_eq!(client.task.await.unwrap(), SessionEnd::Aborted);

    registry.close_all().await;
    mux.shutdown().await;
    engine.close().await;
}
