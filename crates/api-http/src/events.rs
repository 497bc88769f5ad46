// Server-sent event stream for one queue

use crate::error::ApiResult;
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    response::sse::{Event, Sse},
};
use futures::{Stream, StreamExt};
use queuedeck_core::application::{abort_pair, AbortHandle, StreamFrame, StreamSession};
use std::convert::Infallible;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};

/// Frames buffered between the session and the connection
const FRAME_BUFFER: usize = 64;

/// Aborts the session when the response stream is dropped (client went away)
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn to_event(frame: StreamFrame) -> Event {
    Event::default()
        .event(frame.event)
        .id(frame.id.to_string())
        .data(frame.data.to_string())
}

/// GET /queues/:name/events
///
/// Registry errors are returned as plain HTTP errors before any frame is written.
pub async fn stream_events(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let (tx, rx) = mpsc::channel::<StreamFrame>(FRAME_BUFFER);
    let (abort, signal) = abort_pair();

    let session = StreamSession::open(
        &state.registry,
        &state.multiplexer,
        &name,
        tx,
        signal,
        state.stream_config,
        state.time.clone(),
    )?;
    info!(queue = %name, mode = ?session.mode(), "Event stream opened");

    let mut shutdown = state.shutdown.clone();
    let server_abort = abort.clone();
    let queue = name.clone();
    tokio::spawn(async move {
        let run = session.run();
        tokio::pin!(run);
        let end = tokio::select! {
            end = &mut run => end,
            _ = shutdown.wait() => {
                server_abort.abort();
                run.await
            }
        };
        debug!(queue = %queue, end = ?end, "Event stream closed");
    });

    let guard = AbortOnDrop(abort);
    let stream = ReceiverStream::new(rx).map(move |frame| {
        let _guard = &guard;
        Ok(to_event(frame))
    });
    Ok(Sse::new(stream))
}
