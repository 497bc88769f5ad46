// Outbound stream frames and the sink they are written to

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

/// One unit of the outbound event stream
#[derive(Debug, Clone, PartialEq)]
pub struct StreamFrame {
    /// Event category (`completed`, `heartbeat`, `counts`, ...)
    pub event: String,
    /// JSON payload
    pub data: Value,
    /// Per-session id, strictly increasing from 0
    pub id: u64,
}

/// The client side of the stream is gone
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("stream sink closed")]
pub struct SinkClosed;

/// Destination for frames (the client connection)
#[async_trait]
pub trait FrameSink: Send {
    async fn send(&mut self, frame: StreamFrame) -> Result<(), SinkClosed>;
}

#[async_trait]
impl FrameSink for mpsc::Sender<StreamFrame> {
    async fn send(&mut self, frame: StreamFrame) -> Result<(), SinkClosed> {
        mpsc::Sender::send(self, frame).await.map_err(|_| SinkClosed)
    }
}

#[async_trait]
impl FrameSink for mpsc::UnboundedSender<StreamFrame> {
    async fn send(&mut self, frame: StreamFrame) -> Result<(), SinkClosed> {
        mpsc::UnboundedSender::send(self, frame).map_err(|_| SinkClosed)
    }
}
