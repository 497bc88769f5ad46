// Event streaming: per-client sessions over the registry and multiplexer

pub mod abort;
pub mod constants;
pub mod frame;
pub mod session;

pub use abort::{abort_pair, AbortHandle, AbortSignal};
pub use frame::{FrameSink, SinkClosed, StreamFrame};
pub use session::{SessionEnd, StreamConfig, StreamMode, StreamSession};
