// Application Layer - Use Cases and Business Logic

pub mod maintenance;
pub mod multiplexer;
pub mod recovery;
pub mod registry;
pub mod retry;
pub mod shutdown;
pub mod stream;
pub mod worker;

// Re-exports
pub use maintenance::MaintenanceScheduler;
pub use multiplexer::{SubscriptionLease, SubscriptionMultiplexer};
pub use registry::{ManagedQueueHandle, QueueRegistry, RegistryOptions};
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};
pub use stream::{
    abort_pair, AbortHandle, AbortSignal, FrameSink, SessionEnd, StreamConfig, StreamFrame,
    StreamMode, StreamSession,
};
pub use worker::{Worker, WorkerPool};
