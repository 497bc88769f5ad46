// QueueDeck In-Memory Engine
// Testing engine: jobs live in process memory, events on broadcast buses

mod engine;
mod event_source;
mod queue;
mod store;

pub use engine::MemoryEngine;
pub use event_source::MemoryEventSource;
pub use queue::MemoryQueue;
pub use store::MemoryStore;
