// QueueDeck Infrastructure - System Adapters
// Implements: Processor (external command per job)

pub mod subprocess_processor;

pub use subprocess_processor::{ProcessorConfig, SubprocessProcessor};
