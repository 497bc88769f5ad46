// QueueDeck SQLite Infrastructure
// Live engine: jobs, pause flags and the event log in one SQLite database

mod connection;
mod engine;
mod error;
mod event_source;
mod maintenance_impl;
mod migration;
mod queue;
mod store;

pub use connection::create_pool;
pub use engine::SqliteEngine;
pub use event_source::SqliteEventSource;
pub use maintenance_impl::SqliteMaintenance;
pub use migration::run_migrations;
pub use queue::SqliteQueue;
pub use store::SqliteStore;
