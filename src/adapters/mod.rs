//! Adapters implementing the external ports.

mod memory;

pub use memory::{FlagRecord, InMemoryFlagStore, InMemoryMetrics, RecordingExecutor};
