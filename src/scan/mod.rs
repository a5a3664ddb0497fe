//! Scan orchestration: task generation, the template worker pool, stats
//! collection and persistence

pub mod fs;
pub mod runner;
pub mod stats;
pub mod task;

pub use fs::{FileSystem, JsonlFileSystem, MemoryFileSystem, RecordStream};
pub use runner::{DiscardHook, Runner};
pub use stats::{Stats, StatsCollector, StatsDelta, StatsHandle, StatsUpdate};
pub use task::{Capabilities, LineOfWork, Task};
