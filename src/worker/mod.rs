//! Worker side: the dispatch pool and mission executors.

pub mod executor;
pub mod pool;

pub use executor::{ExecutionOutcome, MissionExecutor, SimulatedExecutor};
pub use pool::WorkerPool;
