//! The rolling-frontier scheduler: turns a planned `Plan` into real,
//! lock-aware, checkpointed Postgres execution.

pub mod coordinator;
pub mod frontier;
pub mod worker;

pub use coordinator::{Coordinator, CoordinatorError};
pub use frontier::TaskFrontier;
pub use worker::WorkerPool;
