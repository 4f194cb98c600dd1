//! Executor state snapshots and their atomic, retained on-disk persistence.

pub mod manager;
pub mod state;

pub use manager::{Checkpoint, CheckpointManager, CheckpointerError};
pub use state::{ExecutionStatus, ExecutorState, InFlightOperation};
