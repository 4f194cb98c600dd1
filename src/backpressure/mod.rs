//! Admission control and batch packing for wave dispatch.

pub mod batch;
pub mod controller;

pub use batch::{BatchOptimizer, OperationGroup, TransactionMode};
pub use controller::{BackpressureController, BackpressureError, HealthState};
