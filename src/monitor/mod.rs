//! Live lock and deadlock monitoring against the target Postgres instance.

pub mod graph;
pub mod lock_monitor;

pub use graph::{ContentionStat, Lock, LockSnapshot, WaitEdge};
pub use lock_monitor::{LockMonitor, LockReport, MonitorError, MonitorThresholds, ThresholdAlert};
