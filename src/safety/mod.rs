//! Risk scoring, race-condition detection, and deadlock-cluster prediction
//! over a candidate set of concurrently schedulable operations.

pub mod analyzer;

pub use analyzer::{
    DeadlockCluster, Mitigation, ParallelismPlan, RaceCondition, RiskScore, SafetyAnalyzer,
    SafetyReport,
};
