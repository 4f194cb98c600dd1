//! The `Plan` data model: phases, waves, risk assessment, and rollback ops.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::locks::level::LockLevel;
use crate::operation::{Operation, OperationId, Phase};
use crate::safety::analyzer::RiskScore;

/// A maximal subset of operations within a phase that can execute
/// concurrently without resource conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wave {
    pub operations: Vec<PlannedOperation>,
}

/// An operation as it appears in a finished `Plan`: the original operation
/// plus everything the planner computed about it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedOperation {
    pub operation: Operation,
    pub phase: Phase,
    pub wave_index: usize,
    pub lock_level: LockLevel,
    pub risk: RiskScore,
    pub estimated_duration: DurationEstimate,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DurationEstimate {
    #[serde(with = "duration_millis")]
    pub optimistic: Duration,
    #[serde(with = "duration_millis")]
    pub expected: Duration,
    #[serde(with = "duration_millis")]
    pub pessimistic: Duration,
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub overall: RiskLevel,
    pub per_operation: Vec<(OperationId, RiskScore)>,
}

/// A rollback entry: either a real compensating operation, or an explicit
/// marker for a non-compensable change (spec §4.5: "manual" markers rather
/// than silently skipping).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RollbackOperation {
    Compensating(Operation),
    Manual { for_operation: OperationId, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhasePlan {
    pub phase: Phase,
    pub waves: Vec<Wave>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub phases: Vec<PhasePlan>,
    pub rollback_operations: Vec<RollbackOperation>,
    pub risk_assessment: RiskAssessment,
    pub estimated_duration: DurationEstimate,
}

impl Plan {
    pub fn phase(&self, phase: Phase) -> Option<&PhasePlan> {
        self.phases.iter().find(|p| p.phase == phase)
    }

    pub fn total_operations(&self) -> usize {
        self.phases
            .iter()
            .flat_map(|p| p.waves.iter())
            .map(|w| w.operations.len())
            .sum()
    }

    pub fn operation(&self, id: OperationId) -> Option<&PlannedOperation> {
        self.phases
            .iter()
            .flat_map(|p| p.waves.iter())
            .flat_map(|w| w.operations.iter())
            .find(|po| po.operation.id == id)
    }

    /// Invariant 2: every operation's dependencies are in the same or an
    /// earlier phase. `references_phase` resolves a dependency's phase.
    pub fn phase_of(&self, id: OperationId) -> Option<Phase> {
        self.operation(id).map(|po| po.phase)
    }
}
