//! `BatchOptimizer`: orders and packs a wave's operations for dispatch, and
//! recommends a transaction mode for the resulting groups (spec §5).

use crate::operation::{Operation, OperationKind};
use crate::plan::{RiskLevel, Wave};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    /// All operations in the group share one transaction.
    Batched,
    /// Each operation gets its own transaction (risky or non-transactional work).
    PerOperation,
}

#[derive(Debug, Clone)]
pub struct OperationGroup {
    pub operation_ids: Vec<crate::operation::OperationId>,
    pub transaction_mode: TransactionMode,
}

pub struct BatchOptimizer {
    max_group_bytes: usize,
}

impl Default for BatchOptimizer {
    fn default() -> Self {
        Self {
            max_group_bytes: 64 * 1024,
        }
    }
}

impl BatchOptimizer {
    pub fn new(max_group_bytes: usize) -> Self {
        Self { max_group_bytes }
    }

    /// Orders a wave DDL-before-DML (schema changes before backfills), packs
    /// operations within the byte budget, and isolates any risky operation
    /// (`AlterColumnType`, `DropTable`) into its own single-operation group.
    pub fn plan_groups(&self, wave: &Wave, overall_risk: RiskLevel) -> Vec<OperationGroup> {
        let mut ddl: Vec<&Operation> = Vec::new();
        let mut dml: Vec<&Operation> = Vec::new();
        for planned in &wave.operations {
            match planned.operation.kind {
                OperationKind::Backfill => dml.push(&planned.operation),
                _ => ddl.push(&planned.operation),
            }
        }

        let mut groups = Vec::new();
        let mut current: Vec<crate::operation::OperationId> = Vec::new();
        let mut current_bytes = 0usize;

        for op in ddl.into_iter().chain(dml) {
            if is_risky(op) {
                if !current.is_empty() {
                    groups.push(OperationGroup {
                        operation_ids: std::mem::take(&mut current),
                        transaction_mode: TransactionMode::Batched,
                    });
                    current_bytes = 0;
                }
                groups.push(OperationGroup {
                    operation_ids: vec![op.id],
                    transaction_mode: TransactionMode::PerOperation,
                });
                continue;
            }

            let approx_bytes = estimate_bytes(op);
            if current_bytes + approx_bytes > self.max_group_bytes && !current.is_empty() {
                groups.push(OperationGroup {
                    operation_ids: std::mem::take(&mut current),
                    transaction_mode: TransactionMode::Batched,
                });
                current_bytes = 0;
            }
            current.push(op.id);
            current_bytes += approx_bytes;
        }

        if !current.is_empty() {
            groups.push(OperationGroup {
                operation_ids: current,
                transaction_mode: TransactionMode::Batched,
            });
        }

        if overall_risk >= RiskLevel::High {
            for group in &mut groups {
                group.transaction_mode = TransactionMode::PerOperation;
            }
        }

        groups
    }
}

fn is_risky(op: &Operation) -> bool {
    matches!(op.kind, OperationKind::AlterColumnType | OperationKind::DropTable)
}

fn estimate_bytes(op: &Operation) -> usize {
    128 + op
        .attributes
        .constraint_definition
        .as_ref()
        .map(|s| s.len())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locks::level::LockLevel;
    use crate::operation::{Operation, OperationId};
    use crate::plan::{DurationEstimate, PlannedOperation, Wave};
    use crate::safety::analyzer::RiskScore;
    use std::time::Duration;

    fn planned(id: u32, kind: OperationKind) -> PlannedOperation {
        PlannedOperation {
            operation: Operation::new(OperationId(id), kind, "t"),
            phase: crate::operation::Phase::Transactional,
            wave_index: 0,
            lock_level: LockLevel::AccessExclusive,
            risk: RiskScore(0.1),
            estimated_duration: DurationEstimate {
                optimistic: Duration::ZERO,
                expected: Duration::ZERO,
                pessimistic: Duration::ZERO,
            },
        }
    }

    #[test]
    fn risky_operations_get_isolated_groups() {
        let wave = Wave {
            operations: vec![
                planned(0, OperationKind::AddColumn),
                planned(1, OperationKind::AlterColumnType),
                planned(2, OperationKind::AddColumn),
            ],
        };
        let optimizer = BatchOptimizer::default();
        let groups = optimizer.plan_groups(&wave, RiskLevel::Low);
        assert!(groups
            .iter()
            .any(|g| g.operation_ids == vec![OperationId(1)] && g.transaction_mode == TransactionMode::PerOperation));
    }

    #[test]
    fn high_overall_risk_forces_per_operation_mode() {
        let wave = Wave {
            operations: vec![planned(0, OperationKind::AddColumn)],
        };
        let optimizer = BatchOptimizer::default();
        let groups = optimizer.plan_groups(&wave, RiskLevel::Critical);
        assert!(groups.iter().all(|g| g.transaction_mode == TransactionMode::PerOperation));
    }
}
