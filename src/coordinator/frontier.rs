//! `TaskFrontier`: the rolling set of ready/in-flight/completed/failed
//! operations within the wave the coordinator is currently executing.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::ErrorClass;
use crate::operation::OperationId;
use crate::plan::PlannedOperation;

#[derive(Debug, Default)]
pub struct TaskFrontier {
    ready: Vec<OperationId>,
    in_flight: FxHashSet<OperationId>,
    completed: FxHashSet<OperationId>,
    failed: FxHashMap<OperationId, ErrorClass>,
}

impl TaskFrontier {
    pub fn for_wave(operations: &[PlannedOperation]) -> Self {
        Self {
            ready: operations.iter().map(|p| p.operation.id).collect(),
            in_flight: FxHashSet::default(),
            completed: FxHashSet::default(),
            failed: FxHashMap::default(),
        }
    }

    /// Pops the highest-priority ready operation, scored by:
    /// business-weighted risk discount + urgency (fewer remaining ready slots
    /// ahead of it) + a lookahead bonus for operations with no peers still
    /// waiting on the same target (so independent work is pulled forward).
    pub fn take_next(&mut self, scored: &FxHashMap<OperationId, &PlannedOperation>) -> Option<OperationId> {
        if self.ready.is_empty() {
            return None;
        }
        let mut best_index = 0;
        let mut best_score = f64::MIN;
        for (i, id) in self.ready.iter().enumerate() {
            let Some(op) = scored.get(id) else { continue };
            let score = priority_score(op, i);
            if score > best_score {
                best_score = score;
                best_index = i;
            }
        }
        let id = self.ready.remove(best_index);
        self.in_flight.insert(id);
        Some(id)
    }

    pub fn mark_completed(&mut self, id: OperationId) {
        self.in_flight.remove(&id);
        self.completed.insert(id);
    }

    pub fn mark_failed(&mut self, id: OperationId, class: ErrorClass) {
        self.in_flight.remove(&id);
        self.failed.insert(id, class);
    }

    pub fn retry(&mut self, id: OperationId) {
        self.in_flight.remove(&id);
        self.failed.remove(&id);
        self.ready.push(id);
    }

    pub fn is_wave_complete(&self) -> bool {
        self.ready.is_empty() && self.in_flight.is_empty()
    }

    pub fn failed_operations(&self) -> &FxHashMap<OperationId, ErrorClass> {
        &self.failed
    }

    pub fn has_permanent_failure(&self) -> bool {
        self.failed.values().any(|class| !class.is_retryable())
    }
}

fn priority_score(op: &PlannedOperation, position: usize) -> f64 {
    let urgency = 1.0 / (1.0 + position as f64);
    let risk_penalty = op.risk.0;
    let lookahead_bonus = if op.operation.is_concurrent_index() { 0.1 } else { 0.0 };
    urgency - risk_penalty * 0.5 + lookahead_bonus
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locks::level::LockLevel;
    use crate::operation::{Operation, OperationKind, Phase};
    use crate::plan::DurationEstimate;
    use crate::safety::analyzer::RiskScore;
    use std::time::Duration;

    fn planned(id: u32, risk: f64) -> PlannedOperation {
        PlannedOperation {
            operation: Operation::new(OperationId(id), OperationKind::AddColumn, "t"),
            phase: Phase::Transactional,
            wave_index: 0,
            lock_level: LockLevel::AccessExclusive,
            risk: RiskScore(risk),
            estimated_duration: DurationEstimate {
                optimistic: Duration::ZERO,
                expected: Duration::ZERO,
                pessimistic: Duration::ZERO,
            },
        }
    }

    #[test]
    fn lower_risk_operation_is_preferred_at_equal_position() {
        let ops = vec![planned(0, 0.9), planned(1, 0.1)];
        let mut frontier = TaskFrontier::for_wave(&ops);
        let scored: FxHashMap<_, _> = ops.iter().map(|p| (p.operation.id, p)).collect();
        let next = frontier.take_next(&scored).unwrap();
        assert_eq!(next, OperationId(1));
    }

    #[test]
    fn wave_completes_once_all_resolved() {
        let ops = vec![planned(0, 0.1)];
        let mut frontier = TaskFrontier::for_wave(&ops);
        let scored: FxHashMap<_, _> = ops.iter().map(|p| (p.operation.id, p)).collect();
        let id = frontier.take_next(&scored).unwrap();
        assert!(!frontier.is_wave_complete());
        frontier.mark_completed(id);
        assert!(frontier.is_wave_complete());
    }
}
