//! ExecutionPlanner (spec §4.5): composes LockClassifier, OperationRewriter,
//! DependencyResolver, and SafetyAnalyzer into a finished `Plan`.

use std::sync::Arc;
use std::time::Duration;

use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::dependency::dag::{Dag, DependencyError, DependencyResolver};
use crate::event_bus::{Event, EventEmitter};
use crate::locks::classifier::LockClassifier;
use crate::locks::level::LockLevel;
use crate::operation::{Operation, OperationId, OperationKind, Phase};
use crate::plan::{
    DurationEstimate, PhasePlan, Plan, PlannedOperation, RiskAssessment, RiskLevel,
    RollbackOperation, Wave,
};
use crate::rewrite::rewriter::{IdAllocator, OperationRewriter, RewriteError};
use crate::safety::analyzer::SafetyAnalyzer;

#[derive(Debug, Error, miette::Diagnostic)]
pub enum PlannerError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Dependency(#[from] DependencyError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Rewrite(#[from] RewriteError),

    #[error("plan rejected: {0}")]
    #[diagnostic(code(wesley::planner::rejected))]
    Rejected(String),
}

pub struct ExecutionPlanner {
    classifier: LockClassifier,
    rewriter: OperationRewriter,
    resolver: DependencyResolver,
    analyzer: SafetyAnalyzer,
    events: Option<Arc<dyn EventEmitter>>,
}

impl Default for ExecutionPlanner {
    fn default() -> Self {
        Self::new(8)
    }
}

impl ExecutionPlanner {
    pub fn new(max_parallelism: usize) -> Self {
        Self {
            classifier: LockClassifier::new(),
            rewriter: OperationRewriter::new(),
            resolver: DependencyResolver::new(),
            analyzer: SafetyAnalyzer::new(max_parallelism),
            events: None,
        }
    }

    /// Publishes `PLAN_PRODUCED`/`PLAN_REJECTED` through `events` as each
    /// `plan()` call resolves.
    pub fn with_events(mut self, events: Arc<dyn EventEmitter>) -> Self {
        self.events = Some(events);
        self
    }

    /// `plan(operations) -> Plan`.
    pub fn plan(&self, plan_id: impl Into<String>, operations: Vec<Operation>) -> Result<Plan, PlannerError> {
        let plan_id = plan_id.into();
        let result = self.plan_inner(plan_id.clone(), operations);
        match &result {
            Ok(plan) => self.emit(Event::plan_produced(plan_id, plan.total_operations())),
            Err(e) => self.emit(Event::plan_rejected(e.to_string())),
        }
        result
    }

    fn plan_inner(&self, plan_id: String, operations: Vec<Operation>) -> Result<Plan, PlannerError> {
        let rewritten = self.rewrite_all(operations)?;
        let dag = self.resolver.build(rewritten);
        let order = self.resolver.topological_order(&dag)?;

        let phase_of: FxHashMap<OperationId, Phase> = order
            .iter()
            .map(|op| (op.id, op.phase_hint.unwrap_or_else(|| default_phase(op))))
            .collect();

        // Invariant 2 (phase monotonicity): every operation's dependencies
        // must lie in the same or an earlier phase.
        self.check_phase_monotonicity(&dag, &phase_of)?;

        let phases = self.build_phases(&order, &phase_of, &dag);
        let rollback_operations = self.build_rollback(&order);
        let risk_assessment = self.assess_overall_risk(&phases);
        let estimated_duration = aggregate_duration(&phases);

        Ok(Plan {
            id: plan_id,
            phases,
            rollback_operations,
            risk_assessment,
            estimated_duration,
        })
    }

    fn emit(&self, event: Event) {
        if let Some(events) = &self.events {
            let _ = events.emit(event);
        }
    }

    fn rewrite_all(&self, operations: Vec<Operation>) -> Result<Vec<Operation>, PlannerError> {
        let mut ids = IdAllocator::starting_after(&operations);
        let mut out = Vec::new();
        for op in &operations {
            out.extend(self.rewriter.rewrite(op, &mut ids)?);
        }
        Ok(out)
    }

    fn check_phase_monotonicity(
        &self,
        dag: &Dag,
        phase_of: &FxHashMap<OperationId, Phase>,
    ) -> Result<(), PlannerError> {
        for (i, op) in dag.operations.iter().enumerate() {
            let op_phase = phase_of[&op.id];
            for &dep_idx in &dag.reverse[i] {
                let dep = &dag.operations[dep_idx];
                let dep_phase = phase_of[&dep.id];
                if dep_phase.index() > op_phase.index() {
                    return Err(PlannerError::Rejected(format!(
                        "{} in phase {} depends on {} in later phase {}",
                        op.id, op_phase, dep.id, dep_phase
                    )));
                }
            }
        }
        Ok(())
    }

    /// Partitions each phase's operations into waves using a greedy rolling
    /// frontier: an operation joins the earliest wave where all its
    /// dependencies have already been scheduled in an earlier wave (or
    /// phase) and it conflicts with nothing already placed in that wave.
    fn build_phases(
        &self,
        order: &[Operation],
        phase_of: &FxHashMap<OperationId, Phase>,
        dag: &Dag,
    ) -> Vec<PhasePlan> {
        let index_by_id: FxHashMap<OperationId, usize> =
            dag.operations.iter().enumerate().map(|(i, o)| (o.id, i)).collect();

        let mut wave_index_of: FxHashMap<OperationId, usize> = FxHashMap::default();
        let mut phase_plans: Vec<PhasePlan> = Phase::ORDER
            .iter()
            .map(|&phase| PhasePlan {
                phase,
                waves: Vec::new(),
            })
            .collect();

        for op in order {
            let phase = phase_of[&op.id];
            let phase_plan = &mut phase_plans[phase.index()];

            let earliest_allowed_wave = dag.reverse[index_by_id[&op.id]]
                .iter()
                .filter_map(|&dep_idx| {
                    let dep = &dag.operations[dep_idx];
                    if phase_of[&dep.id] == phase {
                        wave_index_of.get(&dep.id).map(|w| w + 1)
                    } else {
                        None
                    }
                })
                .max()
                .unwrap_or(0);

            let mut target_wave = earliest_allowed_wave;
            loop {
                if target_wave >= phase_plan.waves.len() {
                    phase_plan.waves.push(Wave { operations: Vec::new() });
                }
                let wave = &phase_plan.waves[target_wave];
                let conflicts = wave.operations.iter().any(|placed| {
                    placed.operation.target == op.target
                        && self.classifier.conflicts(&placed.operation, op)
                });
                let too_many_concurrent_index = op.is_concurrent_index()
                    && wave.operations.iter().any(|placed| {
                        placed.operation.is_concurrent_index() && placed.operation.target == op.target
                    });
                if conflicts || too_many_concurrent_index {
                    target_wave += 1;
                    continue;
                }
                break;
            }

            let lock_level = self.classifier.classify(op);
            let candidate_set: Vec<Operation> = phase_plan.waves[target_wave]
                .operations
                .iter()
                .map(|p| p.operation.clone())
                .chain(std::iter::once(op.clone()))
                .collect();
            let report = self.analyzer.analyze(&candidate_set);
            let risk = report.risk.get(&op.id).copied().unwrap_or(crate::safety::analyzer::RiskScore(0.0));

            phase_plan.waves[target_wave].operations.push(PlannedOperation {
                operation: op.clone(),
                phase,
                wave_index: target_wave,
                lock_level,
                risk,
                estimated_duration: estimate_duration(op, lock_level),
            });
            wave_index_of.insert(op.id, target_wave);
        }

        phase_plans
    }

    fn build_rollback(&self, order: &[Operation]) -> Vec<RollbackOperation> {
        let mut out: Vec<RollbackOperation> = order
            .iter()
            .map(|op| match op.kind {
                OperationKind::CreateTable => {
                    RollbackOperation::Compensating(Operation::new(op.id, OperationKind::DropTable, op.target.clone()))
                }
                OperationKind::AddColumn => RollbackOperation::Compensating(Operation::new(
                    op.id,
                    OperationKind::DropColumn,
                    op.target.clone(),
                )),
                OperationKind::AddIndex | OperationKind::AddUnique => RollbackOperation::Compensating(
                    Operation::new(op.id, OperationKind::DropConstraint, op.target.clone()),
                ),
                OperationKind::AddForeignKey => RollbackOperation::Compensating(Operation::new(
                    op.id,
                    OperationKind::DropConstraint,
                    op.target.clone(),
                )),
                OperationKind::AlterColumnType => RollbackOperation::Manual {
                    for_operation: op.id,
                    reason: "original column type is not retained; manual restoration required".into(),
                },
                OperationKind::DropTable | OperationKind::DropColumn | OperationKind::DropConstraint => {
                    RollbackOperation::Manual {
                        for_operation: op.id,
                        reason: "destructive operation has no automatic compensation".into(),
                    }
                }
                _ => RollbackOperation::Manual {
                    for_operation: op.id,
                    reason: "no compensating operation defined for this kind".into(),
                },
            })
            .collect();
        out.reverse();
        out
    }

    fn assess_overall_risk(&self, phases: &[PhasePlan]) -> RiskAssessment {
        let per_operation: Vec<(OperationId, crate::safety::analyzer::RiskScore)> = phases
            .iter()
            .flat_map(|p| p.waves.iter())
            .flat_map(|w| w.operations.iter())
            .map(|po| (po.operation.id, po.risk))
            .collect();

        let max_risk = per_operation
            .iter()
            .map(|(_, r)| r.0)
            .fold(0.0_f64, f64::max);

        let overall = if max_risk >= 0.9 {
            RiskLevel::Critical
        } else if max_risk >= 0.6 {
            RiskLevel::High
        } else if max_risk >= 0.3 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        };

        RiskAssessment {
            overall,
            per_operation,
        }
    }
}

fn default_phase(op: &Operation) -> Phase {
    match op.kind {
        OperationKind::ValidateConstraint => Phase::Validation,
        OperationKind::Backfill => Phase::NonTransactional,
        OperationKind::AddIndex if op.attributes.concurrently == Some(true) => Phase::NonTransactional,
        _ => Phase::Transactional,
    }
}

fn estimate_duration(op: &Operation, lock_level: LockLevel) -> DurationEstimate {
    let base_ms = match op.estimated_row_count {
        Some(n) => (n as f64).sqrt() as u64 * 2,
        None => 50,
    };
    let severity = lock_level as u64 + 1;
    let expected = Duration::from_millis(base_ms * severity);
    DurationEstimate {
        optimistic: expected.mul_f64(0.5),
        expected,
        pessimistic: expected.mul_f64(2.5),
    }
}

fn aggregate_duration(phases: &[PhasePlan]) -> DurationEstimate {
    let mut optimistic = Duration::ZERO;
    let mut expected = Duration::ZERO;
    let mut pessimistic = Duration::ZERO;
    for phase in phases {
        for wave in &phase.waves {
            // Operations within a wave run concurrently: take the max per wave.
            let wave_opt = wave
                .operations
                .iter()
                .map(|o| o.estimated_duration.optimistic)
                .max()
                .unwrap_or(Duration::ZERO);
            let wave_exp = wave
                .operations
                .iter()
                .map(|o| o.estimated_duration.expected)
                .max()
                .unwrap_or(Duration::ZERO);
            let wave_pess = wave
                .operations
                .iter()
                .map(|o| o.estimated_duration.pessimistic)
                .max()
                .unwrap_or(Duration::ZERO);
            optimistic += wave_opt;
            expected += wave_exp;
            pessimistic += wave_pess;
        }
    }
    DurationEstimate {
        optimistic,
        expected,
        pessimistic,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{Attributes, OperationId};

    fn mk(id: u32, kind: OperationKind, target: &str) -> Operation {
        Operation::new(OperationId(id), kind, target).with_attributes(Attributes::default())
    }

    #[test]
    fn s1_concurrent_index_single_wave_non_transactional() {
        let planner = ExecutionPlanner::default();
        let ops = vec![mk(0, OperationKind::AddIndex, "orders")];
        let plan = planner.plan("p1", ops).unwrap();
        let nt = plan.phase(Phase::NonTransactional).unwrap();
        assert_eq!(nt.waves.len(), 1);
        let po = &nt.waves[0].operations[0];
        assert_eq!(po.lock_level, LockLevel::ShareUpdateExclusive);
        assert_eq!(po.operation.attributes.concurrently, Some(true));
    }

    #[test]
    fn s2_foreign_key_pair_split_across_phases() {
        let planner = ExecutionPlanner::default();
        let ops = vec![
            mk(0, OperationKind::CreateTable, "users"),
            mk(1, OperationKind::CreateTable, "orders"),
            Operation::new(OperationId(2), OperationKind::AddForeignKey, "orders")
                .with_references(vec!["users".into()]),
        ];
        let plan = planner.plan("p2", ops).unwrap();
        let txn = plan.phase(Phase::Transactional).unwrap();
        let validation = plan.phase(Phase::Validation).unwrap();
        assert!(txn.waves.iter().flat_map(|w| &w.operations).any(|po| po.operation.attributes.not_valid == Some(true)));
        assert!(validation
            .waves
            .iter()
            .flat_map(|w| &w.operations)
            .any(|po| po.operation.kind == OperationKind::ValidateConstraint));
    }

    #[test]
    fn s3_cyclic_dependency_rejected() {
        let planner = ExecutionPlanner::default();
        // References use the "op:N" marker form so the DAG resolves a real
        // edge between the two (rewritten) not-valid steps, forming a cycle.
        let ops = vec![
            Operation::new(OperationId(0), OperationKind::AddForeignKey, "a")
                .with_references(vec!["op:1".into()]),
            Operation::new(OperationId(1), OperationKind::AddForeignKey, "b")
                .with_references(vec!["op:0".into()]),
        ];
        let err = planner.plan("p3", ops).unwrap_err();
        assert!(matches!(err, PlannerError::Dependency(DependencyError::CircularDependency(_))));
    }

    #[test]
    fn rollback_list_is_reverse_ordered_and_marks_manual() {
        let planner = ExecutionPlanner::default();
        let ops = vec![
            mk(0, OperationKind::CreateTable, "orders"),
            mk(1, OperationKind::DropColumn, "orders"),
        ];
        let plan = planner.plan("p4", ops).unwrap();
        assert!(matches!(plan.rollback_operations[0], RollbackOperation::Manual { .. }));
    }

    #[test]
    fn wave_safety_no_conflicting_same_table_ops_share_a_wave() {
        let planner = ExecutionPlanner::default();
        let ops = vec![
            mk(0, OperationKind::DropTable, "orders"),
            mk(1, OperationKind::AddColumn, "orders"),
        ];
        let plan = planner.plan("p5", ops).unwrap();
        for phase in &plan.phases {
            for wave in &phase.waves {
                for i in 0..wave.operations.len() {
                    for j in (i + 1)..wave.operations.len() {
                        let a = &wave.operations[i];
                        let b = &wave.operations[j];
                        if a.operation.target == b.operation.target {
                            assert!(!a.lock_level.conflicts_with(b.lock_level));
                        }
                    }
                }
            }
        }
    }
}
