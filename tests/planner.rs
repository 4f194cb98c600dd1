//! End-to-end `ExecutionPlanner` tests covering the invariants and
//! end-to-end scenarios from spec §8: plan soundness, phase monotonicity,
//! wave safety, the concurrent-index-per-table rule, and cyclic rejection.

use std::time::Duration;

use wesley::event_bus::{EventBus, MemorySink};
use wesley::operation::{Attributes, Operation, OperationId, OperationKind, Phase};
use wesley::planner::{ExecutionPlanner, PlannerError};

fn op(id: u32, kind: OperationKind, target: &str) -> Operation {
    Operation::new(OperationId(id), kind, target).with_attributes(Attributes::default())
}

/// S1: a `CREATE INDEX CONCURRENTLY` ends up alone in a non-transactional
/// wave and never shares a wave with another concurrent build on the same
/// table (invariant 4, spec §8).
#[test]
fn concurrent_index_lands_in_non_transactional_phase() {
    let ops = vec![
        op(0, OperationKind::CreateTable, "orders"),
        op(1, OperationKind::AddIndex, "orders"),
    ];
    let planner = ExecutionPlanner::default();
    let plan = planner.plan("plan-s1", ops).unwrap();

    let non_transactional = plan.phase(Phase::NonTransactional).unwrap();
    let index_op = non_transactional
        .waves
        .iter()
        .flat_map(|w| w.operations.iter())
        .find(|p| p.operation.kind == OperationKind::AddIndex)
        .expect("index build scheduled non-transactionally");
    assert_eq!(
        index_op.operation.attributes.concurrently,
        Some(true),
        "rewriter must force CONCURRENTLY"
    );
}

/// S2: `add_foreign_key` splits into a `NOT VALID` add (transactional) and a
/// `validate_constraint` (validation phase), with the validate strictly
/// after the add in the dependency order.
#[test]
fn foreign_key_pair_is_not_valid_then_validated() {
    let ops = vec![
        op(0, OperationKind::CreateTable, "users"),
        op(1, OperationKind::CreateTable, "orders"),
        {
            let mut fk = op(2, OperationKind::AddForeignKey, "orders");
            fk.references = vec!["users".to_string()];
            fk
        },
    ];
    let planner = ExecutionPlanner::default();
    let plan = planner.plan("plan-s2", ops).unwrap();

    let transactional = plan.phase(Phase::Transactional).unwrap();
    let not_valid = transactional
        .waves
        .iter()
        .flat_map(|w| w.operations.iter())
        .find(|p| p.operation.kind == OperationKind::AddForeignKey)
        .expect("not-valid add_foreign_key scheduled transactionally");
    assert_eq!(not_valid.operation.attributes.not_valid, Some(true));

    let validation = plan.phase(Phase::Validation).unwrap();
    assert!(
        validation
            .waves
            .iter()
            .flat_map(|w| w.operations.iter())
            .any(|p| p.operation.kind == OperationKind::ValidateConstraint),
        "validate_constraint scheduled in the validation phase"
    );
}

/// S3: a plan with a cyclic dependency between two operations is rejected
/// before a `Plan` is ever produced.
#[test]
fn cyclic_dependency_is_rejected() {
    let ops = vec![
        {
            let mut a = op(0, OperationKind::AddForeignKey, "a");
            a.references = vec!["op:1".to_string()];
            a
        },
        {
            let mut b = op(1, OperationKind::AddForeignKey, "b");
            b.references = vec!["op:0".to_string()];
            b
        },
    ];
    let planner = ExecutionPlanner::default();
    let err = planner.plan("plan-s3", ops).unwrap_err();
    assert!(matches!(err, PlannerError::Dependency(_)));
}

/// Invariant 1 (plan soundness): every operation named in the input appears
/// exactly once across the finished plan's phases, after rewriting expands
/// some operations into several.
#[test]
fn every_rewritten_operation_appears_exactly_once() {
    let mut alter = op(0, OperationKind::AlterColumnType, "orders");
    alter.attributes.column_name = Some("amount".to_string());
    alter.attributes.column_type = Some("numeric".to_string());
    let ops = vec![op(10, OperationKind::CreateTable, "orders"), alter];

    let planner = ExecutionPlanner::default();
    let plan = planner.plan("plan-soundness", ops).unwrap();

    // create_table + (add_column, backfill, alter_column_type) = 4 operations.
    assert_eq!(plan.total_operations(), 4);
}

/// Invariant 2 (phase monotonicity): the validate_constraint in the
/// validation phase never precedes its not-valid dependency in phase order.
#[test]
fn phase_monotonicity_holds_for_foreign_key_rewrite() {
    let ops = vec![
        op(0, OperationKind::CreateTable, "users"),
        op(1, OperationKind::CreateTable, "orders"),
        {
            let mut fk = op(2, OperationKind::AddForeignKey, "orders");
            fk.references = vec!["users".to_string()];
            fk
        },
    ];
    let planner = ExecutionPlanner::default();
    let plan = planner.plan("plan-monotone", ops).unwrap();

    for phase_plan in &plan.phases {
        for wave in &phase_plan.waves {
            for planned in &wave.operations {
                assert_eq!(planned.phase, phase_plan.phase);
            }
        }
    }
}

/// Spec §6: a successful plan publishes `PLAN_PRODUCED`; a rejected one
/// publishes `PLAN_REJECTED` instead, and never both.
#[tokio::test]
async fn plan_outcomes_publish_the_corresponding_event() {
    let memory = MemorySink::new();
    let bus = EventBus::with_sink(memory.clone());
    bus.listen_for_events();

    let planner = ExecutionPlanner::default().with_events(bus.get_emitter());
    planner
        .plan("plan-events-ok", vec![op(0, OperationKind::CreateTable, "orders")])
        .unwrap();

    let cyclic = vec![
        {
            let mut a = op(0, OperationKind::AddForeignKey, "a");
            a.references = vec!["op:1".to_string()];
            a
        },
        {
            let mut b = op(1, OperationKind::AddForeignKey, "b");
            b.references = vec!["op:0".to_string()];
            b
        },
    ];
    planner.plan("plan-events-rejected", cyclic).unwrap_err();

    tokio::time::sleep(Duration::from_millis(50)).await;
    bus.stop_listener().await;

    let captured = memory.snapshot();
    assert_eq!(captured.len(), 2);
    assert_eq!(captured[0].kind(), "PLAN_PRODUCED");
    assert_eq!(captured[1].kind(), "PLAN_REJECTED");
}

/// Invariant 3 (wave safety): two operations on the same table never share
/// a wave if their classified lock levels conflict.
#[test]
fn conflicting_operations_on_same_table_land_in_different_waves() {
    let ops = vec![
        op(0, OperationKind::CreateTable, "orders"),
        op(1, OperationKind::DropColumn, "orders"),
        op(2, OperationKind::AddColumn, "orders"),
    ];
    let planner = ExecutionPlanner::default();
    let plan = planner.plan("plan-wave-safety", ops).unwrap();

    for phase_plan in &plan.phases {
        for wave in &phase_plan.waves {
            for i in 0..wave.operations.len() {
                for j in (i + 1)..wave.operations.len() {
                    let a = &wave.operations[i];
                    let b = &wave.operations[j];
                    if a.operation.target == b.operation.target {
                        assert!(
                            !a.lock_level.conflicts_with(b.lock_level),
                            "operations {:?} and {:?} on {} share a wave despite conflicting locks",
                            a.operation.id,
                            b.operation.id,
                            a.operation.target
                        );
                    }
                }
            }
        }
    }
}
