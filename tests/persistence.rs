//! Integration tests for the `.wesley/` working directory layout and the
//! plan/explain artifact writers (spec §6 "Plan artifacts").

use wesley::operation::{Attributes, Operation, OperationId, OperationKind};
use wesley::persistence::WesleyHome;
use wesley::planner::ExecutionPlanner;

fn sample_plan() -> wesley::Plan {
    let ops = vec![
        Operation::new(OperationId(0), OperationKind::CreateTable, "orders")
            .with_attributes(Attributes::default()),
        {
            let mut idx = Operation::new(OperationId(1), OperationKind::AddIndex, "orders")
                .with_attributes(Attributes::default());
            idx.index_or_constraint_name = Some("orders_customer_id_idx".to_string());
            idx
        },
    ];
    ExecutionPlanner::default().plan("plan-persist", ops).unwrap()
}

#[test]
fn bootstrap_and_write_plan_json_round_trips() {
    let tmp = tempfile::tempdir().unwrap();
    let home = WesleyHome::new(tmp.path());
    home.bootstrap().unwrap();

    let plan = sample_plan();
    let path = home.write_plan_json(&plan).unwrap();

    let bytes = std::fs::read(&path).unwrap();
    let loaded: wesley::Plan = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(loaded.id, plan.id);
    assert_eq!(loaded.total_operations(), plan.total_operations());
}

#[test]
fn explain_txt_lists_lock_radar_with_impact_badges() {
    let tmp = tempfile::tempdir().unwrap();
    let home = WesleyHome::new(tmp.path());
    home.bootstrap().unwrap();

    let plan = sample_plan();
    let path = home.write_explain_txt(&plan).unwrap();
    let text = std::fs::read_to_string(&path).unwrap();

    assert!(text.contains("orders"));
    assert!(
        text.contains("non-blocking")
            || text.contains("blocks DDL only")
            || text.contains("blocks writes")
            || text.contains("blocks reads+writes")
    );
}

#[test]
fn explain_json_is_valid_json_array() {
    let tmp = tempfile::tempdir().unwrap();
    let home = WesleyHome::new(tmp.path());
    home.bootstrap().unwrap();

    let plan = sample_plan();
    let path = home.write_explain_json(&plan).unwrap();
    let value: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert!(value.is_array());
    assert_eq!(value.as_array().unwrap().len(), plan.total_operations());
}

#[test]
fn log_path_and_checkpoints_dir_are_scoped_under_root() {
    let tmp = tempfile::tempdir().unwrap();
    let home = WesleyHome::new(tmp.path());
    home.bootstrap().unwrap();

    assert_eq!(home.log_path("plan-persist"), home.logs_dir().join("plan-persist.log"));
    assert!(home.checkpoints_dir().starts_with(home.root()));
}
