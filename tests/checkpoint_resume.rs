//! S6 end-to-end scenario: checkpoint a partially-executed plan, restart,
//! and resume from the last durable `ExecutorState` without redoing
//! completed work (spec §8, invariant 7: idempotent resume).

use chrono::Utc;

use wesley::checkpoint::manager::CheckpointManager;
use wesley::checkpoint::state::{ExecutionStatus, ExecutorState};
use wesley::operation::{OperationId, Phase};

#[test]
fn resuming_from_a_checkpoint_preserves_completed_work() {
    let tmp = tempfile::tempdir().unwrap();
    let manager = CheckpointManager::new(tmp.path());

    let mut state = ExecutorState::new("plan-resume", Utc::now());
    state.mark_started(OperationId(0), Utc::now());
    state.mark_completed(OperationId(0));
    state.mark_started(OperationId(1), Utc::now());
    state.current_phase = Phase::Transactional;
    state.current_wave_index = 1;
    manager.save(&state).unwrap();

    let resumed = manager.latest("plan-resume").unwrap().state;
    assert!(resumed.is_completed(OperationId(0)));
    assert!(resumed.in_flight_operations.contains_key(&OperationId(1)));
    assert_eq!(resumed.current_phase, Phase::Transactional);
    assert_eq!(resumed.current_wave_index, 1);
    assert_eq!(resumed.status, ExecutionStatus::Running);
}

#[test]
fn marking_the_same_operation_completed_twice_is_idempotent() {
    let mut state = ExecutorState::new("plan-idempotent", Utc::now());
    state.mark_started(OperationId(0), Utc::now());
    state.mark_completed(OperationId(0));
    state.mark_completed(OperationId(0));

    assert_eq!(
        state
            .completed_operation_ids
            .iter()
            .filter(|id| **id == OperationId(0))
            .count(),
        1
    );
}

#[test]
fn retrying_an_operation_clears_its_in_flight_entry_and_bumps_count() {
    let mut state = ExecutorState::new("plan-retry", Utc::now());
    state.mark_started(OperationId(2), Utc::now());
    state.mark_retry(OperationId(2));

    assert!(!state.in_flight_operations.contains_key(&OperationId(2)));
    assert_eq!(state.retry_counts[&OperationId(2)], 1);

    state.mark_started(OperationId(2), Utc::now());
    assert_eq!(state.in_flight_operations[&OperationId(2)].attempt, 2);
}
