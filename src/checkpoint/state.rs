//! `ExecutorState`: the durable, resumable snapshot of a coordinator's progress
//! through a `Plan` (spec §4.6/§4.7).

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::operation::{OperationId, Phase};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Paused,
    Completed,
    Aborted,
    RollingBack,
}

/// An operation the coordinator has dispatched to a worker but not yet
/// resolved (succeeded or failed).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InFlightOperation {
    pub operation_id: OperationId,
    pub started_at: DateTime<Utc>,
    pub attempt: u32,
}

/// Durable, resumable snapshot of a coordinator's progress through a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorState {
    pub plan_id: String,
    pub start_time: DateTime<Utc>,
    pub status: ExecutionStatus,
    pub completed_operation_ids: Vec<OperationId>,
    pub in_flight_operations: FxHashMap<OperationId, InFlightOperation>,
    pub current_phase: Phase,
    pub current_wave_index: usize,
    pub retry_counts: FxHashMap<OperationId, u32>,
}

impl ExecutorState {
    pub fn new(plan_id: impl Into<String>, start_time: DateTime<Utc>) -> Self {
        Self {
            plan_id: plan_id.into(),
            start_time,
            status: ExecutionStatus::Running,
            completed_operation_ids: Vec::new(),
            in_flight_operations: FxHashMap::default(),
            current_phase: Phase::NonTransactional,
            current_wave_index: 0,
            retry_counts: FxHashMap::default(),
        }
    }

    pub fn is_completed(&self, id: OperationId) -> bool {
        self.completed_operation_ids.contains(&id)
    }

    pub fn mark_started(&mut self, id: OperationId, started_at: DateTime<Utc>) {
        let attempt = self.retry_counts.get(&id).copied().unwrap_or(0) + 1;
        self.in_flight_operations.insert(
            id,
            InFlightOperation {
                operation_id: id,
                started_at,
                attempt,
            },
        );
    }

    pub fn mark_completed(&mut self, id: OperationId) {
        self.in_flight_operations.remove(&id);
        if !self.completed_operation_ids.contains(&id) {
            self.completed_operation_ids.push(id);
        }
    }

    pub fn mark_retry(&mut self, id: OperationId) {
        self.in_flight_operations.remove(&id);
        *self.retry_counts.entry(id).or_insert(0) += 1;
    }
}
