//! Wesley's closed event taxonomy (spec §6 "Event surface").
//!
//! Every event Wesley can publish belongs to one of four families — plan,
//! execution, monitor, checkpoint — and every variant's `kind()` matches the
//! stable name strings observers depend on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorClass;
use crate::operation::{OperationId, Phase};
use crate::plan::RiskLevel;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum Event {
    Plan(PlanEvent),
    Execution(ExecutionEvent),
    Monitor(MonitorEvent),
    Checkpoint(CheckpointEvent),
}

impl Event {
    /// The stable event kind string from spec §6, as observers see it.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Plan(e) => e.kind(),
            Event::Execution(e) => e.kind(),
            Event::Monitor(e) => e.kind(),
            Event::Checkpoint(e) => e.kind(),
        }
    }

    pub fn plan_produced(plan_id: impl Into<String>, total_operations: usize) -> Self {
        Event::Plan(PlanEvent::PlanProduced {
            plan_id: plan_id.into(),
            total_operations,
            at: Utc::now(),
        })
    }

    pub fn plan_rejected(reason: impl Into<String>) -> Self {
        Event::Plan(PlanEvent::PlanRejected {
            reason: reason.into(),
            at: Utc::now(),
        })
    }

    pub fn risk_threshold_exceeded(plan_id: impl Into<String>, risk: RiskLevel) -> Self {
        Event::Plan(PlanEvent::RiskThresholdExceeded {
            plan_id: plan_id.into(),
            risk,
            at: Utc::now(),
        })
    }

    pub fn phase_started(plan_id: impl Into<String>, phase: Phase) -> Self {
        Event::Execution(ExecutionEvent::PhaseStarted {
            plan_id: plan_id.into(),
            phase,
            at: Utc::now(),
        })
    }

    pub fn phase_completed(plan_id: impl Into<String>, phase: Phase) -> Self {
        Event::Execution(ExecutionEvent::PhaseCompleted {
            plan_id: plan_id.into(),
            phase,
            at: Utc::now(),
        })
    }

    pub fn wave_started(plan_id: impl Into<String>, phase: Phase, wave_index: usize) -> Self {
        Event::Execution(ExecutionEvent::WaveStarted {
            plan_id: plan_id.into(),
            phase,
            wave_index,
            at: Utc::now(),
        })
    }

    pub fn wave_completed(plan_id: impl Into<String>, phase: Phase, wave_index: usize) -> Self {
        Event::Execution(ExecutionEvent::WaveCompleted {
            plan_id: plan_id.into(),
            phase,
            wave_index,
            at: Utc::now(),
        })
    }

    pub fn op_started(plan_id: impl Into<String>, operation: OperationId) -> Self {
        Event::Execution(ExecutionEvent::OpStarted {
            plan_id: plan_id.into(),
            operation,
            at: Utc::now(),
        })
    }

    pub fn op_succeeded(plan_id: impl Into<String>, operation: OperationId) -> Self {
        Event::Execution(ExecutionEvent::OpSucceeded {
            plan_id: plan_id.into(),
            operation,
            at: Utc::now(),
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn op_failed(
        plan_id: impl Into<String>,
        operation: OperationId,
        class: ErrorClass,
        message: impl Into<String>,
        retry_count: u32,
        remediation: Option<&'static str>,
    ) -> Self {
        Event::Execution(ExecutionEvent::OpFailed {
            plan_id: plan_id.into(),
            operation,
            class,
            message: message.into(),
            retry_count,
            remediation,
            at: Utc::now(),
        })
    }

    pub fn op_retry(plan_id: impl Into<String>, operation: OperationId, attempt: u32) -> Self {
        Event::Execution(ExecutionEvent::OpRetry {
            plan_id: plan_id.into(),
            operation,
            attempt,
            at: Utc::now(),
        })
    }

    pub fn execution_completed(plan_id: impl Into<String>) -> Self {
        Event::Execution(ExecutionEvent::ExecutionCompleted {
            plan_id: plan_id.into(),
            at: Utc::now(),
        })
    }

    pub fn execution_aborted(plan_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Event::Execution(ExecutionEvent::ExecutionAborted {
            plan_id: plan_id.into(),
            reason: reason.into(),
            at: Utc::now(),
        })
    }

    pub fn rollback_started(plan_id: impl Into<String>) -> Self {
        Event::Execution(ExecutionEvent::RollbackStarted {
            plan_id: plan_id.into(),
            at: Utc::now(),
        })
    }

    pub fn rollback_completed(plan_id: impl Into<String>) -> Self {
        Event::Execution(ExecutionEvent::RollbackCompleted {
            plan_id: plan_id.into(),
            at: Utc::now(),
        })
    }

    pub fn deadlock_detected(participants: Vec<i32>, total_wait: std::time::Duration) -> Self {
        Event::Monitor(MonitorEvent::DeadlockDetected {
            participants,
            total_wait_ms: total_wait.as_millis() as u64,
            at: Utc::now(),
        })
    }

    pub fn lock_wait_alert(relation: impl Into<String>, waiting_count: usize) -> Self {
        Event::Monitor(MonitorEvent::LockWaitAlert {
            relation: relation.into(),
            waiting_count,
            at: Utc::now(),
        })
    }

    pub fn lock_contention_alert(
        relation: impl Into<String>,
        waiting_count: usize,
        avg_wait_ms: u64,
    ) -> Self {
        Event::Monitor(MonitorEvent::LockContentionAlert {
            relation: relation.into(),
            waiting_count,
            avg_wait_ms,
            at: Utc::now(),
        })
    }

    pub fn threshold_exceeded(description: impl Into<String>) -> Self {
        Event::Monitor(MonitorEvent::ThresholdExceeded {
            description: description.into(),
            at: Utc::now(),
        })
    }

    pub fn checkpoint_written(plan_id: impl Into<String>, sequence: u64) -> Self {
        Event::Checkpoint(CheckpointEvent::CheckpointWritten {
            plan_id: plan_id.into(),
            sequence,
            at: Utc::now(),
        })
    }

    pub fn checkpoint_restored(plan_id: impl Into<String>, sequence: u64) -> Self {
        Event::Checkpoint(CheckpointEvent::CheckpointRestored {
            plan_id: plan_id.into(),
            sequence,
            at: Utc::now(),
        })
    }

    pub fn scope_label(&self) -> &'static str {
        match self {
            Event::Plan(_) => "plan",
            Event::Execution(_) => "execution",
            Event::Monitor(_) => "monitor",
            Event::Checkpoint(_) => "checkpoint",
        }
    }

    pub fn to_json_value(&self) -> serde_json::Value {
        serde_json::json!({
            "kind": self.kind(),
            "scope": self.scope_label(),
            "payload": self,
        })
    }

    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.to_json_value())
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.to_json_value())
    }
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {:?}", self.kind(), self)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum PlanEvent {
    PlanProduced {
        plan_id: String,
        total_operations: usize,
        at: DateTime<Utc>,
    },
    PlanRejected {
        reason: String,
        at: DateTime<Utc>,
    },
    RiskThresholdExceeded {
        plan_id: String,
        risk: RiskLevel,
        at: DateTime<Utc>,
    },
}

impl PlanEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            PlanEvent::PlanProduced { .. } => "PLAN_PRODUCED",
            PlanEvent::PlanRejected { .. } => "PLAN_REJECTED",
            PlanEvent::RiskThresholdExceeded { .. } => "RISK_THRESHOLD_EXCEEDED",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum ExecutionEvent {
    PhaseStarted { plan_id: String, phase: Phase, at: DateTime<Utc> },
    PhaseCompleted { plan_id: String, phase: Phase, at: DateTime<Utc> },
    WaveStarted { plan_id: String, phase: Phase, wave_index: usize, at: DateTime<Utc> },
    WaveCompleted { plan_id: String, phase: Phase, wave_index: usize, at: DateTime<Utc> },
    OpStarted { plan_id: String, operation: OperationId, at: DateTime<Utc> },
    OpSucceeded { plan_id: String, operation: OperationId, at: DateTime<Utc> },
    OpFailed {
        plan_id: String,
        operation: OperationId,
        class: ErrorClass,
        message: String,
        retry_count: u32,
        remediation: Option<&'static str>,
        at: DateTime<Utc>,
    },
    OpRetry { plan_id: String, operation: OperationId, attempt: u32, at: DateTime<Utc> },
    ExecutionCompleted { plan_id: String, at: DateTime<Utc> },
    ExecutionAborted { plan_id: String, reason: String, at: DateTime<Utc> },
    RollbackStarted { plan_id: String, at: DateTime<Utc> },
    RollbackCompleted { plan_id: String, at: DateTime<Utc> },
}

impl ExecutionEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ExecutionEvent::PhaseStarted { .. } => "PHASE_STARTED",
            ExecutionEvent::PhaseCompleted { .. } => "PHASE_COMPLETED",
            ExecutionEvent::WaveStarted { .. } => "WAVE_STARTED",
            ExecutionEvent::WaveCompleted { .. } => "WAVE_COMPLETED",
            ExecutionEvent::OpStarted { .. } => "OP_STARTED",
            ExecutionEvent::OpSucceeded { .. } => "OP_SUCCEEDED",
            ExecutionEvent::OpFailed { .. } => "OP_FAILED",
            ExecutionEvent::OpRetry { .. } => "OP_RETRY",
            ExecutionEvent::ExecutionCompleted { .. } => "EXECUTION_COMPLETED",
            ExecutionEvent::ExecutionAborted { .. } => "EXECUTION_ABORTED",
            ExecutionEvent::RollbackStarted { .. } => "ROLLBACK_STARTED",
            ExecutionEvent::RollbackCompleted { .. } => "ROLLBACK_COMPLETED",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum MonitorEvent {
    DeadlockDetected {
        participants: Vec<i32>,
        total_wait_ms: u64,
        at: DateTime<Utc>,
    },
    LockWaitAlert { relation: String, waiting_count: usize, at: DateTime<Utc> },
    LockContentionAlert {
        relation: String,
        waiting_count: usize,
        avg_wait_ms: u64,
        at: DateTime<Utc>,
    },
    ThresholdExceeded { description: String, at: DateTime<Utc> },
}

impl MonitorEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            MonitorEvent::DeadlockDetected { .. } => "DEADLOCK_DETECTED",
            MonitorEvent::LockWaitAlert { .. } => "LOCK_WAIT_ALERT",
            MonitorEvent::LockContentionAlert { .. } => "LOCK_CONTENTION_ALERT",
            MonitorEvent::ThresholdExceeded { .. } => "THRESHOLD_EXCEEDED",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum CheckpointEvent {
    CheckpointWritten { plan_id: String, sequence: u64, at: DateTime<Utc> },
    CheckpointRestored { plan_id: String, sequence: u64, at: DateTime<Utc> },
}

impl CheckpointEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            CheckpointEvent::CheckpointWritten { .. } => "CHECKPOINT_WRITTEN",
            CheckpointEvent::CheckpointRestored { .. } => "CHECKPOINT_RESTORED",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_strings_match_spec_names() {
        assert_eq!(Event::plan_produced("p1", 3).kind(), "PLAN_PRODUCED");
        assert_eq!(Event::plan_rejected("cycle").kind(), "PLAN_REJECTED");
        assert_eq!(
            Event::op_failed("p1", OperationId(1), ErrorClass::Deadlock, "boom", 0, None).kind(),
            "OP_FAILED"
        );
        assert_eq!(
            Event::deadlock_detected(vec![1, 2, 3], std::time::Duration::from_secs(4)).kind(),
            "DEADLOCK_DETECTED"
        );
        assert_eq!(Event::checkpoint_restored("p1", 4).kind(), "CHECKPOINT_RESTORED");
    }

    #[test]
    fn json_value_carries_kind_and_scope() {
        let event = Event::wave_started("p1", Phase::Transactional, 2);
        let json = event.to_json_value();
        assert_eq!(json["kind"], "WAVE_STARTED");
        assert_eq!(json["scope"], "execution");
    }
}
