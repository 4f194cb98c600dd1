//! Closed error taxonomy shared by every Wesley subsystem.
//!
//! Each leaf subsystem defines its own `thiserror` enum; [`WesleyError`] is the
//! aggregate returned from the public `Coordinator` entry points. Classification
//! into [`ErrorClass`] drives retry policy (see [`backoff`]) independently of
//! which subsystem raised the error.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backpressure::controller::BackpressureError;
use crate::channel::sql_channel::ChannelError;
use crate::checkpoint::manager::CheckpointerError;
use crate::coordinator::coordinator::CoordinatorError;
use crate::dependency::dag::DependencyError;
use crate::monitor::lock_monitor::MonitorError;
use crate::planner::PlannerError;
use crate::rewrite::rewriter::RewriteError;

/// The closed classification taxonomy from the error handling design.
///
/// Every error raised anywhere in Wesley is mapped to exactly one of these
/// classes. Retryable classes carry an exponential backoff; permanent classes
/// fail the operation and cascade to the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorClass {
    LockTimeout,
    StatementTimeout,
    SerializationFailure,
    Deadlock,
    ConnectionLost,
    Syntax,
    PermissionDenied,
    ConstraintViolation,
    ObjectMissing,
    CheckpointCorrupt,
    PlanInvalid,
    Internal,
}

impl ErrorClass {
    /// Whether the coordinator should retry an operation that failed with this class.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorClass::LockTimeout
                | ErrorClass::StatementTimeout
                | ErrorClass::SerializationFailure
                | ErrorClass::Deadlock
                | ErrorClass::ConnectionLost
        )
    }

    /// Whether this class requires a channel reconnect before retrying.
    pub fn requires_reconnect(self) -> bool {
        matches!(self, ErrorClass::ConnectionLost)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorClass::LockTimeout => "LOCK_TIMEOUT",
            ErrorClass::StatementTimeout => "STATEMENT_TIMEOUT",
            ErrorClass::SerializationFailure => "SERIALIZATION_FAILURE",
            ErrorClass::Deadlock => "DEADLOCK",
            ErrorClass::ConnectionLost => "CONNECTION_LOST",
            ErrorClass::Syntax => "SYNTAX",
            ErrorClass::PermissionDenied => "PERMISSION_DENIED",
            ErrorClass::ConstraintViolation => "CONSTRAINT_VIOLATION",
            ErrorClass::ObjectMissing => "OBJECT_MISSING",
            ErrorClass::CheckpointCorrupt => "CHECKPOINT_CORRUPT",
            ErrorClass::PlanInvalid => "PLAN_INVALID",
            ErrorClass::Internal => "INTERNAL",
        }
    }

    /// Remediation hint surfaced on `OP_FAILED` events for permanent errors.
    pub fn remediation_hint(self) -> Option<&'static str> {
        match self {
            ErrorClass::PermissionDenied => {
                Some("grant the required privilege to the executing role")
            }
            ErrorClass::ObjectMissing => {
                Some("verify the referenced object exists or reorder the plan")
            }
            ErrorClass::Syntax => Some("the rewritten SQL is malformed; file a bug against the rewriter"),
            ErrorClass::ConstraintViolation => {
                Some("existing rows violate the new constraint; backfill or relax it first")
            }
            ErrorClass::PlanInvalid => Some("the plan failed validation before execution began"),
            _ => None,
        }
    }
}

/// Classifies a raw `sqlx::postgres` error (by SQLSTATE) into Wesley's taxonomy.
///
/// Grounded on the PostgreSQL error code catalogue referenced in spec §7.
pub fn classify_sqlstate(code: &str) -> ErrorClass {
    match code {
        "55P03" => ErrorClass::LockTimeout,
        "57014" => ErrorClass::StatementTimeout,
        "40001" => ErrorClass::SerializationFailure,
        "40P01" => ErrorClass::Deadlock,
        "08000" | "08003" | "08006" | "08001" | "08004" => ErrorClass::ConnectionLost,
        "42601" | "42000" => ErrorClass::Syntax,
        "42501" => ErrorClass::PermissionDenied,
        "23502" | "23503" | "23505" | "23514" => ErrorClass::ConstraintViolation,
        "42P01" | "42703" | "42704" => ErrorClass::ObjectMissing,
        _ => ErrorClass::Internal,
    }
}

/// Exponential backoff with jitter, per spec §7: base 1s, factor 2, cap 30s.
pub mod backoff {
    use super::*;

    pub const BASE: Duration = Duration::from_secs(1);
    pub const FACTOR: u32 = 2;
    pub const CAP: Duration = Duration::from_secs(30);
    pub const DEFAULT_RETRY_BUDGET: u32 = 3;

    /// Computes the delay before the `attempt`-th retry (1-indexed), with full jitter.
    pub fn delay_for_attempt(attempt: u32) -> Duration {
        let exp = FACTOR.saturating_pow(attempt.saturating_sub(1));
        let unjittered = BASE.saturating_mul(exp).min(CAP);
        let mut rng = rand::rng();
        let jitter_ms = rng.random_range(0..=unjittered.as_millis().max(1) as u64);
        Duration::from_millis(jitter_ms)
    }
}

/// Top-level aggregate error returned from `Coordinator::execute` and friends.
#[derive(Debug, Error, miette::Diagnostic)]
pub enum WesleyError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Dependency(#[from] DependencyError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Rewrite(#[from] RewriteError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Planner(#[from] PlannerError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Coordinator(#[from] CoordinatorError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Checkpointer(#[from] CheckpointerError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Monitor(#[from] MonitorError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Backpressure(#[from] BackpressureError),
}

impl WesleyError {
    /// Maps to the exit codes a host CLI surfaces (spec §6).
    pub fn exit_code(&self) -> i32 {
        match self {
            WesleyError::Dependency(_) | WesleyError::Planner(_) => 3,
            WesleyError::Coordinator(e) if e.is_precondition_failure() => 13,
            WesleyError::Coordinator(_) => 5,
            WesleyError::Channel(_) => 5,
            WesleyError::Checkpointer(e) if e.is_corruption() => 8,
            WesleyError::Checkpointer(_) => 5,
            WesleyError::Monitor(_) => 5,
            WesleyError::Backpressure(_) => 13,
            WesleyError::Rewrite(_) => 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classes_match_spec() {
        assert!(ErrorClass::LockTimeout.is_retryable());
        assert!(ErrorClass::StatementTimeout.is_retryable());
        assert!(ErrorClass::SerializationFailure.is_retryable());
        assert!(ErrorClass::Deadlock.is_retryable());
        assert!(ErrorClass::ConnectionLost.is_retryable());
        assert!(!ErrorClass::Syntax.is_retryable());
        assert!(!ErrorClass::PermissionDenied.is_retryable());
        assert!(!ErrorClass::ConstraintViolation.is_retryable());
        assert!(!ErrorClass::ObjectMissing.is_retryable());
        assert!(!ErrorClass::PlanInvalid.is_retryable());
        assert!(!ErrorClass::Internal.is_retryable());
    }

    #[test]
    fn connection_lost_requires_reconnect() {
        assert!(ErrorClass::ConnectionLost.requires_reconnect());
        assert!(!ErrorClass::LockTimeout.requires_reconnect());
    }

    #[test]
    fn sqlstate_classification_matches_table() {
        assert_eq!(classify_sqlstate("55P03"), ErrorClass::LockTimeout);
        assert_eq!(classify_sqlstate("40P01"), ErrorClass::Deadlock);
        assert_eq!(classify_sqlstate("23505"), ErrorClass::ConstraintViolation);
        assert_eq!(classify_sqlstate("42501"), ErrorClass::PermissionDenied);
        assert_eq!(classify_sqlstate("XXUNKNOWN"), ErrorClass::Internal);
    }

    #[test]
    fn backoff_delay_never_exceeds_cap_plus_jitter_ceiling() {
        for attempt in 1..=8 {
            let d = backoff::delay_for_attempt(attempt);
            assert!(d <= backoff::CAP);
        }
    }
}
