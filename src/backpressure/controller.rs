//! `BackpressureController`: admission control over the live Postgres
//! connection, based on a rolling view of recent execution health (spec §5).

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;

use crate::plan::PlannedOperation;

#[derive(Debug, Error, miette::Diagnostic)]
pub enum BackpressureError {
    #[error("circuit open: {open_since_failures} consecutive failures observed")]
    #[diagnostic(
        code(wesley::backpressure::circuit_open),
        help("wait for the cooldown window to elapse or lower concurrency and retry")
    )]
    CircuitOpen { open_since_failures: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Degraded,
    CircuitOpen,
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    succeeded: bool,
    lock_wait: Duration,
}

/// Admission controller fed by every operation outcome; `can_admit` gates
/// whether the coordinator may dispatch a new operation right now.
///
/// Grounded on the teacher's `Scheduler` concurrency-limit concept
/// (`runtimes/runner.rs`'s `scheduler.concurrency_limit`), generalized from a
/// static cap into a rolling health signal since Wesley's concurrency must
/// react to live lock contention rather than a fixed worker count.
pub struct BackpressureController {
    window: Mutex<VecDeque<Sample>>,
    window_size: usize,
    degrade_failure_ratio: f64,
    open_failure_ratio: f64,
    consecutive_failures: Mutex<u32>,
    circuit_open_threshold: u32,
}

impl Default for BackpressureController {
    fn default() -> Self {
        Self::new(50)
    }
}

impl BackpressureController {
    pub fn new(window_size: usize) -> Self {
        Self {
            window: Mutex::new(VecDeque::with_capacity(window_size)),
            window_size,
            degrade_failure_ratio: 0.2,
            open_failure_ratio: 0.5,
            consecutive_failures: Mutex::new(0),
            circuit_open_threshold: 5,
        }
    }

    pub fn record_success(&self, lock_wait: Duration) {
        self.push(Sample {
            succeeded: true,
            lock_wait,
        });
        *self.consecutive_failures.lock() = 0;
    }

    pub fn record_failure(&self) {
        self.push(Sample {
            succeeded: false,
            lock_wait: Duration::ZERO,
        });
        *self.consecutive_failures.lock() += 1;
    }

    fn push(&self, sample: Sample) {
        let mut window = self.window.lock();
        if window.len() == self.window_size {
            window.pop_front();
        }
        window.push_back(sample);
    }

    fn failure_ratio(&self) -> f64 {
        let window = self.window.lock();
        if window.is_empty() {
            return 0.0;
        }
        let failures = window.iter().filter(|s| !s.succeeded).count();
        failures as f64 / window.len() as f64
    }

    pub fn consecutive_failures(&self) -> u32 {
        *self.consecutive_failures.lock()
    }

    pub fn health(&self) -> HealthState {
        if *self.consecutive_failures.lock() >= self.circuit_open_threshold {
            return HealthState::CircuitOpen;
        }
        let ratio = self.failure_ratio();
        if ratio >= self.open_failure_ratio {
            HealthState::CircuitOpen
        } else if ratio >= self.degrade_failure_ratio {
            HealthState::Degraded
        } else {
            HealthState::Healthy
        }
    }

    /// `canAdmit(op) -> bool`: in a degraded state only low-risk operations
    /// are admitted; in an open-circuit state nothing is, until the caller
    /// observes enough successes to reset `consecutive_failures`.
    pub fn can_admit(&self, op: &PlannedOperation) -> Result<bool, BackpressureError> {
        match self.health() {
            HealthState::Healthy => Ok(true),
            HealthState::Degraded => Ok(op.risk.0 < 0.4),
            HealthState::CircuitOpen => Err(BackpressureError::CircuitOpen {
                open_since_failures: *self.consecutive_failures.lock(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locks::level::LockLevel;
    use crate::operation::{Operation, OperationId, OperationKind, Phase};
    use crate::plan::DurationEstimate;
    use crate::safety::analyzer::RiskScore;

    fn planned(risk: f64) -> PlannedOperation {
        PlannedOperation {
            operation: Operation::new(OperationId(0), OperationKind::AddColumn, "t"),
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
    fn healthy_by_default() {
        let controller = BackpressureController::default();
        assert_eq!(controller.health(), HealthState::Healthy);
        assert!(controller.can_admit(&planned(0.9)).unwrap());
    }

    #[test]
    fn repeated_failures_open_the_circuit() {
        let controller = BackpressureController::default();
        for _ in 0..5 {
            controller.record_failure();
        }
        assert_eq!(controller.health(), HealthState::CircuitOpen);
        assert!(controller.can_admit(&planned(0.1)).is_err());
    }

    #[test]
    fn degraded_state_only_admits_low_risk() {
        let controller = BackpressureController::new(10);
        controller.record_failure();
        controller.record_failure();
        for _ in 0..8 {
            controller.record_success(Duration::ZERO);
        }
        assert_eq!(controller.health(), HealthState::Degraded);
        assert!(controller.can_admit(&planned(0.1)).unwrap());
        assert!(!controller.can_admit(&planned(0.9)).unwrap());
    }
}
