//! `Coordinator`: the rolling-frontier scheduler that drives a `Plan` to
//! completion phase by phase, wave by wave (spec §4.6).
//!
//! Grounded on the teacher's `AppRunner` (`runtimes/runner.rs`): a single
//! struct owning the durable state, dispatching work through an instrumented
//! async entry point, checkpointing after every unit of progress, and backed
//! by an error enum that distinguishes recoverable from fatal outcomes.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sqlx::PgPool;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{info, instrument, warn};

use crate::backpressure::batch::{BatchOptimizer, TransactionMode};
use crate::backpressure::controller::{BackpressureController, BackpressureError};
use crate::channel::sql_channel::{ChannelError, ExecutionUnit, SqlChannel};
use crate::checkpoint::manager::{CheckpointManager, CheckpointerError};
use crate::checkpoint::state::{ExecutionStatus, ExecutorState};
use crate::coordinator::frontier::TaskFrontier;
use crate::coordinator::worker::WorkerPool;
use crate::error::backoff;
use crate::event_bus::{Event, EventEmitter};
use crate::operation::{Operation, OperationId, Phase};
use crate::plan::{Plan, PlannedOperation, RiskLevel, Wave};
use crate::rewrite::compile;
use crate::rewrite::rewriter::RewriteError;

/// How many consecutive no-capacity polls `execute_non_transactional_wave`
/// tolerates (at 200ms apart, ~60s) before giving up on a circuit that never
/// reopens rather than pausing indefinitely with no dispatched operation
/// left to ever record the success that would close it.
const MAX_STARVED_POLLS: u32 = 300;

#[derive(Debug, Error, miette::Diagnostic)]
pub enum CoordinatorError {
    #[error("operation group {operations} exhausted its retry budget after {attempts} attempts: {source}")]
    #[diagnostic(code(wesley::coordinator::retry_budget_exhausted))]
    RetryBudgetExhausted {
        operations: String,
        attempts: u32,
        #[source]
        source: ChannelError,
    },

    #[error("plan {plan_id} aborted: {reason}")]
    #[diagnostic(code(wesley::coordinator::aborted))]
    Aborted { plan_id: String, reason: String },

    #[error("precondition failed: {0}")]
    #[diagnostic(
        code(wesley::coordinator::precondition_failed),
        help("the plan or environment no longer matches what was checkpointed; replan before resuming")
    )]
    PreconditionFailed(String),

    #[error("worker task panicked: {0}")]
    #[diagnostic(code(wesley::coordinator::worker_panic))]
    WorkerPanic(String),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Rewrite(#[from] RewriteError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Checkpointer(#[from] CheckpointerError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Backpressure(#[from] BackpressureError),
}

impl CoordinatorError {
    pub fn is_precondition_failure(&self) -> bool {
        matches!(self, CoordinatorError::PreconditionFailed(_))
    }
}

/// Drives one `Plan` to completion, or to the last checkpointed boundary
/// before a pause, abort, or unrecoverable failure.
pub struct Coordinator {
    channel: SqlChannel,
    checkpoints: CheckpointManager,
    backpressure: Arc<BackpressureController>,
    batch_optimizer: BatchOptimizer,
    worker_pool: WorkerPool,
    events: Arc<dyn EventEmitter>,
    paused: Arc<AtomicBool>,
    aborted: Arc<AtomicBool>,
}

impl Coordinator {
    pub fn new(
        pool: PgPool,
        checkpoint_dir: impl Into<PathBuf>,
        max_concurrency: usize,
        events: Arc<dyn EventEmitter>,
    ) -> Self {
        Self {
            channel: SqlChannel::new(pool),
            checkpoints: CheckpointManager::new(checkpoint_dir),
            backpressure: Arc::new(BackpressureController::default()),
            batch_optimizer: BatchOptimizer::default(),
            worker_pool: WorkerPool::new(max_concurrency),
            events,
            paused: Arc::new(AtomicBool::new(false)),
            aborted: Arc::new(AtomicBool::new(false)),
        }
    }

    fn emit(&self, event: Event) {
        let _ = self.events.emit(event);
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    #[instrument(skip(self, plan), fields(plan_id = %plan.id))]
    pub async fn execute(&self, plan: &Plan) -> Result<ExecutorState, CoordinatorError> {
        let mut state = ExecutorState::new(plan.id.clone(), Utc::now());
        self.run(plan, &mut state).await?;
        Ok(state)
    }

    /// Resumes a plan from its most recent checkpoint, or a specific one if
    /// `sequence` is given.
    #[instrument(skip(self, plan), fields(plan_id = %plan.id))]
    pub async fn recover(&self, plan: &Plan, sequence: Option<u64>) -> Result<ExecutorState, CoordinatorError> {
        let checkpoint = match sequence {
            Some(seq) => self.checkpoints.load(&plan.id, seq)?,
            None => self.checkpoints.latest(&plan.id)?,
        };
        if checkpoint.state.plan_id != plan.id {
            return Err(CoordinatorError::PreconditionFailed(format!(
                "checkpoint belongs to plan {} but plan {} was supplied",
                checkpoint.state.plan_id, plan.id
            )));
        }
        let mut state = checkpoint.state;
        state.status = ExecutionStatus::Running;
        self.emit(Event::checkpoint_restored(plan.id.clone(), checkpoint.sequence));
        self.run(plan, &mut state).await?;
        Ok(state)
    }

    async fn run(&self, plan: &Plan, state: &mut ExecutorState) -> Result<(), CoordinatorError> {
        for &phase in &Phase::ORDER {
            let Some(phase_plan) = plan.phase(phase) else {
                continue;
            };
            if phase.index() < state.current_phase.index() {
                continue;
            }
            let resuming_this_phase = phase == state.current_phase;
            state.current_phase = phase;
            self.emit(Event::phase_started(plan.id.clone(), phase));

            for (wave_index, wave) in phase_plan.waves.iter().enumerate() {
                if resuming_this_phase && wave_index < state.current_wave_index {
                    continue;
                }
                state.current_wave_index = wave_index;
                self.wait_while_paused().await;
                self.check_aborted(&plan.id)?;

                let pending = remaining(wave, state);
                if !pending.operations.is_empty() {
                    self.emit(Event::wave_started(plan.id.clone(), phase, wave_index));
                    match phase {
                        Phase::NonTransactional => {
                            self.execute_non_transactional_wave(&plan.id, &pending, state).await?
                        }
                        Phase::Transactional => {
                            self.execute_transactional_wave(
                                &plan.id,
                                plan,
                                &pending,
                                plan.risk_assessment.overall,
                                state,
                            )
                            .await?
                        }
                        Phase::Validation => self.execute_validation_wave(&plan.id, &pending, state).await?,
                    }
                    self.emit(Event::wave_completed(plan.id.clone(), phase, wave_index));
                }
                let checkpoint = self.checkpoints.save(state)?;
                self.emit(Event::checkpoint_written(plan.id.clone(), checkpoint.sequence));
            }
            self.emit(Event::phase_completed(plan.id.clone(), phase));
        }
        state.status = ExecutionStatus::Completed;
        let checkpoint = self.checkpoints.save(state)?;
        self.emit(Event::checkpoint_written(plan.id.clone(), checkpoint.sequence));
        self.emit(Event::execution_completed(plan.id.clone()));
        info!(plan_id = %plan.id, "plan execution completed");
        Ok(())
    }

    async fn wait_while_paused(&self) {
        while self.paused.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }

    fn check_aborted(&self, plan_id: &str) -> Result<(), CoordinatorError> {
        if self.aborted.load(Ordering::SeqCst) {
            self.emit(Event::execution_aborted(plan_id, "abort requested"));
            return Err(CoordinatorError::Aborted {
                plan_id: plan_id.to_string(),
                reason: "abort requested".to_string(),
            });
        }
        Ok(())
    }

    /// Dispatches a non-transactional wave's operations concurrently, up to
    /// the worker pool's current capacity, in priority order from
    /// `TaskFrontier`. Each operation runs and commits independently, so
    /// failures of one do not roll back its siblings.
    async fn execute_non_transactional_wave(
        &self,
        plan_id: &str,
        wave: &Wave,
        state: &mut ExecutorState,
    ) -> Result<(), CoordinatorError> {
        use rustc_hash::FxHashMap;

        let scored: FxHashMap<OperationId, &PlannedOperation> =
            wave.operations.iter().map(|p| (p.operation.id, p)).collect();
        let mut frontier = TaskFrontier::for_wave(&wave.operations);
        let mut join_set: JoinSet<(OperationId, Result<(), ChannelError>)> = JoinSet::new();
        let mut in_flight = 0usize;
        let mut starved_polls = 0u32;

        loop {
            self.wait_while_paused().await;
            self.check_aborted(plan_id)?;

            let capacity = self.worker_pool.effective_concurrency(self.backpressure.health());
            while in_flight < capacity {
                let Some(id) = frontier.take_next(&scored) else { break };
                let operation = scored[&id].operation.clone();
                let statement = compile(&operation)?;
                let channel = self.channel.clone();
                state.mark_started(id, Utc::now());
                self.emit(Event::op_started(plan_id, id));
                join_set.spawn(async move {
                    let result = channel.run_non_transactional(&operation, &statement).await;
                    (id, result)
                });
                in_flight += 1;
            }

            if in_flight == 0 {
                if frontier.is_wave_complete() {
                    break;
                }
                // Capacity dropped to zero (circuit open) while ready
                // operations remain: pause dispatch rather than treat the
                // wave as done, and retry once the controller recovers.
                // Nothing we do here can itself close the circuit (only a
                // dispatched operation's outcome resets it), so give up
                // after a bounded number of polls rather than hang forever
                // if it never does.
                starved_polls += 1;
                if starved_polls > MAX_STARVED_POLLS {
                    return Err(CoordinatorError::Backpressure(BackpressureError::CircuitOpen {
                        open_since_failures: self.backpressure.consecutive_failures(),
                    }));
                }
                warn!(plan_id, starved_polls, "non-transactional wave paused: no admission capacity");
                tokio::time::sleep(Duration::from_millis(200)).await;
                continue;
            }
            starved_polls = 0;

            let Some(joined) = join_set.join_next().await else { break };
            in_flight -= 1;
            let (id, result) = joined.map_err(|e| CoordinatorError::WorkerPanic(e.to_string()))?;

            match result {
                Ok(()) => {
                    self.backpressure.record_success(Duration::ZERO);
                    state.mark_completed(id);
                    frontier.mark_completed(id);
                    self.emit(Event::op_succeeded(plan_id, id));
                }
                Err(e) => {
                    self.backpressure.record_failure();
                    let class = e.error_class();
                    let attempts_so_far = state.retry_counts.get(&id).copied().unwrap_or(0);
                    if class.is_retryable() && attempts_so_far < backoff::DEFAULT_RETRY_BUDGET {
                        state.mark_retry(id);
                        frontier.retry(id);
                        let delay = backoff::delay_for_attempt(attempts_so_far + 1);
                        warn!(operation = %id, attempt = attempts_so_far + 1, ?delay, "retrying non-transactional operation");
                        self.emit(Event::op_retry(plan_id, id, attempts_so_far + 1));
                        tokio::time::sleep(delay).await;
                    } else {
                        frontier.mark_failed(id, class);
                        self.emit(Event::op_failed(
                            plan_id,
                            id,
                            class,
                            e.to_string(),
                            attempts_so_far + 1,
                            class.remediation_hint(),
                        ));
                        return Err(CoordinatorError::RetryBudgetExhausted {
                            operations: id.to_string(),
                            attempts: attempts_so_far + 1,
                            source: e,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Runs a transactional wave's groups, as packed by the `BatchOptimizer`,
    /// one at a time: the advisory lock taken per phase would serialize
    /// concurrent groups against Postgres anyway, so the coordinator does not
    /// bother overlapping them.
    async fn execute_transactional_wave(
        &self,
        plan_id: &str,
        plan: &Plan,
        wave: &Wave,
        overall_risk: RiskLevel,
        state: &mut ExecutorState,
    ) -> Result<(), CoordinatorError> {
        let groups = self.batch_optimizer.plan_groups(wave, overall_risk);

        for group in groups {
            self.wait_while_paused().await;
            self.check_aborted(plan_id)?;

            let operations: Vec<Operation> = group
                .operation_ids
                .iter()
                .map(|id| {
                    plan.operation(*id)
                        .map(|p| p.operation.clone())
                        .ok_or_else(|| CoordinatorError::PreconditionFailed(format!("operation {id} missing from plan")))
                })
                .collect::<Result<_, _>>()?;
            let statements = operations
                .iter()
                .map(compile)
                .collect::<Result<Vec<_>, _>>()?;

            let label = group
                .operation_ids
                .iter()
                .map(|id| id.to_string())
                .collect::<Vec<_>>()
                .join(",");

            let mut attempt = 0u32;
            loop {
                attempt += 1;
                for id in &group.operation_ids {
                    state.mark_started(*id, Utc::now());
                    self.emit(Event::op_started(plan_id, *id));
                }

                let units: Vec<ExecutionUnit<'_>> = operations
                    .iter()
                    .zip(statements.iter())
                    .map(|(operation, statement)| ExecutionUnit { operation, statement })
                    .collect();

                let result = match group.transaction_mode {
                    TransactionMode::Batched => self.channel.run_transactional_phase(plan_id, &units).await,
                    TransactionMode::PerOperation => {
                        let mut outcome = Ok(());
                        for unit in &units {
                            outcome = self
                                .channel
                                .run_transactional_phase(plan_id, std::slice::from_ref(unit))
                                .await;
                            if outcome.is_err() {
                                break;
                            }
                        }
                        outcome
                    }
                };

                match result {
                    Ok(()) => {
                        self.backpressure.record_success(Duration::ZERO);
                        for id in &group.operation_ids {
                            state.mark_completed(*id);
                            self.emit(Event::op_succeeded(plan_id, *id));
                        }
                        break;
                    }
                    Err(e) => {
                        self.backpressure.record_failure();
                        let class = e.error_class();
                        if class.is_retryable() && attempt <= backoff::DEFAULT_RETRY_BUDGET {
                            for id in &group.operation_ids {
                                state.mark_retry(*id);
                                self.emit(Event::op_retry(plan_id, *id, attempt));
                            }
                            let delay = backoff::delay_for_attempt(attempt);
                            warn!(operations = %label, attempt, ?delay, "retrying transactional group");
                            tokio::time::sleep(delay).await;
                            continue;
                        }
                        for id in &group.operation_ids {
                            self.emit(Event::op_failed(
                                plan_id,
                                *id,
                                class,
                                e.to_string(),
                                attempt,
                                class.remediation_hint(),
                            ));
                        }
                        return Err(CoordinatorError::RetryBudgetExhausted {
                            operations: label,
                            attempts: attempt,
                            source: e,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Validation-phase operations run sequentially: they take only
    /// `SHARE UPDATE EXCLUSIVE` and are rarely numerous enough to need
    /// parallel dispatch.
    async fn execute_validation_wave(
        &self,
        plan_id: &str,
        wave: &Wave,
        state: &mut ExecutorState,
    ) -> Result<(), CoordinatorError> {
        for planned in &wave.operations {
            self.wait_while_paused().await;
            let statement = compile(&planned.operation)?;
            let mut attempt = 0u32;
            loop {
                attempt += 1;
                state.mark_started(planned.operation.id, Utc::now());
                self.emit(Event::op_started(plan_id, planned.operation.id));
                match self
                    .channel
                    .run_validation(&planned.operation, &statement, None::<fn() -> bool>)
                    .await
                {
                    Ok(()) => {
                        self.backpressure.record_success(Duration::ZERO);
                        state.mark_completed(planned.operation.id);
                        self.emit(Event::op_succeeded(plan_id, planned.operation.id));
                        break;
                    }
                    Err(e) => {
                        self.backpressure.record_failure();
                        let class = e.error_class();
                        if class.is_retryable() && attempt <= backoff::DEFAULT_RETRY_BUDGET {
                            state.mark_retry(planned.operation.id);
                            self.emit(Event::op_retry(plan_id, planned.operation.id, attempt));
                            tokio::time::sleep(backoff::delay_for_attempt(attempt)).await;
                            continue;
                        }
                        self.emit(Event::op_failed(
                            plan_id,
                            planned.operation.id,
                            class,
                            e.to_string(),
                            attempt,
                            class.remediation_hint(),
                        ));
                        return Err(CoordinatorError::RetryBudgetExhausted {
                            operations: planned.operation.id.to_string(),
                            attempts: attempt,
                            source: e,
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

fn remaining(wave: &Wave, state: &ExecutorState) -> Wave {
    Wave {
        operations: wave
            .operations
            .iter()
            .filter(|p| !state.is_completed(p.operation.id))
            .cloned()
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precondition_failure_is_classified_correctly() {
        let err = CoordinatorError::PreconditionFailed("stale checkpoint".into());
        assert!(err.is_precondition_failure());
        let other = CoordinatorError::Aborted {
            plan_id: "p".into(),
            reason: "r".into(),
        };
        assert!(!other.is_precondition_failure());
    }

    #[test]
    fn remaining_filters_completed_operations() {
        use crate::locks::level::LockLevel;
        use crate::operation::OperationKind;
        use crate::plan::DurationEstimate;
        use crate::safety::analyzer::RiskScore;

        let planned = |id: u32| PlannedOperation {
            operation: Operation::new(OperationId(id), OperationKind::AddColumn, "t"),
            phase: Phase::Transactional,
            wave_index: 0,
            lock_level: LockLevel::AccessExclusive,
            risk: RiskScore(0.1),
            estimated_duration: DurationEstimate {
                optimistic: Duration::ZERO,
                expected: Duration::ZERO,
                pessimistic: Duration::ZERO,
            },
        };
        let wave = Wave {
            operations: vec![planned(0), planned(1)],
        };
        let mut state = ExecutorState::new("p", Utc::now());
        state.mark_completed(OperationId(0));
        let left = remaining(&wave, &state);
        assert_eq!(left.operations.len(), 1);
        assert_eq!(left.operations[0].operation.id, OperationId(1));
    }
}
