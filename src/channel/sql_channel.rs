//! `SqlChannel`: the per-worker streaming executor that turns a `Wave` of
//! rewritten SQL statements into real Postgres round trips (spec §4.6).

use sqlx::PgPool;
use thiserror::Error;
use tracing::instrument;

use crate::channel::transaction::{TransactionManager, TransactionTimeouts};
use crate::error::{classify_sqlstate, ErrorClass};
use crate::operation::{Operation, Phase};
use crate::rewrite::sql::SqlStatement;

#[derive(Debug, Error, miette::Diagnostic)]
pub enum ChannelError {
    #[error("database error: {0}")]
    #[diagnostic(code(wesley::channel::database))]
    Database(#[from] sqlx::Error),

    #[error("operation {operation} classified as {class:?} ({message})")]
    #[diagnostic(code(wesley::channel::operation_failed))]
    OperationFailed {
        operation: String,
        class: ErrorClass,
        message: String,
    },

    #[error("non-transactional operation {0} cannot run inside a transactional phase")]
    #[diagnostic(code(wesley::channel::phase_mismatch))]
    PhaseMismatch(String),
}

impl ChannelError {
    /// Classifies the underlying Postgres SQLSTATE, if this error wraps one.
    pub fn error_class(&self) -> ErrorClass {
        match self {
            ChannelError::Database(sqlx::Error::Database(db)) => {
                db.code().map(|c| classify_sqlstate(&c)).unwrap_or(ErrorClass::Internal)
            }
            ChannelError::OperationFailed { class, .. } => *class,
            _ => ErrorClass::Internal,
        }
    }
}

/// One statement executed against Postgres, with the owning operation kept
/// for error attribution and event emission.
pub struct ExecutionUnit<'a> {
    pub operation: &'a Operation,
    pub statement: &'a SqlStatement,
}

#[derive(Clone)]
pub struct SqlChannel {
    pool: PgPool,
    timeouts: TransactionTimeouts,
}

impl SqlChannel {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            timeouts: TransactionTimeouts::default(),
        }
    }

    pub fn with_timeouts(mut self, timeouts: TransactionTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Runs a non-transactional-phase statement on its own connection.
    /// `CREATE INDEX CONCURRENTLY` and friends must not be wrapped in a
    /// transaction block, so each runs and commits independently.
    #[instrument(skip(self, statement), fields(operation = %operation.id))]
    pub async fn run_non_transactional(
        &self,
        operation: &Operation,
        statement: &SqlStatement,
    ) -> Result<(), ChannelError> {
        if !statement.non_transactional {
            return Err(ChannelError::PhaseMismatch(operation.id.to_string()));
        }
        sqlx::query(&statement.text)
            .execute(&self.pool)
            .await
            .map_err(|e| to_operation_error(operation, e))?;
        Ok(())
    }

    /// Runs every statement of a transactional-phase wave inside a single
    /// transaction guarded by the plan/phase advisory lock.
    #[instrument(skip(self, units))]
    pub async fn run_transactional_phase(
        &self,
        plan_id: &str,
        units: &[ExecutionUnit<'_>],
    ) -> Result<(), ChannelError> {
        let mut tx =
            TransactionManager::begin(&self.pool, plan_id, "transactional", self.timeouts).await?;
        for unit in units {
            if unit.statement.non_transactional {
                TransactionManager::rollback(tx).await?;
                return Err(ChannelError::PhaseMismatch(unit.operation.id.to_string()));
            }
            if let Err(e) = sqlx::query(&unit.statement.text).execute(&mut *tx).await {
                let err = to_operation_error(unit.operation, e);
                TransactionManager::rollback(tx).await?;
                return Err(err);
            }
        }
        TransactionManager::commit(tx).await
    }

    /// Runs a validation-phase statement (e.g. `VALIDATE CONSTRAINT`), only
    /// once `is_low_traffic` (if supplied) reports a suitable window.
    pub async fn run_validation<F>(
        &self,
        operation: &Operation,
        statement: &SqlStatement,
        is_low_traffic: Option<F>,
    ) -> Result<(), ChannelError>
    where
        F: Fn() -> bool,
    {
        debug_assert_eq!(operation.phase_hint, Some(Phase::Validation));
        if let Some(gate) = is_low_traffic {
            while !gate() {
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            }
        }
        sqlx::query(&statement.text)
            .execute(&self.pool)
            .await
            .map_err(|e| to_operation_error(operation, e))?;
        Ok(())
    }
}

fn to_operation_error(operation: &Operation, err: sqlx::Error) -> ChannelError {
    let class = match &err {
        sqlx::Error::Database(db) => db.code().map(|c| classify_sqlstate(&c)).unwrap_or(ErrorClass::Internal),
        _ => ErrorClass::ConnectionLost,
    };
    ChannelError::OperationFailed {
        operation: operation.id.to_string(),
        class,
        message: err.to_string(),
    }
}
