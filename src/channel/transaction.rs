//! `TransactionManager`: per-phase transaction discipline — timeouts, the
//! plan/phase advisory lock, and commit/rollback (spec §4.6).

use sqlx::{Postgres, Transaction};
use std::time::Duration;

use crate::channel::sql_channel::ChannelError;

#[derive(Debug, Clone, Copy)]
pub struct TransactionTimeouts {
    pub lock_timeout: Duration,
    pub statement_timeout: Duration,
    pub idle_in_transaction_timeout: Duration,
}

impl Default for TransactionTimeouts {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(5),
            statement_timeout: Duration::from_secs(30),
            idle_in_transaction_timeout: Duration::from_secs(60),
        }
    }
}

/// Hashes `(plan_id, phase_name)` into the bigint key `pg_advisory_xact_lock`
/// expects, so two workers never run the same phase of the same plan at once.
pub fn advisory_lock_key(plan_id: &str, phase_name: &str) -> i64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = rustc_hash::FxHasher::default();
    plan_id.hash(&mut hasher);
    phase_name.hash(&mut hasher);
    hasher.finish() as i64
}

pub struct TransactionManager;

impl TransactionManager {
    /// Opens a transaction, applies the configured timeouts, and takes the
    /// plan/phase advisory lock before returning it to the caller.
    pub async fn begin<'a>(
        pool: &'a sqlx::PgPool,
        plan_id: &str,
        phase_name: &str,
        timeouts: TransactionTimeouts,
    ) -> Result<Transaction<'a, Postgres>, ChannelError> {
        let mut tx = pool.begin().await?;

        sqlx::query(&format!(
            "SET LOCAL lock_timeout = '{}ms'",
            timeouts.lock_timeout.as_millis()
        ))
        .execute(&mut *tx)
        .await?;
        sqlx::query(&format!(
            "SET LOCAL statement_timeout = '{}ms'",
            timeouts.statement_timeout.as_millis()
        ))
        .execute(&mut *tx)
        .await?;
        sqlx::query(&format!(
            "SET LOCAL idle_in_transaction_session_timeout = '{}ms'",
            timeouts.idle_in_transaction_timeout.as_millis()
        ))
        .execute(&mut *tx)
        .await?;

        let key = advisory_lock_key(plan_id, phase_name);
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(key)
            .execute(&mut *tx)
            .await?;

        Ok(tx)
    }

    pub async fn commit(tx: Transaction<'_, Postgres>) -> Result<(), ChannelError> {
        tx.commit().await?;
        Ok(())
    }

    pub async fn rollback(tx: Transaction<'_, Postgres>) -> Result<(), ChannelError> {
        tx.rollback().await?;
        Ok(())
    }
}
