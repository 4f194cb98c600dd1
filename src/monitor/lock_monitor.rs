//! `LockMonitor`: periodic `pg_locks`/`pg_stat_activity` probing, deadlock
//! detection, and contention threshold alerts (spec §4.9).

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use sqlx::{PgPool, Row};
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{instrument, warn};

use crate::event_bus::{Event, EventEmitter};
use crate::monitor::graph::{ContentionStat, Lock, LockSnapshot, WaitEdge};

#[derive(Debug, Error, miette::Diagnostic)]
pub enum MonitorError {
    #[error("lock monitor database error: {0}")]
    #[diagnostic(code(wesley::monitor::database))]
    Database(#[from] sqlx::Error),

    #[error("lock monitor already running")]
    #[diagnostic(code(wesley::monitor::already_running))]
    AlreadyRunning,
}

#[derive(Debug, Clone, Copy)]
pub struct MonitorThresholds {
    pub max_wait_time: Duration,
    pub max_blocked_queries: usize,
    pub max_lock_hold_time: Duration,
    pub poll_interval: Duration,
}

impl Default for MonitorThresholds {
    fn default() -> Self {
        Self {
            max_wait_time: Duration::from_secs(10),
            max_blocked_queries: 5,
            max_lock_hold_time: Duration::from_secs(60),
            poll_interval: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdAlert {
    MaxWaitTimeExceeded,
    MaxBlockedQueriesExceeded,
    MaxLockHoldTimeExceeded,
}

#[derive(Debug, Clone, Default)]
pub struct LockReport {
    pub deadlock_cycles: Vec<Vec<i32>>,
    pub contention: Vec<ContentionStat>,
    pub alerts: Vec<ThresholdAlert>,
}

struct Shared {
    latest: RwLock<LockReport>,
    thresholds: MonitorThresholds,
}

/// Background lock and deadlock probe. Spawns a polling task on `start` that
/// periodically snapshots `pg_locks`, detects waits-for cycles, and raises
/// contention alerts; `report()` returns the latest computed snapshot.
pub struct LockMonitor {
    pool: PgPool,
    shared: Arc<Shared>,
    events: Arc<dyn EventEmitter>,
    handle: Option<JoinHandle<()>>,
    stop: Arc<Notify>,
}

impl LockMonitor {
    pub fn new(pool: PgPool, thresholds: MonitorThresholds, events: Arc<dyn EventEmitter>) -> Self {
        Self {
            pool,
            shared: Arc::new(Shared {
                latest: RwLock::new(LockReport::default()),
                thresholds,
            }),
            events,
            handle: None,
            stop: Arc::new(Notify::new()),
        }
    }

    pub fn start(&mut self) -> Result<(), MonitorError> {
        if self.handle.is_some() {
            return Err(MonitorError::AlreadyRunning);
        }
        let pool = self.pool.clone();
        let shared = self.shared.clone();
        let events = self.events.clone();
        let stop = self.stop.clone();
        let interval = shared.thresholds.poll_interval;

        self.handle = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = stop.notified() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = poll_once(&pool, &shared, events.as_ref()).await {
                            warn!(error = %e, "lock monitor probe failed");
                        }
                    }
                }
            }
        }));
        Ok(())
    }

    pub fn stop(&mut self) {
        self.stop.notify_one();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    pub fn report(&self) -> LockReport {
        self.shared.latest.read().clone()
    }
}

#[instrument(skip(pool, shared, events))]
async fn poll_once(pool: &PgPool, shared: &Shared, events: &dyn EventEmitter) -> Result<(), MonitorError> {
    let snapshot = fetch_snapshot(pool).await?;
    let cycles = snapshot.find_cycles();
    for cycle in &cycles {
        let total_wait = snapshot.total_wait(cycle);
        let _ = events.emit(Event::deadlock_detected(cycle.clone(), total_wait));
    }
    let contention = contention_stats(&snapshot);

    let mut alerts = Vec::new();
    if contention.iter().any(|c| c.max_wait > shared.thresholds.max_wait_time) {
        alerts.push(ThresholdAlert::MaxWaitTimeExceeded);
        if let Some(worst) = contention.iter().max_by_key(|c| c.max_wait) {
            let _ = events.emit(Event::lock_wait_alert(worst.relation.clone(), worst.waiting_count));
        }
    }
    if contention.iter().map(|c| c.waiting_count).sum::<usize>() > shared.thresholds.max_blocked_queries {
        alerts.push(ThresholdAlert::MaxBlockedQueriesExceeded);
    }
    if let Some((relation, held_for)) = longest_held_lock(&snapshot) {
        if held_for > shared.thresholds.max_lock_hold_time {
            alerts.push(ThresholdAlert::MaxLockHoldTimeExceeded);
            let _ = events.emit(Event::threshold_exceeded(format!(
                "lock on {relation} held for {held_for:?}, exceeding max_lock_hold_time"
            )));
        }
    }
    for stat in &contention {
        if stat.max_wait > shared.thresholds.max_wait_time {
            let _ = events.emit(Event::lock_contention_alert(
                stat.relation.clone(),
                stat.waiting_count,
                stat.avg_wait().as_millis() as u64,
            ));
        }
    }

    *shared.latest.write() = LockReport {
        deadlock_cycles: cycles,
        contention,
        alerts,
    };
    Ok(())
}

async fn fetch_snapshot(pool: &PgPool) -> Result<LockSnapshot, MonitorError> {
    let rows = sqlx::query(
        "SELECT l.pid AS backend_id, l.relation::regclass::text AS relation, \
                l.locktype AS lock_type, l.mode, l.granted, l.transactionid::int4 AS transaction_id, \
                a.query AS query_text, a.query_start AS query_started_at, \
                a.state_change AS waiting_since \
         FROM pg_locks l \
         LEFT JOIN pg_stat_activity a ON a.pid = l.pid \
         WHERE l.relation IS NOT NULL",
    )
    .fetch_all(pool)
    .await?;

    let locks: Vec<Lock> = rows
        .iter()
        .map(|row| Lock {
            backend_id: row.get("backend_id"),
            relation: row.get("relation"),
            lock_type: row.get("lock_type"),
            mode: row.get("mode"),
            granted: row.get("granted"),
            transaction_id: row.get("transaction_id"),
            query_text: row.get("query_text"),
            query_started_at: row.get("query_started_at"),
            waiting_since: row.get("waiting_since"),
        })
        .collect();

    let wait_rows = sqlx::query(
        "SELECT blocked.pid AS waiting_pid, blocking.pid AS blocking_pid, \
                blocked.locktype AS lock_type, \
                blocked.relation::regclass::text AS relation, \
                COALESCE(EXTRACT(epoch FROM (now() - a.state_change)) * 1000, 0)::bigint AS wait_duration_ms \
         FROM pg_locks blocked \
         JOIN pg_locks blocking \
           ON blocked.locktype = blocking.locktype \
          AND blocked.database IS NOT DISTINCT FROM blocking.database \
          AND blocked.relation IS NOT DISTINCT FROM blocking.relation \
          AND blocked.pid != blocking.pid \
         LEFT JOIN pg_stat_activity a ON a.pid = blocked.pid \
         WHERE NOT blocked.granted AND blocking.granted",
    )
    .fetch_all(pool)
    .await?;

    let waits: Vec<WaitEdge> = wait_rows
        .iter()
        .map(|row| WaitEdge {
            waiting_pid: row.get("waiting_pid"),
            blocking_pid: row.get("blocking_pid"),
            lock_type: row.get("lock_type"),
            relation: row.get("relation"),
            wait_duration_ms: {
                let ms: i64 = row.get("wait_duration_ms");
                ms.max(0) as u64
            },
        })
        .collect();

    Ok(LockSnapshot { locks, waits })
}

/// The relation and hold duration of the longest-held currently granted
/// lock, derived from each lock's owning backend's `query_started_at` rather
/// than from wait-edge contention — a lock can be held for a long time with
/// no other backend yet queued behind it.
fn longest_held_lock(snapshot: &LockSnapshot) -> Option<(String, Duration)> {
    let now = chrono::Utc::now();
    snapshot
        .locks
        .iter()
        .filter(|l| l.granted)
        .filter_map(|l| {
            let started = l.query_started_at?;
            let held_for = (now - started).to_std().ok()?;
            Some((l.relation.clone(), held_for))
        })
        .max_by_key(|(_, held_for)| *held_for)
}

fn contention_stats(snapshot: &LockSnapshot) -> Vec<ContentionStat> {
    use rustc_hash::FxHashMap;

    struct Acc {
        waiting_count: usize,
        total_wait_ms: u64,
        max_wait_ms: u64,
    }

    let mut by_relation: FxHashMap<&str, Acc> = FxHashMap::default();
    for edge in &snapshot.waits {
        let acc = by_relation.entry(edge.relation.as_str()).or_insert(Acc {
            waiting_count: 0,
            total_wait_ms: 0,
            max_wait_ms: 0,
        });
        acc.waiting_count += 1;
        acc.total_wait_ms += edge.wait_duration_ms;
        acc.max_wait_ms = acc.max_wait_ms.max(edge.wait_duration_ms);
    }

    by_relation
        .into_iter()
        .map(|(relation, acc)| ContentionStat {
            relation: relation.to_string(),
            waiting_count: acc.waiting_count,
            total_wait: Duration::from_millis(acc.total_wait_ms),
            max_wait: Duration::from_millis(acc.max_wait_ms),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::graph::WaitEdge;

    fn edge(waiting: i32, blocking: i32, relation: &str, wait_ms: u64) -> WaitEdge {
        WaitEdge {
            waiting_pid: waiting,
            blocking_pid: blocking,
            lock_type: "relation".into(),
            relation: relation.into(),
            wait_duration_ms: wait_ms,
        }
    }

    #[test]
    fn contention_stats_aggregates_total_and_max_wait() {
        let snapshot = LockSnapshot {
            locks: vec![],
            waits: vec![
                edge(1, 2, "orders", 100),
                edge(3, 2, "orders", 400),
                edge(4, 5, "users", 50),
            ],
        };
        let stats = contention_stats(&snapshot);
        let orders = stats.iter().find(|s| s.relation == "orders").unwrap();
        assert_eq!(orders.waiting_count, 2);
        assert_eq!(orders.total_wait, Duration::from_millis(500));
        assert_eq!(orders.max_wait, Duration::from_millis(400));
        assert_eq!(orders.avg_wait(), Duration::from_millis(250));
    }

    fn granted_lock(relation: &str, held_since: chrono::DateTime<chrono::Utc>) -> Lock {
        Lock {
            backend_id: 1,
            relation: relation.into(),
            lock_type: "relation".into(),
            mode: "AccessExclusiveLock".into(),
            granted: true,
            transaction_id: None,
            query_text: None,
            query_started_at: Some(held_since),
            waiting_since: None,
        }
    }

    #[test]
    fn longest_held_lock_ignores_uncontended_but_long_held_locks_correctly() {
        let now = chrono::Utc::now();
        let snapshot = LockSnapshot {
            locks: vec![
                granted_lock("orders", now - chrono::Duration::seconds(5)),
                granted_lock("users", now - chrono::Duration::minutes(10)),
            ],
            waits: vec![],
        };
        // No contention at all (waits is empty), yet the long-held lock on
        // `users` must still be detected from Lock.query_started_at alone.
        let (relation, held_for) = longest_held_lock(&snapshot).unwrap();
        assert_eq!(relation, "users");
        assert!(held_for >= Duration::from_secs(590));
    }
}
