//! # Wesley: safe, zero-downtime PostgreSQL schema migrations
//!
//! Wesley compiles declarative schema change descriptions into lock-aware,
//! checkpointed execution plans and drives them against a live Postgres
//! database without blocking production traffic for longer than necessary.
//!
//! ## Data flow
//!
//! An external schema differ emits a list of [`operation::Operation`]s, and
//! Wesley takes it from there:
//!
//! 1. [`locks::classifier`] annotates each operation with its PostgreSQL lock level.
//! 2. [`rewrite`] expands unsafe operations into safe multi-step equivalents
//!    (e.g. `add_foreign_key` into a `NOT VALID` create plus a deferred validate).
//! 3. [`dependency`] orders operations into a DAG and rejects cycles.
//! 4. [`safety`] groups operations into waves and scores risk.
//! 5. [`planner`] produces a [`plan::Plan`]: phases, waves, rollback operations.
//! 6. [`coordinator`] drives the plan wave-by-wave over a [`channel::sql_channel::SqlChannel`],
//!    consulting [`monitor`] for deadlocks/contention and [`backpressure`] for
//!    adaptive concurrency, checkpointing via [`checkpoint`].
//!
//! Every subsystem publishes to the [`event_bus`] using the closed taxonomy
//! from spec §6; [`error`] defines the error classification shared across all
//! of them, and [`config`] resolves the tunables (timeouts, retry budget,
//! concurrency, thresholds) everything above is parameterized on.
//!
//! ## Module guide
//!
//! - [`operation`] — the `Operation` domain type and its kinds/phases.
//! - [`plan`] — `Plan`, `Wave`, `PlannedOperation`, risk and rollback types.
//! - [`locks`] — PostgreSQL lock levels and the classifier.
//! - [`rewrite`] — unsafe-to-safe operation rewriting and SQL construction.
//! - [`dependency`] — DAG construction, cycle detection, topological order.
//! - [`safety`] — wave grouping and risk scoring.
//! - [`planner`] — turns a dependency-ordered, classified operation set into a `Plan`.
//! - [`coordinator`] — the rolling-frontier scheduler that executes a `Plan`.
//! - [`channel`] — the streaming SQL executor and transaction discipline.
//! - [`checkpoint`] — atomic, retained on-disk `ExecutorState` snapshots.
//! - [`monitor`] — `pg_locks` polling, deadlock detection, contention alerts.
//! - [`backpressure`] — health-driven adaptive worker concurrency.
//! - [`event_bus`] — the closed event taxonomy and fan-out to sinks.
//! - [`persistence`] — the `.wesley/` working directory layout and plan artifacts.
//! - [`config`] — environment-resolved runtime configuration.
//! - [`telemetry`] — rendering events and errors for sinks.

pub mod backpressure;
pub mod channel;
pub mod checkpoint;
pub mod config;
pub mod coordinator;
pub mod dependency;
pub mod error;
pub mod event_bus;
pub mod locks;
pub mod monitor;
pub mod operation;
pub mod persistence;
pub mod plan;
pub mod planner;
pub mod rewrite;
pub mod safety;
pub mod telemetry;

pub use error::{ErrorClass, WesleyError};
pub use operation::{Operation, OperationId, OperationKind, Phase};
pub use plan::Plan;
