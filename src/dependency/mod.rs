//! Dependency DAG construction, cycle detection, and topological ordering.

pub mod dag;

pub use dag::{Dag, DependencyError, DependencyResolver};
