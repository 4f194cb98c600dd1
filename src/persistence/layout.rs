//! `WesleyHome`: bootstraps and addresses the `.wesley/` working directory
//! (checkpoints, logs, plan artifacts), and writes the inspection artifacts
//! from spec §6 ("Plan artifacts").
//!
//! Grounded on the teacher's `runtimes::persistence` module for the
//! serde-friendly-struct-plus-writer split, adapted from in-memory
//! checkpoint payloads to a fixed on-disk directory layout.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

use crate::plan::Plan;

#[derive(Debug, Error, miette::Diagnostic)]
pub enum LayoutError {
    #[error("failed to prepare wesley home at {path}: {source}")]
    #[diagnostic(code(wesley::persistence::io))]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize plan artifact: {0}")]
    #[diagnostic(code(wesley::persistence::serde))]
    Serde(#[from] serde_json::Error),
}

/// Addresses the well-known subdirectories and files under a Wesley working
/// directory. Does not itself own a `CheckpointManager`; callers construct
/// one against [`WesleyHome::checkpoints_dir`].
#[derive(Debug, Clone)]
pub struct WesleyHome {
    root: PathBuf,
}

impl WesleyHome {
    /// Resolves (without creating) a `.wesley/` directory under `project_dir`.
    pub fn new(project_dir: impl AsRef<Path>) -> Self {
        Self {
            root: project_dir.as_ref().join(".wesley"),
        }
    }

    /// Creates `checkpoints/` and `logs/` under the root if absent.
    pub fn bootstrap(&self) -> Result<(), LayoutError> {
        for dir in [self.checkpoints_dir(), self.logs_dir()] {
            std::fs::create_dir_all(&dir).map_err(|source| LayoutError::Io {
                path: dir,
                source,
            })?;
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn checkpoints_dir(&self) -> PathBuf {
        self.root.join("checkpoints")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn log_path(&self, plan_id: &str) -> PathBuf {
        self.logs_dir().join(format!("{plan_id}.log"))
    }

    pub fn plan_json_path(&self, plan_id: &str) -> PathBuf {
        self.root.join(format!("{plan_id}.plan.json"))
    }

    pub fn explain_txt_path(&self, plan_id: &str) -> PathBuf {
        self.root.join(format!("{plan_id}.explain.txt"))
    }

    pub fn explain_json_path(&self, plan_id: &str) -> PathBuf {
        self.root.join(format!("{plan_id}.explain.json"))
    }

    /// Writes `plan.json`: the full `Plan` with phases, waves, lock levels,
    /// risks, and estimated durations.
    pub fn write_plan_json(&self, plan: &Plan) -> Result<PathBuf, LayoutError> {
        let path = self.plan_json_path(&plan.id);
        write_json_pretty(&path, plan)?;
        Ok(path)
    }

    /// Writes `explain.json`: a machine-readable Lock Radar summary.
    pub fn write_explain_json(&self, plan: &Plan) -> Result<PathBuf, LayoutError> {
        let radar = lock_radar(plan);
        let path = self.explain_json_path(&plan.id);
        write_json_pretty(&path, &radar)?;
        Ok(path)
    }

    /// Writes `explain.txt`: the human-readable Lock Radar.
    pub fn write_explain_txt(&self, plan: &Plan) -> Result<PathBuf, LayoutError> {
        let path = self.explain_txt_path(&plan.id);
        let mut file = File::create(&path).map_err(|source| LayoutError::Io {
            path: path.clone(),
            source,
        })?;
        for entry in lock_radar(plan) {
            writeln!(
                file,
                "{:<6} {:<28} {:<22} {}",
                entry.operation, entry.target, entry.lock_level, entry.impact
            )
            .map_err(|source| LayoutError::Io {
                path: path.clone(),
                source,
            })?;
        }
        Ok(path)
    }
}

fn write_json_pretty<T: Serialize>(path: &Path, value: &T) -> Result<(), LayoutError> {
    let payload = serde_json::to_vec_pretty(value)?;
    let mut file = File::create(path).map_err(|source| LayoutError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    file.write_all(&payload).map_err(|source| LayoutError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
pub struct LockRadarEntry {
    pub operation: String,
    pub target: String,
    pub lock_level: String,
    pub impact: String,
}

/// Builds the "Lock Radar": per-operation lock level plus a predicted impact
/// badge derived from `LockLevel::blocking_potential` (spec §6).
fn lock_radar(plan: &Plan) -> Vec<LockRadarEntry> {
    plan.phases
        .iter()
        .flat_map(|phase| phase.waves.iter())
        .flat_map(|wave| wave.operations.iter())
        .map(|planned| {
            let potential = planned.lock_level.blocking_potential();
            let impact = match (
                potential.blocks_ddl,
                potential.blocks_writes,
                potential.blocks_reads,
            ) {
                (_, _, true) => "blocks reads+writes",
                (_, true, false) => "blocks writes",
                (true, false, false) => "blocks DDL only",
                (false, false, false) => "non-blocking",
            };
            LockRadarEntry {
                operation: planned.operation.id.to_string(),
                target: planned.operation.target.clone(),
                lock_level: planned.lock_level.to_string(),
                impact: impact.to_string(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_creates_checkpoints_and_logs() {
        let tmp = tempfile::tempdir().unwrap();
        let home = WesleyHome::new(tmp.path());
        home.bootstrap().unwrap();
        assert!(home.checkpoints_dir().is_dir());
        assert!(home.logs_dir().is_dir());
    }

    #[test]
    fn log_path_is_scoped_to_plan_id() {
        let home = WesleyHome::new("/tmp/project");
        assert_eq!(
            home.log_path("plan-1"),
            PathBuf::from("/tmp/project/.wesley/logs/plan-1.log")
        );
    }
}
