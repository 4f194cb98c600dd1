//! `CheckpointManager`: atomic, retained, on-disk persistence of `ExecutorState`
//! snapshots (spec §4.7).
//!
//! Grounded on the teacher's `runtimes::checkpointer` trait/impl split, adapted
//! from process-local in-memory storage to atomic file writes: the payload is
//! written to a temp file in the target directory, fsynced, then renamed into
//! place, so a crash mid-write never leaves a corrupt checkpoint visible.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::checkpoint::state::ExecutorState;

#[derive(Debug, Error, miette::Diagnostic)]
pub enum CheckpointerError {
    #[error("no checkpoint found for plan {plan_id}")]
    #[diagnostic(code(wesley::checkpoint::not_found))]
    NotFound { plan_id: String },

    #[error("checkpoint {id} failed integrity verification: {reason}")]
    #[diagnostic(
        code(wesley::checkpoint::corrupt),
        help("the checkpoint directory may have been truncated or edited out of band")
    )]
    Corrupt { id: String, reason: String },

    #[error("checkpoint I/O error: {0}")]
    #[diagnostic(code(wesley::checkpoint::io))]
    Io(#[from] std::io::Error),

    #[error("checkpoint serialization error: {0}")]
    #[diagnostic(code(wesley::checkpoint::serde))]
    Serde(#[from] serde_json::Error),
}

impl CheckpointerError {
    pub fn is_corruption(&self) -> bool {
        matches!(self, CheckpointerError::Corrupt { .. })
    }
}

pub const SCHEMA_VERSION: u32 = 1;
pub const DEFAULT_RETENTION: usize = 10;

/// An on-disk checkpoint envelope: the serialized `ExecutorState` plus a hash
/// of its JSON payload for corruption detection on load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub schema_version: u32,
    pub sequence: u64,
    pub state: ExecutorState,
    pub payload_hash: u64,
}

impl Checkpoint {
    pub fn from_state(id: impl Into<String>, sequence: u64, created_at: DateTime<Utc>, state: ExecutorState) -> Self {
        let payload_hash = hash_state(&state);
        Self {
            id: id.into(),
            created_at,
            schema_version: SCHEMA_VERSION,
            sequence,
            state,
            payload_hash,
        }
    }

    fn verify(&self) -> Result<(), CheckpointerError> {
        if hash_state(&self.state) != self.payload_hash {
            return Err(CheckpointerError::Corrupt {
                id: self.id.clone(),
                reason: "payload hash mismatch".into(),
            });
        }
        Ok(())
    }
}

fn hash_state(state: &ExecutorState) -> u64 {
    use std::hash::{Hash, Hasher};
    let bytes = serde_json::to_vec(state).unwrap_or_default();
    let mut hasher = rustc_hash::FxHasher::default();
    bytes.hash(&mut hasher);
    hasher.finish()
}

/// Persists and retrieves `Checkpoint`s for a single plan under
/// `<base_dir>/checkpoints/<plan_id>/`. Filenames are zero-padded sequence
/// numbers so lexicographic and chronological order coincide.
pub struct CheckpointManager {
    base_dir: PathBuf,
    retention: usize,
}

impl CheckpointManager {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            retention: DEFAULT_RETENTION,
        }
    }

    pub fn with_retention(mut self, retention: usize) -> Self {
        self.retention = retention.max(1);
        self
    }

    fn plan_dir(&self, plan_id: &str) -> PathBuf {
        self.base_dir.join("checkpoints").join(plan_id)
    }

    fn sequence_path(dir: &Path, sequence: u64) -> PathBuf {
        dir.join(format!("{sequence:020}.json"))
    }

    /// Writes `state` as a new checkpoint: temp file in the same directory,
    /// fsync, atomic rename. Then trims to `retention` most recent entries.
    pub fn save(&self, state: &ExecutorState) -> Result<Checkpoint, CheckpointerError> {
        let dir = self.plan_dir(&state.plan_id);
        std::fs::create_dir_all(&dir)?;

        let sequence = self.next_sequence(&dir)?;
        let id = format!("{}-{sequence:020}", state.plan_id);
        let checkpoint = Checkpoint::from_state(id, sequence, Utc::now(), state.clone());
        let payload = serde_json::to_vec_pretty(&checkpoint)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(&payload)?;
        tmp.as_file().sync_all()?;
        let target = Self::sequence_path(&dir, sequence);
        tmp.persist(&target).map_err(|e| e.error)?;

        self.retain(&state.plan_id, self.retention)?;
        Ok(checkpoint)
    }

    fn next_sequence(&self, dir: &Path) -> Result<u64, CheckpointerError> {
        let max = self
            .list_sequence_numbers(dir)?
            .into_iter()
            .max()
            .unwrap_or(0);
        Ok(max + 1)
    }

    fn list_sequence_numbers(&self, dir: &Path) -> Result<Vec<u64>, CheckpointerError> {
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if let Some(stem) = entry.path().file_stem().and_then(|s| s.to_str()) {
                if let Ok(n) = stem.parse::<u64>() {
                    out.push(n);
                }
            }
        }
        Ok(out)
    }

    /// Loads the most recent checkpoint for `plan_id`, verifying integrity.
    pub fn latest(&self, plan_id: &str) -> Result<Checkpoint, CheckpointerError> {
        let dir = self.plan_dir(plan_id);
        let max = self
            .list_sequence_numbers(&dir)?
            .into_iter()
            .max()
            .ok_or_else(|| CheckpointerError::NotFound {
                plan_id: plan_id.to_string(),
            })?;
        self.load(plan_id, max)
    }

    pub fn load(&self, plan_id: &str, sequence: u64) -> Result<Checkpoint, CheckpointerError> {
        let path = Self::sequence_path(&self.plan_dir(plan_id), sequence);
        let bytes = std::fs::read(&path)?;
        let checkpoint: Checkpoint = serde_json::from_slice(&bytes)?;
        checkpoint.verify()?;
        Ok(checkpoint)
    }

    /// Deletes all but the `keep` most recent checkpoints for `plan_id`.
    pub fn retain(&self, plan_id: &str, keep: usize) -> Result<(), CheckpointerError> {
        let dir = self.plan_dir(plan_id);
        let mut sequences = self.list_sequence_numbers(&dir)?;
        sequences.sort_unstable();
        if sequences.len() <= keep {
            return Ok(());
        }
        let evict_count = sequences.len() - keep;
        for seq in &sequences[..evict_count] {
            let path = Self::sequence_path(&dir, *seq);
            let _ = std::fs::remove_file(path);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::state::ExecutorState;

    fn manager() -> (tempfile::TempDir, CheckpointManager) {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path()).with_retention(2);
        (dir, manager)
    }

    #[test]
    fn save_then_latest_round_trips() {
        let (_dir, manager) = manager();
        let state = ExecutorState::new("plan-a", Utc::now());
        manager.save(&state).unwrap();
        let loaded = manager.latest("plan-a").unwrap();
        assert_eq!(loaded.state.plan_id, "plan-a");
    }

    #[test]
    fn retention_evicts_oldest() {
        let (_dir, manager) = manager();
        let plan_dir;
        {
            let state = ExecutorState::new("plan-b", Utc::now());
            manager.save(&state).unwrap();
            manager.save(&state).unwrap();
            manager.save(&state).unwrap();
            plan_dir = manager.plan_dir("plan-b");
        }
        let remaining = manager.list_sequence_numbers(&plan_dir).unwrap();
        assert_eq!(remaining.len(), 2);
    }

    #[test]
    fn missing_plan_is_not_found() {
        let (_dir, manager) = manager();
        let err = manager.latest("nonexistent").unwrap_err();
        assert!(matches!(err, CheckpointerError::NotFound { .. }));
    }

    #[test]
    fn tampered_payload_is_detected_as_corrupt() {
        let (_dir, manager) = manager();
        let state = ExecutorState::new("plan-c", Utc::now());
        manager.save(&state).unwrap();
        let dir = manager.plan_dir("plan-c");
        let path = CheckpointManager::sequence_path(&dir, 1);
        let mut checkpoint: Checkpoint =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        checkpoint.state.current_wave_index = 999;
        std::fs::write(&path, serde_json::to_vec_pretty(&checkpoint).unwrap()).unwrap();
        let err = manager.load("plan-c", 1).unwrap_err();
        assert!(err.is_corruption());
    }
}
