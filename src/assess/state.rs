//! Job State Persistence
//!
//! Every run directory carries a `job.json` snapshot that is rewritten on
//! each state transition, so an operator can tell where a batch stopped.
//!
//! ```text
//! Pending -> Staged -> Running -> Succeeded
//!    |         |          |
//!    +---------+----------+-----> Failed
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{AssessError, Result};
use crate::kind::AssessKind;

const JOB_FILE: &str = "job.json";

/// Lifecycle of one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Run directory created, inputs not yet staged
    Pending,
    /// Every input linked into the run directory
    Staged,
    /// Subprocess started
    Running,
    /// Results parsed; the only state results are returned from
    Succeeded,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }

    /// Whether `next` may follow `self`.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Pending, Staged)
                | (Pending, Failed)
                | (Staged, Running)
                | (Staged, Failed)
                | (Running, Succeeded)
                | (Running, Failed)
        )
    }
}

/// Persistent snapshot of one run.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct JobRecord {
    pub kind: AssessKind,
    pub state: JobState,
    pub run_dir: PathBuf,
    pub inputs: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accepted: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejected: Option<usize>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// Creates a pending record for a run directory.
    pub fn new(kind: AssessKind, run_dir: impl Into<PathBuf>, inputs: usize) -> Self {
        let now = Utc::now();
        Self {
            kind,
            state: JobState::Pending,
            run_dir: run_dir.into(),
            inputs,
            command: None,
            exit_code: None,
            error: None,
            accepted: None,
            rejected: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Moves to `next`. Illegal transitions are logged and ignored.
    pub fn transition(&mut self, next: JobState) -> bool {
        if !self.state.can_transition_to(next) {
            warn!(
                "Ignoring illegal job transition {:?} -> {:?} ({})",
                self.state,
                next,
                self.run_dir.display()
            );
            return false;
        }

        debug!("Job {}: {:?} -> {:?}", self.run_dir.display(), self.state, next);
        self.state = next;
        self.updated_at = Utc::now();
        true
    }

    /// Marks the job failed, keeping the error text.
    pub fn mark_failed(&mut self, error: &AssessError) {
        if let AssessError::ExternalTool { code, .. } = error {
            self.exit_code = *code;
        }
        self.error = Some(error.to_string());
        self.transition(JobState::Failed);
    }

    /// Marks the job succeeded with its partition sizes.
    pub fn mark_succeeded(&mut self, accepted: usize, rejected: usize) {
        self.exit_code = Some(0);
        self.accepted = Some(accepted);
        self.rejected = Some(rejected);
        self.transition(JobState::Succeeded);
    }

    /// Path of the snapshot file.
    pub fn path(&self) -> PathBuf {
        self.run_dir.join(JOB_FILE)
    }

    /// Writes `job.json` into the run directory.
    pub fn save(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(self.path(), json)?;
        debug!("Saved job state to {}", self.path().display());
        Ok(())
    }

    /// Reads the snapshot of a run directory.
    pub fn load(run_dir: &Path) -> Result<Self> {
        let content = fs::read_to_string(run_dir.join(JOB_FILE))?;
        let record: JobRecord = serde_json::from_str(&content)?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_record_creation() {
        let record = JobRecord::new(AssessKind::Micrograph, "/work/micassess_001", 3);
        assert_eq!(record.state, JobState::Pending);
        assert_eq!(record.inputs, 3);
        assert!(record.error.is_none());
        assert_eq!(record.path(), PathBuf::from("/work/micassess_001/job.json"));
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut record = JobRecord::new(AssessKind::TwoDClass, "/work/run", 2);
        assert!(record.transition(JobState::Staged));
        assert!(record.transition(JobState::Running));
        record.mark_succeeded(1, 1);

        assert_eq!(record.state, JobState::Succeeded);
        assert!(record.state.is_terminal());
        assert_eq!(record.accepted, Some(1));
        assert_eq!(record.exit_code, Some(0));
    }

    #[test]
    fn test_illegal_transitions_ignored() {
        let mut record = JobRecord::new(AssessKind::Micrograph, "/work/run", 1);
        assert!(!record.transition(JobState::Running));
        assert!(!record.transition(JobState::Succeeded));
        assert_eq!(record.state, JobState::Pending);

        record.transition(JobState::Failed);
        assert!(!record.transition(JobState::Staged));
        assert_eq!(record.state, JobState::Failed);
    }

    #[test]
    fn test_failed_reachable_from_each_live_state() {
        for live in [JobState::Pending, JobState::Staged, JobState::Running] {
            assert!(live.can_transition_to(JobState::Failed));
        }
        assert!(!JobState::Succeeded.can_transition_to(JobState::Failed));
    }

    #[test]
    fn test_mark_failed_keeps_exit_code() {
        let mut record = JobRecord::new(AssessKind::Micrograph, "/work/run", 1);
        record.transition(JobState::Staged);
        record.transition(JobState::Running);
        record.mark_failed(&AssessError::ExternalTool {
            code: Some(137),
            stderr: "Killed".to_string(),
        });

        assert_eq!(record.state, JobState::Failed);
        assert_eq!(record.exit_code, Some(137));
        assert!(record.error.as_deref().unwrap().contains("Killed"));
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = tempdir().unwrap();
        let mut record = JobRecord::new(AssessKind::Micrograph, temp_dir.path(), 4);
        record.command = Some("micassess --model m.h5".to_string());
        record.transition(JobState::Staged);
        record.save().unwrap();

        let loaded = JobRecord::load(temp_dir.path()).unwrap();
        assert_eq!(loaded, record);
        assert_eq!(loaded.state, JobState::Staged);
    }

    #[test]
    fn test_load_nonexistent() {
        let result = JobRecord::load(Path::new("/nonexistent/run"));
        assert!(result.is_err());
    }
}
