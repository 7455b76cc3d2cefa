//! Array-job batches and their lifecycle.

use crate::ClusterError;
use chrono::{DateTime, Utc};
use regraph_core::{ProblemStatus, RegistrationProblem};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

/// Where a batch is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    /// Planned, not yet handed to the scheduler
    Queued,
    /// Accepted by the scheduler
    Submitted,
    /// Seen in the queue
    Running,
    /// Left the queue
    Succeeded,
    /// Could not be submitted
    Failed,
    /// Outputs pulled to local storage
    Synced,
}

impl BatchState {
    /// Submitted to the scheduler and not known to be finished.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Submitted | Self::Running)
    }

    pub fn problem_status(&self) -> ProblemStatus {
        match self {
            Self::Queued | Self::Submitted => ProblemStatus::Pending,
            Self::Running => ProblemStatus::Running,
            Self::Succeeded | Self::Synced => ProblemStatus::Succeeded,
            Self::Failed => ProblemStatus::Failed,
        }
    }
}

impl std::fmt::Display for BatchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Submitted => write!(f, "submitted"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Synced => write!(f, "synced"),
        }
    }
}

/// Problems submitted together as one array job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobBatch {
    pub index: usize,
    pub problems: Vec<RegistrationProblem>,
    pub state: BatchState,
    /// Scheduler job id, once submitted
    pub job_id: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,
    /// Last error, for failed batches
    pub error: Option<String>,
}

impl JobBatch {
    pub fn new(index: usize, problems: Vec<RegistrationProblem>) -> Self {
        Self {
            index,
            problems,
            state: BatchState::Queued,
            job_id: None,
            submitted_at: None,
            error: None,
        }
    }

    pub fn len(&self) -> usize {
        self.problems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.problems.is_empty()
    }

    pub fn contains(&self, problem: &RegistrationProblem) -> bool {
        self.problems.contains(problem)
    }

    /// Move to `next`, rejecting transitions the lifecycle does not allow.
    pub fn transition(&mut self, next: BatchState) -> Result<(), ClusterError> {
        use BatchState::*;
        let allowed = matches!(
            (self.state, next),
            (Queued, Submitted)
                | (Queued, Failed)
                | (Submitted, Running)
                | (Submitted, Succeeded)
                | (Submitted, Failed)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Succeeded, Synced)
        );
        if !allowed {
            return Err(ClusterError::InvalidState(format!(
                "batch {} cannot go from {} to {}",
                self.index, self.state, next
            )));
        }
        self.state = next;
        Ok(())
    }
}

/// Split problems into batches of at most `array_size`, numbering them from
/// `first_index`. Repeated problems are dropped, keeping the first occurrence.
pub fn plan_batches(
    problems: &[RegistrationProblem],
    array_size: usize,
    first_index: usize,
) -> Result<Vec<JobBatch>, ClusterError> {
    if array_size == 0 {
        return Err(ClusterError::Config("array_size must be at least 1".into()));
    }
    let mut seen = BTreeSet::new();
    let unique: Vec<RegistrationProblem> = problems
        .iter()
        .filter(|p| seen.insert(**p))
        .copied()
        .collect();
    Ok(unique
        .chunks(array_size)
        .enumerate()
        .map(|(i, chunk)| JobBatch::new(first_index + i, chunk.to_vec()))
        .collect())
}

/// Write the batch ledger as JSON.
pub fn save_batches(path: &Path, batches: &[JobBatch]) -> Result<(), ClusterError> {
    let json = serde_json::to_string_pretty(batches)
        .map_err(|e| ClusterError::Io(path.to_path_buf(), e.to_string()))?;
    std::fs::write(path, json).map_err(|e| ClusterError::Io(path.to_path_buf(), e.to_string()))
}

pub fn load_batches(path: &Path) -> Result<Vec<JobBatch>, ClusterError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ClusterError::Io(path.to_path_buf(), e.to_string()))?;
    serde_json::from_str(&content).map_err(|e| ClusterError::Io(path.to_path_buf(), e.to_string()))
}
