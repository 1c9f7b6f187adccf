//! Per-run result reporting.

use crate::target::Target;
use crate::types::{RunId, RunStatus, StepId, StepState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Final state of one step, with substep accounting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepReport {
    pub id: StepId,
    pub state: StepState,
    pub substeps: usize,
    pub executed: usize,
    pub skipped: usize,
    pub failed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// An error attributed to the step that raised it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepError {
    pub step: StepId,
    pub message: String,
}

/// Per-run summary: every step with its final state, produced targets, and
/// errors with step attribution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub steps: Vec<StepReport>,
    pub produced: Vec<Target>,
    pub errors: Vec<StepError>,
}

impl RunReport {
    /// Overall success; drives the process exit status. Error-tolerant
    /// failures do not count against the run.
    pub fn success(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    pub fn step(&self, id: &StepId) -> Option<&StepReport> {
        self.steps.iter().find(|s| &s.id == id)
    }

    /// Substeps that actually invoked an action, across all steps.
    pub fn total_executed(&self) -> usize {
        self.steps.iter().map(|s| s.executed).sum()
    }

    pub fn total_skipped(&self) -> usize {
        self.steps.iter().map(|s| s.skipped).sum()
    }
}
