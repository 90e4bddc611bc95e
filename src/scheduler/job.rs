use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;

const TOKEN_LEN: usize = 43;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Forward-only lifecycle: QUEUED → RUNNING → COMPLETED | FAILED,
    /// plus QUEUED → FAILED for jobs rejected before they start.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::Running)
                | (JobStatus::Queued, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Completed)
                | (JobStatus::Running, JobStatus::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "QUEUED"),
            JobStatus::Running => write!(f, "RUNNING"),
            JobStatus::Completed => write!(f, "COMPLETED"),
            JobStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// Selects one of the two generated failure reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputSlot {
    Excel1,
    Excel2,
}

impl OutputSlot {
    pub fn file_name(self) -> &'static str {
        match self {
            OutputSlot::Excel1 => "excel1_failed_rows.json",
            OutputSlot::Excel2 => "excel2_failed_rows.json",
        }
    }
}

impl FromStr for OutputSlot {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "excel1" | "1" => Ok(OutputSlot::Excel1),
            "excel2" | "2" => Ok(OutputSlot::Excel2),
            other => Err(format!("unknown output slot '{other}'")),
        }
    }
}

/// What a submission asks for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    /// Rows to mark OFF duty.
    pub input1: PathBuf,
    /// Rows to mark ON duty.
    pub input2: PathBuf,
    pub column1: String,
    pub column2: String,
    pub vessel: String,
}

/// Both failure reports. Recorded together or not at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOutputs {
    pub excel1: PathBuf,
    pub excel2: PathBuf,
}

impl JobOutputs {
    pub fn path(&self, slot: OutputSlot) -> &Path {
        match slot {
            OutputSlot::Excel1 => &self.excel1,
            OutputSlot::Excel2 => &self.excel2,
        }
    }
}

/// Partial update applied by the worker holding a job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub error: Option<String>,
    pub outputs: Option<JobOutputs>,
}

impl JobUpdate {
    pub fn completed(outputs: JobOutputs) -> Self {
        Self {
            status: Some(JobStatus::Completed),
            outputs: Some(outputs),
            ..Self::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Failed),
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    /// Unguessable handle for downloads, separate from the id.
    pub token: String,
    pub status: JobStatus,
    pub spec: JobSpec,
    pub error: Option<String>,
    pub outputs: Option<JobOutputs>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(spec: JobSpec) -> Self {
        Self::with_id(Uuid::new_v4(), spec)
    }

    pub fn with_id(id: Uuid, spec: JobSpec) -> Self {
        let now = Utc::now();
        Self {
            id,
            token: generate_token(),
            status: JobStatus::Queued,
            spec,
            error: None,
            outputs: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply `update`, enforcing the lifecycle invariants:
    /// outputs are present iff COMPLETED, error is present iff FAILED.
    pub fn apply(&mut self, update: JobUpdate) -> Result<(), StoreError> {
        let status = update.status.unwrap_or(self.status);
        let moves = status != self.status;
        if (moves || self.status.is_terminal()) && !self.status.can_transition_to(status) {
            return Err(StoreError::InvalidTransition {
                id: self.id,
                from: self.status,
                to: status,
            });
        }

        let error = update
            .error
            .or_else(|| self.error.clone())
            .filter(|e| !e.trim().is_empty());
        let outputs = update.outputs.or_else(|| self.outputs.clone());

        if (status == JobStatus::Completed) != outputs.is_some() {
            return Err(StoreError::Invariant {
                id: self.id,
                reason: "outputs must be recorded exactly when the job completes",
            });
        }
        if (status == JobStatus::Failed) != error.is_some() {
            return Err(StoreError::Invariant {
                id: self.id,
                reason: "a non-empty error must be recorded exactly when the job fails",
            });
        }

        self.status = status;
        self.error = error;
        self.outputs = outputs;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn status_view(&self) -> JobStatusView {
        let completed = self.status == JobStatus::Completed;
        JobStatusView {
            id: self.id,
            status: self.status,
            error: self.error.clone(),
            outputs_ready: completed && self.outputs.is_some(),
            download_token: completed.then(|| self.token.clone()),
        }
    }

    pub fn token_view(&self) -> TokenView {
        TokenView {
            id: self.id,
            status: self.status,
            outputs: match self.status {
                JobStatus::Completed => self.outputs.clone(),
                _ => None,
            },
        }
    }
}

/// Answer to a status query by job id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobStatusView {
    pub id: Uuid,
    pub status: JobStatus,
    pub error: Option<String>,
    pub outputs_ready: bool,
    /// Only handed out once the job has completed.
    pub download_token: Option<String>,
}

/// Answer to a lookup by download token. Paths appear only when COMPLETED.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenView {
    pub id: Uuid,
    pub status: JobStatus,
    pub outputs: Option<JobOutputs>,
}

fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect()
}
