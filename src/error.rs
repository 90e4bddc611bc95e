use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::scheduler::JobStatus;

/// Failures reported by a [`PageDriver`](crate::driver::PageDriver) session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("{what} not ready after {after:?}")]
    Timeout { what: String, after: Duration },

    #[error("Element not found: {0}")]
    NotFound(String),

    #[error("Driver action failed: {0}")]
    Action(String),

    #[error("Driver session closed")]
    SessionClosed,
}

impl DriverError {
    pub fn timeout(what: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            what: what.into(),
            after,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

#[derive(Error, Debug)]
pub enum SheetError {
    #[error("Sheet I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed sheet: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Sheet has no header row")]
    MissingHeader,

    #[error("Sheet has no data rows")]
    NoRows,

    #[error("Column '{0}' not found in header")]
    MissingColumn(String),
}

/// Row-scoped failure while searching for and selecting a single identifier.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectError {
    #[error("Row has no identifier value")]
    EmptyIdentifier,

    #[error("No portal row matched '{0}'")]
    NoMatch(String),

    #[error("Checkbox for '{0}' did not become checked")]
    NotChecked(String),

    #[error(transparent)]
    Driver(#[from] DriverError),
}

/// Batch-scoped failure of a bulk duty assignment.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BulkApplyError {
    #[error("No rows are selected on the page")]
    NothingSelected,

    #[error("Bulk action did not settle within {0:?}")]
    NotSettled(Duration),

    #[error("Bulk action control failed: {0}")]
    Control(#[from] DriverError),
}

/// Job-scoped automation failure. Any of these aborts the whole run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AutomationError {
    #[error("Could not open portal session: {0}")]
    Session(DriverError),

    #[error("Portal login failed: {0}")]
    Login(DriverError),

    #[error("Vessel selection failed for '{vessel}': {source}")]
    VesselSelection {
        vessel: String,
        #[source]
        source: DriverError,
    },

    #[error("Automation run exceeded {0:?}")]
    TimedOut(Duration),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Job not found: {0}")]
    NotFound(Uuid),

    #[error("Job already exists: {0}")]
    Duplicate(Uuid),

    #[error("Job {id} cannot be claimed in status {status}")]
    NotClaimable { id: Uuid, status: JobStatus },

    #[error("Job {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: Uuid,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Job {id} update rejected: {reason}")]
    Invariant { id: Uuid, reason: &'static str },

    #[error("Job {0} is still active")]
    Active(Uuid),

    #[error("Job record I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Job record encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Terminal failure of a job; its message is what the job record carries.
#[derive(Error, Debug)]
pub enum JobError {
    #[error("Invalid input {}: {source}", path.display())]
    Input {
        path: PathBuf,
        #[source]
        source: SheetError,
    },

    #[error(transparent)]
    Automation(#[from] AutomationError),

    #[error("Failed to write output artifact {}: {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: SheetError,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Job queue is full")]
    QueueFull,

    #[error("Job queue is closed")]
    Closed,
}

#[derive(Error, Debug)]
pub enum DutySyncError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Job not found")]
    JobNotFound,

    #[error("Job outputs are not available in status {0}")]
    NotReady(JobStatus),

    #[error("Output artifact missing on disk: {}", .0.display())]
    ArtifactMissing(PathBuf),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Sheet(#[from] SheetError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DutySyncError>;
