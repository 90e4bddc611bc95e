//! Submit, status and download operations over the job store and queue.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use uuid::Uuid;

use crate::error::{DutySyncError, Result};
use crate::scheduler::{JobSpec, JobStatus, JobStatusView, JobStore, JobUpdate, OutputSlot};
use crate::worker::DispatchHandle;

const INPUT1_FILE: &str = "input1.json";
const INPUT2_FILE: &str = "input2.json";

/// A new job: two uploaded sheets, the identifier column of each, and the vessel.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    /// Sheet whose rows are marked OFF duty.
    pub input1: PathBuf,
    pub column1: String,
    /// Sheet whose rows are marked ON duty.
    pub input2: PathBuf,
    pub column2: String,
    pub vessel: String,
}

#[derive(Clone)]
pub struct JobService {
    store: Arc<JobStore>,
    queue: DispatchHandle,
    data_dir: PathBuf,
}

impl JobService {
    pub fn new(store: Arc<JobStore>, queue: DispatchHandle, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            queue,
            data_dir: data_dir.into(),
        }
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    /// Take a copy of both sheets, record a QUEUED job and hand it to the workers.
    ///
    /// If the queue refuses the job it is recorded as FAILED and the queue
    /// error is returned.
    pub async fn submit(&self, request: SubmitRequest) -> Result<Uuid> {
        let column1 = required("column1", &request.column1)?;
        let column2 = required("column2", &request.column2)?;
        let vessel = required("vessel", &request.vessel)?;

        let id = Uuid::new_v4();
        let dir = self.data_dir.join(id.to_string());
        let spec = match self.stage_inputs(&dir, &request).await {
            Ok((input1, input2)) => JobSpec {
                input1,
                input2,
                column1,
                column2,
                vessel,
            },
            Err(e) => {
                discard_dir(&dir).await;
                return Err(e.into());
            }
        };

        if let Err(e) = self.store.create_with_id(id, spec).await {
            discard_dir(&dir).await;
            return Err(e.into());
        }

        if let Err(e) = self.queue.enqueue(id) {
            tracing::warn!(job_id = %id, error = %e, "Job rejected by queue");
            self.store
                .update(id, JobUpdate::failed(e.to_string()))
                .await?;
            return Err(e.into());
        }

        tracing::info!(job_id = %id, "Job submitted");
        Ok(id)
    }

    /// Re-enqueue jobs left QUEUED by a previous process.
    pub fn resume(&self, ids: &[Uuid]) -> usize {
        let mut resumed = 0;
        for &id in ids {
            match self.queue.enqueue(id) {
                Ok(()) => resumed += 1,
                Err(e) => {
                    tracing::warn!(job_id = %id, error = %e, "Could not re-enqueue recovered job");
                }
            }
        }
        if resumed > 0 {
            tracing::info!(resumed, "Recovered queued jobs");
        }
        resumed
    }

    pub async fn status(&self, id: Uuid) -> Result<JobStatusView> {
        self.store
            .get(id)
            .await
            .map(|job| job.status_view())
            .ok_or(DutySyncError::JobNotFound)
    }

    /// Path of one failure report, looked up by download token.
    pub async fn download(&self, token: &str, slot: OutputSlot) -> Result<PathBuf> {
        let view = self
            .store
            .get_by_token(token)
            .await
            .ok_or(DutySyncError::JobNotFound)?;
        let outputs = match (view.status, view.outputs) {
            (JobStatus::Completed, Some(outputs)) => outputs,
            (status, _) => return Err(DutySyncError::NotReady(status)),
        };

        let path = outputs.path(slot).to_path_buf();
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(path),
            Ok(_) => Err(DutySyncError::ArtifactMissing(path)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(DutySyncError::ArtifactMissing(path))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn stage_inputs(
        &self,
        dir: &Path,
        request: &SubmitRequest,
    ) -> std::io::Result<(PathBuf, PathBuf)> {
        tokio::fs::create_dir_all(dir).await?;
        let input1 = dir.join(INPUT1_FILE);
        let input2 = dir.join(INPUT2_FILE);
        tokio::fs::copy(&request.input1, &input1).await?;
        tokio::fs::copy(&request.input2, &input2).await?;
        Ok((input1, input2))
    }
}

fn required(field: &str, value: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(DutySyncError::InvalidRequest(format!("{field} must not be blank")));
    }
    Ok(value.to_string())
}

async fn discard_dir(dir: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(dir).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(dir = %dir.display(), error = %e, "Could not discard job directory");
        }
    }
}
