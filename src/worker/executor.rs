use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::driver::DriverFactory;
use crate::engine::{AutomationEngine, ListInput, ListOutcome, RunOutcome};
use crate::error::{AutomationError, JobError, StoreError};
use crate::scheduler::{Job, JobOutputs, JobStatus, JobStore, JobUpdate, OutputSlot};
use crate::sheet::{Row, Sheet, SheetCodec};

/// Result of job execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub error: Option<String>,
}

struct LoadedInput {
    sheet: Sheet,
    rows: Vec<Row>,
}

/// Runs one claimed job from input sheets to recorded outcome.
///
/// A job is only marked COMPLETED after both failure reports have been
/// written. Anything that goes wrong before that ends as FAILED with the
/// error message on the record and no outputs.
pub struct JobExecutor {
    store: Arc<JobStore>,
    engine: Arc<AutomationEngine>,
    drivers: Arc<dyn DriverFactory>,
    sheets: Arc<dyn SheetCodec>,
    data_dir: PathBuf,
    run_timeout: Duration,
}

impl JobExecutor {
    pub fn new(
        store: Arc<JobStore>,
        engine: Arc<AutomationEngine>,
        drivers: Arc<dyn DriverFactory>,
        sheets: Arc<dyn SheetCodec>,
        data_dir: impl Into<PathBuf>,
        run_timeout: Duration,
    ) -> Self {
        Self {
            store,
            engine,
            drivers,
            sheets,
            data_dir: data_dir.into(),
            run_timeout,
        }
    }

    /// Claim and run `job_id`.
    ///
    /// Returns `None` for an unknown id or one that is already running or
    /// finished, e.g. a second delivery. A claim that fails on storage is
    /// recorded as FAILED.
    pub async fn execute(&self, job_id: Uuid) -> Option<ExecutionResult> {
        let job = match self.store.claim(job_id).await {
            Ok(job) => job,
            Err(StoreError::NotClaimable { status, .. }) => {
                tracing::info!(job_id = %job_id, status = %status, "Job already claimed, skipping");
                return None;
            }
            Err(StoreError::NotFound(_)) => {
                tracing::warn!(job_id = %job_id, "Unknown job, skipping");
                return None;
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Could not claim job");
                let message = format!("Failed to claim job: {e}");
                return match self.store.force_fail(job_id, message).await {
                    Ok(job) => Some(ExecutionResult {
                        job_id,
                        status: job.status,
                        error: job.error,
                    }),
                    Err(e) => {
                        tracing::error!(job_id = %job_id, error = %e, "Job left without terminal status");
                        None
                    }
                };
            }
        };

        tracing::info!(job_id = %job_id, vessel = %job.spec.vessel, "Executing job");

        let update = match self.run(&job).await {
            Ok(outputs) => JobUpdate::completed(outputs),
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Job failed");
                JobUpdate::failed(e.to_string())
            }
        };
        let completed_outputs = update.outputs.clone();

        match self.store.update(job_id, update).await {
            Ok(job) => {
                tracing::info!(job_id = %job_id, status = %job.status, "Job finished");
                Some(ExecutionResult {
                    job_id,
                    status: job.status,
                    error: job.error,
                })
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Failed to record job outcome");
                if let Some(outputs) = completed_outputs {
                    remove_outputs(&outputs).await;
                }
                let message = format!("Failed to record job outcome: {e}");
                match self.store.force_fail(job_id, message).await {
                    Ok(job) => Some(ExecutionResult {
                        job_id,
                        status: job.status,
                        error: job.error,
                    }),
                    Err(e) => {
                        tracing::error!(job_id = %job_id, error = %e, "Job left without terminal status");
                        None
                    }
                }
            }
        }
    }

    async fn run(&self, job: &Job) -> Result<JobOutputs, JobError> {
        let off = self.load_input(&job.spec.input1, &job.spec.column1).await?;
        let on = self.load_input(&job.spec.input2, &job.spec.column2).await?;
        tracing::info!(
            job_id = %job.id,
            off_duty_rows = off.rows.len(),
            on_duty_rows = on.rows.len(),
            "Inputs loaded"
        );

        let driver = self
            .drivers
            .open_session()
            .await
            .map_err(AutomationError::Session)?;

        let run = tokio::time::timeout(
            self.run_timeout,
            self.engine.run(
                driver.as_ref(),
                &job.spec.vessel,
                ListInput {
                    rows: &off.rows,
                    identifier_column: &job.spec.column1,
                },
                ListInput {
                    rows: &on.rows,
                    identifier_column: &job.spec.column2,
                },
            ),
        )
        .await;

        if let Err(e) = driver.close().await {
            tracing::debug!(job_id = %job.id, error = %e, "Driver session did not close cleanly");
        }

        let outcome = match run {
            Ok(result) => result?,
            Err(_) => return Err(AutomationError::TimedOut(self.run_timeout).into()),
        };
        log_outcome(job.id, &outcome);

        self.write_outputs(job.id, &off.sheet, &on.sheet, &outcome)
            .await
    }

    async fn load_input(&self, path: &Path, column: &str) -> Result<LoadedInput, JobError> {
        let sheet = self
            .sheets
            .read(path)
            .await
            .and_then(|sheet| sheet.validate(column).map(|()| sheet))
            .map_err(|source| JobError::Input {
                path: path.to_path_buf(),
                source,
            })?;
        let rows = sheet.records();
        Ok(LoadedInput { sheet, rows })
    }

    async fn write_outputs(
        &self,
        job_id: Uuid,
        off_input: &Sheet,
        on_input: &Sheet,
        outcome: &RunOutcome,
    ) -> Result<JobOutputs, JobError> {
        let dir = self.data_dir.join(job_id.to_string());
        let outputs = JobOutputs {
            excel1: dir.join(OutputSlot::Excel1.file_name()),
            excel2: dir.join(OutputSlot::Excel2.file_name()),
        };

        let written = async {
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| JobError::Storage {
                    path: dir.clone(),
                    source: e.into(),
                })?;
            self.write_report(&outputs.excel1, off_input, &outcome.off_duty)
                .await?;
            self.write_report(&outputs.excel2, on_input, &outcome.on_duty)
                .await
        }
        .await;

        match written {
            Ok(()) => Ok(outputs),
            Err(e) => {
                remove_outputs(&outputs).await;
                Err(e)
            }
        }
    }

    async fn write_report(
        &self,
        path: &Path,
        input: &Sheet,
        outcome: &ListOutcome,
    ) -> Result<(), JobError> {
        let report = Sheet::from_rows(&input.header, &outcome.failed);
        self.sheets
            .write(path, &report)
            .await
            .map_err(|source| JobError::Storage {
                path: path.to_path_buf(),
                source,
            })
    }
}

fn log_outcome(job_id: Uuid, outcome: &RunOutcome) {
    tracing::info!(
        job_id = %job_id,
        off_applied = outcome.off_duty.applied,
        off_failed = outcome.off_duty.failed.len(),
        on_applied = outcome.on_duty.applied,
        on_failed = outcome.on_duty.failed.len(),
        "Automation run finished"
    );
}

async fn remove_outputs(outputs: &JobOutputs) {
    for path in [&outputs.excel1, &outputs.excel2] {
        if let Err(e) = tokio::fs::remove_file(path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %path.display(), error = %e, "Could not remove output");
            }
        }
    }
}
