use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::RetentionConfig;
use crate::error::StoreError;
use crate::scheduler::JobStore;

/// What one sweep pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Entries deleted from the data directory.
    pub removed: Vec<PathBuf>,
    /// Expired entries kept because their job has not finished.
    pub skipped_active: Vec<Uuid>,
    /// Entries that could not be inspected or deleted.
    pub errors: Vec<(PathBuf, String)>,
}

impl SweepReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Deletes job data older than the retention window.
///
/// Age is taken from each entry's last-modified time. An entry whose job is
/// still QUEUED or RUNNING, in the store or in its record on disk, is never
/// deleted. Entries that belong to no job are deleted once expired.
pub struct RetentionSweeper {
    store: Arc<JobStore>,
    data_dir: PathBuf,
    retention: Duration,
    interval: Duration,
}

impl RetentionSweeper {
    pub fn new(store: Arc<JobStore>, data_dir: impl Into<PathBuf>, config: &RetentionConfig) -> Self {
        Self {
            store,
            data_dir: data_dir.into(),
            retention: config.retention,
            interval: config.interval,
        }
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Sweep every `interval` until `shutdown` fires.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        tracing::info!(
            retention_secs = self.retention.as_secs(),
            interval_secs = self.interval.as_secs(),
            data_dir = %self.data_dir.display(),
            "Retention sweeper started"
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    let report = self.sweep().await;
                    if !report.removed.is_empty() || !report.is_clean() {
                        tracing::info!(
                            removed = report.removed.len(),
                            skipped_active = report.skipped_active.len(),
                            errors = report.errors.len(),
                            "Sweep finished"
                        );
                    }
                }
            }
        }
        tracing::info!("Retention sweeper stopped");
    }

    pub async fn sweep(&self) -> SweepReport {
        self.sweep_at(SystemTime::now()).await
    }

    /// One pass, taking `now` as the current time.
    pub async fn sweep_at(&self, now: SystemTime) -> SweepReport {
        let mut report = SweepReport::default();

        let mut entries = match tokio::fs::read_dir(&self.data_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return report,
            Err(e) => {
                tracing::warn!(data_dir = %self.data_dir.display(), error = %e, "Cannot read data directory");
                report.errors.push((self.data_dir.clone(), e.to_string()));
                return report;
            }
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    report.errors.push((self.data_dir.clone(), e.to_string()));
                    break;
                }
            };
            let path = entry.path();

            let modified = match entry.metadata().await.and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(e) => {
                    report.errors.push((path, e.to_string()));
                    continue;
                }
            };
            let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
            if age <= self.retention {
                continue;
            }

            let job_id = entry
                .file_name()
                .to_str()
                .and_then(|name| Uuid::parse_str(name).ok());
            if let Some(id) = job_id {
                let is_dir = entry.file_type().await.is_ok_and(|t| t.is_dir());
                match self.store.remove(id).await {
                    Ok(_) => {}
                    Err(StoreError::NotFound(_)) if !is_dir => {}
                    Err(StoreError::NotFound(_)) => match self.active_on_disk(id).await {
                        Ok(false) => {}
                        Ok(true) => {
                            tracing::debug!(job_id = %id, "Expired entry has an active record on disk, keeping");
                            report.skipped_active.push(id);
                            continue;
                        }
                        Err(e) => {
                            tracing::warn!(job_id = %id, error = %e, "Cannot read job record, keeping entry");
                            report.errors.push((path, e.to_string()));
                            continue;
                        }
                    },
                    Err(StoreError::Active(_)) => {
                        tracing::debug!(job_id = %id, "Expired entry belongs to an active job, keeping");
                        report.skipped_active.push(id);
                        continue;
                    }
                    Err(e) => {
                        report.errors.push((path, e.to_string()));
                        continue;
                    }
                }
            }

            match remove_entry(&path).await {
                Ok(()) => {
                    tracing::info!(path = %path.display(), age_secs = age.as_secs(), "Expired job data removed");
                    report.removed.push(path);
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to remove expired job data");
                    report.errors.push((path, e.to_string()));
                }
            }
        }

        report
    }

    /// Whether the persisted record for `id` is still QUEUED or RUNNING.
    ///
    /// The store may be a snapshot that predates the job, so the record on
    /// disk has the last word.
    async fn active_on_disk(&self, id: Uuid) -> Result<bool, StoreError> {
        match JobStore::load_record(&self.data_dir, id).await {
            Ok(job) => Ok(!job.status.is_terminal()),
            Err(StoreError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

async fn remove_entry(path: &Path) -> std::io::Result<()> {
    if tokio::fs::metadata(path).await?.is_dir() {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    }
}
