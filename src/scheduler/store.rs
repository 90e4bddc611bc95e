use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::error::StoreError;
use crate::scheduler::job::{Job, JobSpec, JobStatus, JobUpdate, TokenView};

/// File name of the persisted record inside a job directory.
pub const RECORD_FILE: &str = "job.json";

const INTERRUPTED: &str = "interrupted by restart";

type JobCell = Arc<Mutex<Job>>;

#[derive(Default)]
struct Index {
    jobs: HashMap<Uuid, JobCell>,
    tokens: HashMap<String, Uuid>,
}

/// Durable record of every job.
///
/// Each job sits behind its own mutex, so a reader never sees a half-applied
/// update and only one caller can move a job out of QUEUED. When backed by a
/// data directory every accepted change is written to
/// `<data_dir>/<job_id>/job.json` before it becomes visible.
pub struct JobStore {
    index: RwLock<Index>,
    data_dir: Option<PathBuf>,
}

impl JobStore {
    /// Store that keeps records in memory only.
    pub fn in_memory() -> Self {
        Self {
            index: RwLock::new(Index::default()),
            data_dir: None,
        }
    }

    /// Empty store persisting records under `data_dir`.
    pub fn persistent(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            index: RwLock::new(Index::default()),
            data_dir: Some(data_dir.into()),
        }
    }

    /// Reload persisted records and recover from an unclean stop.
    ///
    /// Jobs found RUNNING were cut off mid-run and are marked FAILED. The ids
    /// of QUEUED jobs are returned, oldest first, so they can be re-enqueued.
    pub async fn open(data_dir: impl Into<PathBuf>) -> Result<(Self, Vec<Uuid>), StoreError> {
        let data_dir = data_dir.into();
        tokio::fs::create_dir_all(&data_dir).await?;
        let store = Self::persistent(&data_dir);
        let mut queued = Vec::new();

        for mut job in load_records(&data_dir).await? {
            if job.status == JobStatus::Running {
                tracing::warn!(job_id = %job.id, "Job was running at shutdown, marking failed");
                job.apply(JobUpdate::failed(INTERRUPTED))?;
                store.persist(&job).await?;
            }
            if job.status == JobStatus::Queued {
                queued.push((job.created_at, job.id));
            }
            store.index_job(job).await?;
        }

        queued.sort();
        let queued: Vec<Uuid> = queued.into_iter().map(|(_, id)| id).collect();
        tracing::info!(
            jobs = store.len().await,
            queued = queued.len(),
            data_dir = %data_dir.display(),
            "Job store opened"
        );
        Ok((store, queued))
    }

    /// Read-only view of the records under `data_dir`. Nothing is written back.
    pub async fn snapshot(data_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let store = Self::in_memory();
        for job in load_records(data_dir.as_ref()).await? {
            store.index_job(job).await?;
        }
        Ok(store)
    }

    /// Load a single persisted record.
    pub async fn load_record(data_dir: impl AsRef<Path>, id: Uuid) -> Result<Job, StoreError> {
        let path = data_dir.as_ref().join(id.to_string()).join(RECORD_FILE);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound(id)),
            Err(e) => Err(e.into()),
        }
    }

    pub fn data_dir(&self) -> Option<&Path> {
        self.data_dir.as_deref()
    }

    /// Create a QUEUED job for `spec`.
    pub async fn create(&self, spec: JobSpec) -> Result<Job, StoreError> {
        self.insert(Job::new(spec)).await
    }

    /// Create a QUEUED job under a caller-chosen id.
    pub async fn create_with_id(&self, id: Uuid, spec: JobSpec) -> Result<Job, StoreError> {
        self.insert(Job::with_id(id, spec)).await
    }

    async fn insert(&self, job: Job) -> Result<Job, StoreError> {
        if self.index.read().await.jobs.contains_key(&job.id) {
            return Err(StoreError::Duplicate(job.id));
        }
        self.persist(&job).await?;
        self.index_job(job.clone()).await?;
        tracing::debug!(job_id = %job.id, "Job created");
        Ok(job)
    }

    async fn index_job(&self, job: Job) -> Result<(), StoreError> {
        let mut index = self.index.write().await;
        if index.jobs.contains_key(&job.id) {
            return Err(StoreError::Duplicate(job.id));
        }
        index.tokens.insert(job.token.clone(), job.id);
        index.jobs.insert(job.id, Arc::new(Mutex::new(job)));
        Ok(())
    }

    async fn cell(&self, id: Uuid) -> Result<JobCell, StoreError> {
        self.index
            .read()
            .await
            .jobs
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    /// Move a job from QUEUED to RUNNING. Exactly one caller wins.
    pub async fn claim(&self, id: Uuid) -> Result<Job, StoreError> {
        let cell = self.cell(id).await?;
        let mut job = cell.lock().await;
        if job.status != JobStatus::Queued {
            return Err(StoreError::NotClaimable {
                id,
                status: job.status,
            });
        }
        let mut next = job.clone();
        next.apply(JobUpdate {
            status: Some(JobStatus::Running),
            ..JobUpdate::default()
        })?;
        self.persist(&next).await?;
        *job = next.clone();
        tracing::debug!(job_id = %id, "Job claimed");
        Ok(next)
    }

    /// Apply `update` under the job's lock. Rejected updates leave the job untouched.
    pub async fn update(&self, id: Uuid, update: JobUpdate) -> Result<Job, StoreError> {
        let cell = self.cell(id).await?;
        let mut job = cell.lock().await;
        let mut next = job.clone();
        next.apply(update)?;
        self.persist(&next).await?;
        *job = next.clone();
        tracing::debug!(job_id = %id, status = %next.status, "Job updated");
        Ok(next)
    }

    /// Mark a job FAILED with `error`, even if the record cannot be written.
    ///
    /// Used when the record on disk is the thing that is broken. A persistence
    /// error is logged and the in-memory record still moves to FAILED.
    pub async fn force_fail(&self, id: Uuid, error: impl Into<String>) -> Result<Job, StoreError> {
        let cell = self.cell(id).await?;
        let mut job = cell.lock().await;
        let mut next = job.clone();
        next.apply(JobUpdate::failed(error))?;
        if let Err(e) = self.persist(&next).await {
            tracing::warn!(job_id = %id, error = %e, "Failure recorded in memory only");
        }
        *job = next.clone();
        Ok(next)
    }

    pub async fn get(&self, id: Uuid) -> Option<Job> {
        let cell = self.cell(id).await.ok()?;
        let job = cell.lock().await;
        Some(job.clone())
    }

    pub async fn get_by_token(&self, token: &str) -> Option<TokenView> {
        let id = *self.index.read().await.tokens.get(token)?;
        let cell = self.cell(id).await.ok()?;
        let job = cell.lock().await;
        Some(job.token_view())
    }

    /// All jobs, oldest first.
    pub async fn list(&self) -> Vec<Job> {
        let cells: Vec<JobCell> = self.index.read().await.jobs.values().cloned().collect();
        let mut jobs = Vec::with_capacity(cells.len());
        for cell in cells {
            jobs.push(cell.lock().await.clone());
        }
        jobs.sort_by_key(|j| j.created_at);
        jobs
    }

    pub async fn len(&self) -> usize {
        self.index.read().await.jobs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop a terminal job's record. Files are left to the caller.
    pub async fn remove(&self, id: Uuid) -> Result<Job, StoreError> {
        let mut index = self.index.write().await;
        let cell = index.jobs.get(&id).cloned().ok_or(StoreError::NotFound(id))?;
        let job = cell.lock().await.clone();
        if !job.status.is_terminal() {
            return Err(StoreError::Active(id));
        }
        index.jobs.remove(&id);
        index.tokens.remove(&job.token);
        tracing::debug!(job_id = %id, "Job record removed");
        Ok(job)
    }

    async fn persist(&self, job: &Job) -> Result<(), StoreError> {
        let Some(data_dir) = &self.data_dir else {
            return Ok(());
        };
        let dir = data_dir.join(job.id.to_string());
        tokio::fs::create_dir_all(&dir).await?;
        let bytes = serde_json::to_vec_pretty(job)?;
        let staging = dir.join(format!("{RECORD_FILE}.tmp"));
        tokio::fs::write(&staging, &bytes).await?;
        tokio::fs::rename(&staging, dir.join(RECORD_FILE)).await?;
        Ok(())
    }
}

async fn load_records(data_dir: &Path) -> Result<Vec<Job>, StoreError> {
    let mut entries = match tokio::fs::read_dir(data_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut jobs = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path().join(RECORD_FILE);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(_) => continue,
        };
        match serde_json::from_slice::<Job>(&bytes) {
            Ok(job) => jobs.push(job),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable job record");
            }
        }
    }
    Ok(jobs)
}
