use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::error::DispatchError;
use crate::worker::JobExecutor;

type SharedReceiver = Arc<Mutex<mpsc::Receiver<Uuid>>>;

/// Cloneable sending side of the job queue.
#[derive(Clone)]
pub struct DispatchHandle {
    tx: mpsc::Sender<Uuid>,
}

impl DispatchHandle {
    /// Queue a job id without waiting.
    ///
    /// A full queue is reported rather than waited on, so submission never
    /// blocks behind running jobs.
    pub fn enqueue(&self, job_id: Uuid) -> Result<(), DispatchError> {
        self.tx.try_send(job_id).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DispatchError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => DispatchError::Closed,
        })
    }

    /// Remaining queue slots.
    pub fn capacity(&self) -> usize {
        self.tx.capacity()
    }
}

/// Fixed pool of workers draining one bounded queue.
///
/// Each worker owns at most one job at a time and starts a job only after
/// claiming it in the store, so an id delivered twice runs once.
pub struct Dispatcher {
    handle: DispatchHandle,
    shutdown: CancellationToken,
    workers: Vec<JoinHandle<()>>,
}

impl Dispatcher {
    pub fn start(
        config: &WorkerConfig,
        executor: Arc<JobExecutor>,
        shutdown: CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let rx: SharedReceiver = Arc::new(Mutex::new(rx));

        let workers = (0..config.pool_size.max(1))
            .map(|worker_id| {
                let rx = rx.clone();
                let executor = executor.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    worker_loop(worker_id, rx, executor, shutdown).await;
                })
            })
            .collect::<Vec<_>>();

        tracing::info!(
            pool_size = workers.len(),
            queue_capacity = config.queue_capacity,
            "Dispatcher started"
        );

        Self {
            handle: DispatchHandle { tx },
            shutdown,
            workers,
        }
    }

    pub fn handle(&self) -> DispatchHandle {
        self.handle.clone()
    }

    pub fn enqueue(&self, job_id: Uuid) -> Result<(), DispatchError> {
        self.handle.enqueue(job_id)
    }

    /// Stop taking new jobs and wait for workers to finish their current one.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for worker in self.workers {
            if let Err(e) = worker.await {
                tracing::warn!(error = %e, "Worker task ended abnormally");
            }
        }
        tracing::info!("Dispatcher stopped");
    }
}

async fn worker_loop(
    worker_id: usize,
    rx: SharedReceiver,
    executor: Arc<JobExecutor>,
    shutdown: CancellationToken,
) {
    tracing::debug!(worker_id, "Worker started");
    loop {
        let next = {
            let mut rx = rx.lock().await;
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => None,
                job_id = rx.recv() => job_id,
            }
        };

        let Some(job_id) = next else {
            break;
        };

        tracing::debug!(worker_id, job_id = %job_id, "Worker picked up job");
        if let Some(result) = executor.execute(job_id).await {
            tracing::debug!(
                worker_id,
                job_id = %result.job_id,
                status = %result.status,
                "Worker finished job"
            );
        }
    }
    tracing::debug!(worker_id, "Worker stopped");
}
