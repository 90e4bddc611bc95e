use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::driver::DriverFactory;
use crate::engine::AutomationEngine;
use crate::error::Result;
use crate::scheduler::JobStore;
use crate::service::JobService;
use crate::sheet::SheetCodec;
use crate::sweeper::RetentionSweeper;
use crate::worker::{Dispatcher, JobExecutor};

/// Running instance that wires all components together.
pub struct App {
    pub config: AppConfig,
    pub store: Arc<JobStore>,
    service: JobService,
    dispatcher: Dispatcher,
    sweeper: JoinHandle<()>,
    shutdown: CancellationToken,
}

impl App {
    /// Start every subsystem.
    ///
    /// 1. Opens the job store, recovering records left by a previous run
    /// 2. Starts the worker pool behind the job queue
    /// 3. Spawns the retention sweeper
    /// 4. Re-enqueues jobs that were still QUEUED
    ///
    /// # Errors
    ///
    /// Returns an error if the data directory cannot be opened.
    pub async fn start(
        config: AppConfig,
        drivers: Arc<dyn DriverFactory>,
        sheets: Arc<dyn SheetCodec>,
    ) -> Result<Self> {
        let shutdown = CancellationToken::new();
        let (store, queued) = JobStore::open(&config.data_dir).await?;
        let store = Arc::new(store);

        let engine = Arc::new(AutomationEngine::new(
            config.engine.clone(),
            config.portal.clone(),
        ));
        let executor = Arc::new(JobExecutor::new(
            store.clone(),
            engine,
            drivers,
            sheets,
            config.data_dir.clone(),
            config.worker.run_timeout,
        ));
        let dispatcher = Dispatcher::start(&config.worker, executor, shutdown.child_token());

        let sweeper = RetentionSweeper::new(store.clone(), &config.data_dir, &config.retention);
        let sweeper_shutdown = shutdown.child_token();
        let sweeper = tokio::spawn(async move {
            sweeper.run(sweeper_shutdown).await;
        });

        let service = JobService::new(store.clone(), dispatcher.handle(), &config.data_dir);
        service.resume(&queued);

        tracing::info!(
            data_dir = %config.data_dir.display(),
            workers = config.worker.pool_size,
            "dutysync started"
        );

        Ok(Self {
            config,
            store,
            service,
            dispatcher,
            sweeper,
            shutdown,
        })
    }

    pub fn service(&self) -> &JobService {
        &self.service
    }

    /// Token that stops the app when cancelled. Pass it to signal handling.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run until the shutdown token fires, then drain.
    pub async fn run_until_shutdown(self) {
        self.shutdown.cancelled().await;
        self.shutdown().await;
    }

    /// Stop the sweeper, let workers finish their current job, then return.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        self.dispatcher.shutdown().await;
        if let Err(e) = self.sweeper.await {
            tracing::warn!(error = %e, "Sweeper task ended abnormally");
        }
        tracing::info!("dutysync stopped");
    }
}
