//! Job executor: the single-host orchestrator.
//!
//! Scans the durable store for active jobs and drives each through the
//! pipeline, bounded by the job pool. One driver per job at a time keeps
//! the record single-writer; chunk-level parallelism lives inside the
//! stage drivers.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex, Semaphore};
use tracing::{error, info, warn};

use subgen_models::{ErrorRecord, FaultKind, JobId, JobStage, JobState, TargetTrack};

use crate::config::WorkerConfig;
use crate::context::PipelineContext;
use crate::error::{WorkerError, WorkerResult};
use crate::{pipeline, reaper};

/// Idle delay between store scans when nothing is runnable.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Drives jobs from the durable store through the pipeline.
pub struct JobExecutor {
    ctx: Arc<PipelineContext>,
    job_slots: Arc<Semaphore>,
    shutdown_tx: watch::Sender<bool>,
    /// Jobs currently owned by a driver task in this process
    inflight: Arc<Mutex<HashSet<JobId>>>,
}

impl JobExecutor {
    /// Create an executor with production backends.
    pub async fn new(config: WorkerConfig) -> WorkerResult<Self> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let ctx = PipelineContext::new(config, shutdown_rx).await?;
        Ok(Self::from_context(ctx, shutdown_tx))
    }

    /// Create an executor around an existing context (tests inject fake
    /// backends this way).
    pub fn from_context(ctx: PipelineContext, shutdown_tx: watch::Sender<bool>) -> Self {
        let job_slots = Arc::new(Semaphore::new(ctx.config.max_concurrent_jobs));
        Self {
            ctx: Arc::new(ctx),
            job_slots,
            shutdown_tx,
            inflight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// The shared context.
    pub fn context(&self) -> &Arc<PipelineContext> {
        &self.ctx
    }

    /// Create and persist a new job for a source file.
    pub async fn submit(
        &self,
        source_path: impl Into<PathBuf>,
        targets: Vec<TargetTrack>,
    ) -> WorkerResult<JobId> {
        if targets.is_empty() {
            return Err(WorkerError::InvalidInput(
                "at least one target track is required".to_string(),
            ));
        }
        let job = JobState::new(source_path, targets);
        let id = job.id.clone();
        self.ctx.store.create(&job).await?;
        info!(job_id = %id, "Job submitted");
        Ok(id)
    }

    /// Operator abandonment: mark the job terminal and release its
    /// resources. Refused while a driver task owns the job.
    pub async fn abandon(&self, id: &JobId) -> WorkerResult<()> {
        if self.inflight.lock().await.contains(id) {
            return Err(WorkerError::job_failed(
                "job is currently running; stop the worker first",
            ));
        }

        let mut job = self.ctx.store.load(id).await?;
        if job.stage.is_terminal() {
            return Ok(());
        }

        job.record_error(ErrorRecord::new(
            FaultKind::Cancelled,
            "scheduler",
            "abandoned by operator",
        ));
        job.advance(JobStage::Abandoned);
        self.ctx.store.save(&job).await?;
        reaper::cleanup_job(&self.ctx, &mut job).await?;
        info!(job_id = %id, "Job abandoned");
        Ok(())
    }

    /// Signal shutdown. In-flight tasks observe it at their next await
    /// point; records stay at their current stage for resume. Closing
    /// the worker pools wakes tasks blocked on slot acquisition, which
    /// surface the closed pool as cancellation.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        self.ctx.upload_slots.close();
        self.ctx.generation_slots.close();
    }

    /// Main loop: scan for active jobs and dispatch drivers until
    /// shutdown, then drain.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            "Starting executor with {} job slots",
            self.ctx.config.max_concurrent_jobs
        );

        let sweeper = reaper::spawn_sweeper(Arc::clone(&self.ctx));
        let mut shutdown_rx = self.ctx.shutdown_rx.clone();

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping executor");
                        break;
                    }
                }
                result = self.dispatch_ready() => {
                    if let Err(e) = result {
                        error!("Error dispatching jobs: {}", e);
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        }

        sweeper.await.ok();

        info!("Waiting for in-flight jobs to pause...");
        let _ = tokio::time::timeout(self.ctx.config.shutdown_timeout, self.wait_for_jobs()).await;

        info!("Executor stopped");
        Ok(())
    }

    /// One scan: dispatch a driver for every active job without one, in
    /// creation order, bounded by the job pool.
    async fn dispatch_ready(&self) -> WorkerResult<()> {
        let active = self.ctx.store.list_active().await?;

        for job in active {
            if self.ctx.is_shutting_down() {
                break;
            }

            {
                let mut inflight = self.inflight.lock().await;
                if inflight.contains(&job.id) {
                    continue;
                }
                inflight.insert(job.id.clone());
            }

            let permit = match Arc::clone(&self.job_slots).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };

            let ctx = Arc::clone(&self.ctx);
            let inflight = Arc::clone(&self.inflight);
            let id = job.id.clone();

            tokio::spawn(async move {
                let _permit = permit;
                Self::execute_job(ctx, id.clone()).await;
                inflight.lock().await.remove(&id);
            });
        }

        tokio::time::sleep(POLL_INTERVAL).await;
        Ok(())
    }

    /// Drive one job; on terminal transition release its resources.
    async fn execute_job(ctx: Arc<PipelineContext>, id: JobId) {
        let mut job = match ctx.store.load(&id).await {
            Ok(job) => job,
            Err(e) => {
                error!(job_id = %id, "Failed to load job: {}", e);
                return;
            }
        };

        info!(job_id = %id, stage = %job.stage, "Driving job");

        match pipeline::drive_job(&ctx, &mut job).await {
            Ok(()) => {
                if job.stage.is_terminal() {
                    info!(job_id = %id, stage = %job.stage, "Job reached terminal stage");
                    if let Err(e) = reaper::cleanup_job(&ctx, &mut job).await {
                        warn!(job_id = %id, "Cleanup after terminal transition failed: {}", e);
                    }
                }
            }
            Err(WorkerError::Cancelled) => {
                info!(job_id = %id, "Job paused for shutdown, will resume on restart");
            }
            Err(e) => {
                error!(job_id = %id, "Job driver error: {}", e);
            }
        }
    }

    /// Wait for every job slot to come free.
    async fn wait_for_jobs(&self) {
        loop {
            if self.job_slots.available_permits() == self.ctx.config.max_concurrent_jobs {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}
