//! Cleanup reaper.
//!
//! Releases remote blobs and local scratch on terminal transitions, and
//! sweeps aged terminal jobs so nothing leaks after crashes or failed
//! deletions. The job record itself is never removed here.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use subgen_models::JobState;

use crate::context::PipelineContext;
use crate::error::WorkerResult;

/// Release a terminal job's remote namespace and scratch partition.
///
/// A failed blob deletion marks `cleanup_pending` so the next sweep
/// retries it; scratch removal is skipped when `keep_temp` is set.
pub async fn cleanup_job(ctx: &PipelineContext, job: &mut JobState) -> WorkerResult<()> {
    match ctx.blobs.delete_prefix(&job.reserved_blob_namespace).await {
        Ok(count) => {
            if count > 0 {
                info!(job_id = %job.id, blobs = count, "Released blob namespace");
            }
            job.cleanup_pending = false;
        }
        Err(e) => {
            warn!(
                job_id = %job.id,
                error = %e,
                "Blob cleanup failed, will retry on next sweep"
            );
            job.cleanup_pending = true;
        }
    }

    if ctx.config.keep_temp {
        info!(job_id = %job.id, "keep_temp set, leaving scratch partition");
    } else if let Err(e) = ctx.scratch.remove(&job.id).await {
        warn!(job_id = %job.id, error = %e, "Scratch removal failed");
    }

    ctx.store.save(job).await?;
    Ok(())
}

/// Sweep terminal jobs older than the retention window, plus any with a
/// pending blob cleanup. Returns how many jobs were processed.
pub async fn sweep(ctx: &PipelineContext) -> WorkerResult<usize> {
    let cutoff = Utc::now()
        - chrono::Duration::from_std(ctx.config.retention)
            .unwrap_or_else(|_| chrono::Duration::seconds(86_400));

    let mut processed = 0;
    for mut job in ctx.store.list_terminal(cutoff).await? {
        let scratch_present = ctx.scratch.job_dir(&job.id).exists();
        if !job.cleanup_pending && !scratch_present {
            continue;
        }
        cleanup_job(ctx, &mut job).await?;
        processed += 1;
    }

    if processed > 0 {
        info!("Reaper sweep cleaned {} jobs", processed);
    }
    Ok(processed)
}

/// Periodic sweep loop, stopped by the shutdown signal.
pub fn spawn_sweeper(ctx: Arc<PipelineContext>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut shutdown_rx = ctx.shutdown_rx.clone();
        let mut interval = tokio::time::interval(ctx.config.sweep_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    if let Err(e) = sweep(&ctx).await {
                        warn!("Reaper sweep failed: {}", e);
                    }
                }
            }
        }
    })
}
