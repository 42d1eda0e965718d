//! Stage drivers for the job pipeline.
//!
//! `drive_job` moves one job forward until it reaches a terminal stage,
//! shutdown interrupts it, or a fault's policy says stop. Only this
//! module writes to `JobState`; every backend returns pure results that
//! are folded into the record and persisted after each stage transition
//! and each completed unit of work.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use futures::stream::{FuturesUnordered, StreamExt};
use tracing::{error, info, warn};

use subgen_media::AdmissionPolicy;
use subgen_models::{
    merge_segments, parse_cue_text, ErrorRecord, FaultKind, JobStage, JobState, MergeReport,
    SegmentWindow, TargetTrack, UnitKey,
};

use crate::context::PipelineContext;
use crate::error::{WorkerError, WorkerResult};
use crate::model::{fingerprint, GenerationRequest};
use crate::policy;
use crate::quality::Verdict;

/// Drive a job forward until terminal, shutdown, or a fatal fault.
///
/// Returns `Err(Cancelled)` only for process shutdown, leaving the
/// record at its current stage for resume. Every other fault is resolved
/// through the policy table and recorded on the job.
pub async fn drive_job(ctx: &PipelineContext, job: &mut JobState) -> WorkerResult<()> {
    loop {
        if ctx.is_shutting_down() {
            return Err(WorkerError::Cancelled);
        }
        if job.stage.is_terminal() {
            return Ok(());
        }

        let result = match job.stage {
            JobStage::New => run_probe(ctx, job).await,
            JobStage::Probed => run_segment(ctx, job).await,
            JobStage::Segmented => run_upload(ctx, job).await,
            JobStage::Uploaded => run_generate(ctx, job).await,
            JobStage::Generated => run_merge(ctx, job).await,
            JobStage::Merged => run_check(ctx, job).await,
            JobStage::Checked => run_emit(ctx, job).await,
            JobStage::Emitted => {
                job.advance(JobStage::Completed);
                ctx.store.save(job).await?;
                info!(job_id = %job.id, "Job completed, all tracks emitted");
                Ok(())
            }
            JobStage::Completed | JobStage::Failed | JobStage::Abandoned => return Ok(()),
        };

        if let Err(e) = result {
            let kind = e.fault_kind();
            if kind == FaultKind::Cancelled {
                return Err(WorkerError::Cancelled);
            }

            let decision = policy::decide(kind, ctx.config.quota_cooldown);
            match decision.terminal {
                Some(stage) => {
                    error!(job_id = %job.id, stage = %job.stage, "{} fault: {}", kind, e);
                    fail_job(ctx, job, stage, kind, component_for(job.stage), e.to_string())
                        .await?;
                    return Ok(());
                }
                None => {
                    if let Some(delay) = decision.delay {
                        warn!(job_id = %job.id, "{} fault, pausing {:?}: {}", kind, delay, e);
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }
}

/// Component name recorded on error records, keyed by the stage that
/// raised the fault.
fn component_for(stage: JobStage) -> &'static str {
    match stage {
        JobStage::New => "probe",
        JobStage::Probed => "segmenter",
        JobStage::Segmented => "blob_adapter",
        JobStage::Uploaded => "model_adapter",
        JobStage::Generated => "merger",
        JobStage::Merged => "quality_gate",
        JobStage::Checked => "emitter",
        _ => "scheduler",
    }
}

/// Record the fault and move the job to a terminal stage.
async fn fail_job(
    ctx: &PipelineContext,
    job: &mut JobState,
    terminal: JobStage,
    kind: FaultKind,
    component: &str,
    message: String,
) -> WorkerResult<()> {
    let record = ErrorRecord::new(kind, component, message)
        .with_context("stage", job.stage.as_str());
    job.record_error(record);
    job.advance(terminal);
    ctx.store.save(job).await.map_err(Into::into)
}

/// New → Probed: probe the source and apply the admission policy.
async fn run_probe(ctx: &PipelineContext, job: &mut JobState) -> WorkerResult<()> {
    let media = ctx.media.probe(&job.source_path).await?;

    let admission = AdmissionPolicy {
        max_duration_s: ctx.config.max_duration_s,
        max_size_bytes: ctx.config.max_video_size_bytes,
        admitted_codecs: ctx.config.admitted_codecs.clone(),
    };
    admission.admit(&media)?;

    info!(
        job_id = %job.id,
        duration_s = media.duration_s,
        codec = %media.video_codec,
        "Source admitted"
    );

    job.media = Some(media);
    job.advance(JobStage::Probed);
    ctx.store.save(job).await.map_err(Into::into)
}

/// Probed → Segmented: extract fixed-interval clips, resuming any that
/// survived a previous run.
async fn run_segment(ctx: &PipelineContext, job: &mut JobState) -> WorkerResult<()> {
    let media = job
        .media
        .clone()
        .ok_or_else(|| WorkerError::job_failed("segment stage reached without probe data"))?;

    ctx.scratch.ensure(&job.id).await?;
    let segments_dir = ctx.scratch.segments_dir(&job.id);

    let segments = ctx
        .media
        .extract_segments(&job.source_path, &segments_dir, &media, &job.segments)
        .await?;

    info!(job_id = %job.id, segments = segments.len(), "Segmentation complete");

    job.segments = segments;
    job.advance(JobStage::Segmented);
    ctx.store.save(job).await.map_err(Into::into)
}

/// Segmented → Uploaded: push every missing segment blob, bounded by the
/// upload pool, persisting after each completed upload.
async fn run_upload(ctx: &PipelineContext, job: &mut JobState) -> WorkerResult<()> {
    let namespace = job.reserved_blob_namespace.clone();

    let mut pending: VecDeque<(u32, PathBuf, String)> = job
        .segments
        .iter()
        .filter(|s| !job.uploaded.contains(&s.index))
        .map(|s| (s.index, s.local_path.clone(), s.checksum.clone()))
        .collect();

    type UploadFuture<'a> = BoxFuture<'a, (u32, WorkerResult<String>)>;
    let mut inflight: FuturesUnordered<UploadFuture<'_>> = FuturesUnordered::new();

    loop {
        // Shutdown stops new dispatches; uploads already in flight
        // finish their current call below.
        while !ctx.is_shutting_down() && inflight.len() < ctx.config.max_concurrent_uploads {
            let Some((index, path, checksum)) = pending.pop_front() else {
                break;
            };
            let namespace = namespace.clone();
            let slots = Arc::clone(&ctx.upload_slots);
            let blobs = Arc::clone(&ctx.blobs);

            inflight.push(
                async move {
                    let _permit = match slots.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => return (index, Err(WorkerError::Cancelled)),
                    };
                    let key = format!("segments/seg_{index:05}.mp4");
                    let result = blobs
                        .put(&namespace, &key, &path, &checksum)
                        .await
                        .map_err(WorkerError::from);
                    (index, result)
                }
                .boxed(),
            );
        }

        let Some((index, result)) = inflight.next().await else {
            break;
        };

        let remote = result?;
        if let Some(segment) = job.segments.iter_mut().find(|s| s.index == index) {
            segment.blob_key = Some(remote);
        }
        job.uploaded.insert(index);
        ctx.store.save(job).await?;
    }

    if ctx.is_shutting_down() {
        return Err(WorkerError::Cancelled);
    }
    if !job.all_uploaded() {
        return Err(WorkerError::job_failed("upload stage ended with gaps"));
    }

    job.advance(JobStage::Uploaded);
    ctx.store.save(job).await.map_err(Into::into)
}

/// Outcome of one generation dispatch.
enum UnitOutcome {
    Generated(WorkerResult<String>),
    /// Quota pause elapsed; the unit goes back on the queue
    CooledDown,
}

/// Uploaded → Generated: one model call per pending (segment, track)
/// unit, bounded by the process-wide generation pool. Quota faults pause
/// the unit without consuming an attempt; unparseable output consumes
/// one and retries up to the attempt budget.
async fn run_generate(ctx: &PipelineContext, job: &mut JobState) -> WorkerResult<()> {
    ctx.scratch.ensure(&job.id).await?;
    let mut queue: VecDeque<UnitKey> = job.pending_units().into();

    type GenFuture<'a> = BoxFuture<'a, (UnitKey, String, UnitOutcome)>;
    let mut inflight: FuturesUnordered<GenFuture<'_>> = FuturesUnordered::new();
    let mut doomed: Option<(FaultKind, String)> = None;

    loop {
        // Dispatch FIFO while slots and work remain; a doomed job or a
        // shutdown stops dispatching and drains what is already in
        // flight.
        while doomed.is_none()
            && !ctx.is_shutting_down()
            && inflight.len() < ctx.config.max_concurrent_generations
        {
            let Some(unit) = queue.pop_front() else {
                break;
            };

            let Some(segment) = job.segments.iter().find(|s| s.index == unit.segment) else {
                return Err(WorkerError::job_failed(format!(
                    "unit {} references a missing segment",
                    unit
                )));
            };
            let Some(blob_ref) = segment.blob_key.clone() else {
                return Err(WorkerError::job_failed(format!(
                    "segment {} has no blob reference",
                    segment.index
                )));
            };

            let prompt = ctx.prompts.get(&unit.track);
            let fp = fingerprint(
                &segment.checksum,
                &unit.track,
                &prompt.version,
                ctx.model.identifier(),
            );
            let request = GenerationRequest {
                blob_ref,
                track: unit.track.clone(),
                prompt,
            };
            let slots = Arc::clone(&ctx.generation_slots);

            inflight.push(
                async move {
                    let _permit = match slots.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => return (unit, fp, UnitOutcome::Generated(Err(WorkerError::Cancelled))),
                    };
                    let result = ctx.model.generate(&fp, &request).await;
                    (unit, fp, UnitOutcome::Generated(result))
                }
                .boxed(),
            );
        }

        let Some((unit, fp, outcome)) = inflight.next().await else {
            if let Some((kind, message)) = doomed.take() {
                fail_job(ctx, job, JobStage::Failed, kind, "model_adapter", message).await?;
                return Ok(());
            }
            if ctx.is_shutting_down() {
                return Err(WorkerError::Cancelled);
            }
            if queue.is_empty() {
                break;
            }
            continue;
        };

        match outcome {
            UnitOutcome::CooledDown => {
                queue.push_back(unit);
            }
            UnitOutcome::Generated(Ok(text)) => {
                match parse_cue_text(&text) {
                    Ok(cues) => {
                        if let Some(segment) =
                            job.segments.iter().find(|s| s.index == unit.segment)
                        {
                            let last_end =
                                cues.last().map(|c| c.end_ms).unwrap_or(0);
                            if last_end * 2 < segment.duration_ms() {
                                warn!(
                                    job_id = %job.id,
                                    unit = %unit,
                                    "Generated cues cover only {}ms of a {}ms segment",
                                    last_end,
                                    segment.duration_ms()
                                );
                            }
                        }

                        let rel = PathBuf::from("subs")
                            .join(format!("{}_{}.srt", unit.segment, unit.track.key()));
                        let path = ctx.scratch.job_dir(&job.id).join(&rel);
                        tokio::fs::write(&path, text.as_bytes()).await?;

                        job.per_chunk_results.insert(unit.to_string(), rel);
                        job.updated_at = chrono::Utc::now();
                        ctx.store.save(job).await?;
                    }
                    Err(parse_err) => {
                        // A bad response must not be served from the memo
                        // table on the retry.
                        ctx.model.invalidate(&fp).await;
                        let attempts = job.bump_attempts(&unit);
                        ctx.store.save(job).await?;

                        if attempts >= ctx.config.max_attempts {
                            doomed = Some((
                                FaultKind::ModelOutputInvalid,
                                format!(
                                    "unit {} unparseable after {} attempts: {}",
                                    unit, attempts, parse_err
                                ),
                            ));
                        } else {
                            warn!(
                                job_id = %job.id,
                                unit = %unit,
                                attempt = attempts,
                                "Model output unparseable, retrying: {}",
                                parse_err
                            );
                            queue.push_back(unit);
                        }
                    }
                }
            }
            UnitOutcome::Generated(Err(e)) => match e.fault_kind() {
                FaultKind::Cancelled => return Err(WorkerError::Cancelled),
                FaultKind::QuotaExceeded => {
                    warn!(
                        job_id = %job.id,
                        unit = %unit,
                        "Model quota exhausted, cooling down {:?}",
                        ctx.config.quota_cooldown
                    );
                    ctx.model.invalidate(&fp).await;
                    let cooldown = ctx.config.quota_cooldown;
                    inflight.push(
                        async move {
                            tokio::time::sleep(cooldown).await;
                            (unit, fp, UnitOutcome::CooledDown)
                        }
                        .boxed(),
                    );
                }
                kind => {
                    // Fatal or exhausted-transient fault dooms the job;
                    // in-flight siblings finish their current call first.
                    if doomed.is_none() {
                        doomed = Some((kind, e.to_string()));
                    }
                }
            },
        }
    }

    job.advance(JobStage::Generated);
    ctx.store.save(job).await.map_err(Into::into)
}

/// Re-assemble one track's merged sequence from the durable per-chunk
/// results. Deterministic, so stages re-derive it instead of persisting
/// merged cues.
pub(crate) async fn merge_track(
    ctx: &PipelineContext,
    job: &JobState,
    track: &TargetTrack,
) -> WorkerResult<MergeReport> {
    let mut parts = Vec::with_capacity(job.segments.len());

    for segment in &job.segments {
        let key = UnitKey::new(segment.index, track.clone()).to_string();
        let Some(rel) = job.per_chunk_results.get(&key) else {
            return Err(WorkerError::job_failed(format!(
                "missing generation result for unit {key}"
            )));
        };
        let path = ctx.scratch.job_dir(&job.id).join(rel);
        let text = tokio::fs::read_to_string(&path).await?;
        let cues = parse_cue_text(&text).map_err(|e| {
            WorkerError::StructuralInvariant(format!("stored cues for {key} unreadable: {e}"))
        })?;

        parts.push((
            SegmentWindow {
                start_ms: segment.start_ms(),
                duration_ms: segment.duration_ms(),
            },
            cues,
        ));
    }

    Ok(merge_segments(&parts, ctx.config.max_cue_duration_ms()))
}

/// Generated → Merged: run the merge algebra per track and verify the
/// result upholds the sequence invariants.
async fn run_merge(ctx: &PipelineContext, job: &mut JobState) -> WorkerResult<()> {
    for track in job.targets.clone() {
        let report = merge_track(ctx, job, &track).await?;

        if report.truncated > 0 {
            warn!(
                job_id = %job.id,
                track = %track,
                truncated = report.truncated,
                "Merge truncated overlapping cues"
            );
        }

        for pair in report.cues.windows(2) {
            if pair[1].start_ms < pair[0].end_ms || pair[0].end_ms <= pair[0].start_ms {
                return Err(WorkerError::StructuralInvariant(format!(
                    "track {track}: merged sequence is not ordered and non-overlapping"
                )));
            }
        }
    }

    job.advance(JobStage::Merged);
    ctx.store.save(job).await.map_err(Into::into)
}

/// Merged → Checked: quality verdicts per track. A retry verdict rewinds
/// the affected track to the upload stage with its chunks cleared and
/// one attempt consumed per regenerated unit.
async fn run_check(ctx: &PipelineContext, job: &mut JobState) -> WorkerResult<()> {
    let media_duration_ms = job
        .media
        .as_ref()
        .map(|m| m.duration_ms())
        .unwrap_or_default();

    let mut retry_tracks: Vec<(TargetTrack, String)> = Vec::new();

    for track in job.targets.clone() {
        let report = merge_track(ctx, job, &track).await?;
        let (verdict, _metrics) = ctx
            .gate
            .evaluate(&report.cues, media_duration_ms, &track)
            .await?;

        match verdict {
            Verdict::Accept => {}
            Verdict::Fail { reason } => {
                error!(job_id = %job.id, track = %track, "Structural failure: {}", reason);
                fail_job(
                    ctx,
                    job,
                    JobStage::Failed,
                    FaultKind::StructuralInvariant,
                    "quality_gate",
                    format!("track {track}: {reason}"),
                )
                .await?;
                return Ok(());
            }
            Verdict::Retry { reason } => retry_tracks.push((track, reason)),
        }
    }

    if retry_tracks.is_empty() {
        job.advance(JobStage::Checked);
        return ctx.store.save(job).await.map_err(Into::into);
    }

    // Consume one attempt per regenerated unit; budget exhaustion fails
    // the job with the quality kind.
    for (track, reason) in &retry_tracks {
        let units: Vec<UnitKey> = job
            .segments
            .iter()
            .map(|s| UnitKey::new(s.index, track.clone()))
            .collect();

        for unit in &units {
            let attempts = job.bump_attempts(unit);
            if attempts >= ctx.config.max_attempts {
                fail_job(
                    ctx,
                    job,
                    JobStage::Failed,
                    FaultKind::QualityBelowThreshold,
                    "quality_gate",
                    format!("track {track} below threshold after {attempts} attempts: {reason}"),
                )
                .await?;
                return Ok(());
            }
        }

        // Fresh generations need fresh model calls.
        for segment in &job.segments {
            let prompt = ctx.prompts.get(track);
            let fp = fingerprint(
                &segment.checksum,
                track,
                &prompt.version,
                ctx.model.identifier(),
            );
            ctx.model.invalidate(&fp).await;
        }

        warn!(
            job_id = %job.id,
            track = %track,
            "Quality verdict is retry ({}), regenerating {} chunks",
            reason,
            units.len()
        );
        job.clear_track_results(track, None);
    }

    // Scheduler-initiated rewind to the upload stage; accepted tracks
    // keep their results.
    job.advance(JobStage::Uploaded);
    ctx.store.save(job).await.map_err(Into::into)
}

/// Checked → Emitted: render both output forms per track atomically and
/// write the human-readable summary.
async fn run_emit(ctx: &PipelineContext, job: &mut JobState) -> WorkerResult<()> {
    let media_duration_ms = job
        .media
        .as_ref()
        .map(|m| m.duration_ms())
        .unwrap_or_default();

    let out_dir = ctx.config.output_dir.join(job.basename());
    tokio::fs::create_dir_all(&out_dir).await?;

    let mut track_reports = Vec::new();

    for track in job.targets.clone() {
        let merged = merge_track(ctx, job, &track).await?;
        let pair = crate::emit::emit_track(&out_dir, &job.basename(), &track, &merged.cues).await?;

        let metrics = subgen_models::analyze_cues(&merged.cues, media_duration_ms);
        track_reports.push((track.clone(), metrics));

        job.outputs.insert(track.key(), pair);
        job.updated_at = chrono::Utc::now();
        ctx.store.save(job).await?;
    }

    crate::emit::write_summary(&out_dir, job, &track_reports).await?;

    job.advance(JobStage::Emitted);
    ctx.store.save(job).await.map_err(Into::into)
}
