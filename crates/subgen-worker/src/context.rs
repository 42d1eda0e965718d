//! Pipeline context: configuration plus the backend seams.
//!
//! Nothing here is ambient; the scheduler passes the context explicitly
//! into every stage. Tests swap the backends for in-memory fakes.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{watch, Semaphore};

use subgen_media::{probe_media, ScratchDir, Segmenter, SegmenterConfig};
use subgen_models::{MediaInfo, Segment};
use subgen_storage::{BlobStore, S3BlobStore};
use subgen_store::JobStore;

use crate::config::WorkerConfig;
use crate::error::WorkerResult;
use crate::model::{GenerativeModelClient, ModelConfig, SingleFlightModel, SubtitleModel};
use crate::prompts::PromptRegistry;
use crate::quality::{HeuristicScorer, QualityGate, QualityThresholds, TranslationScorer};

/// Media operations the pipeline needs from the external tools.
#[async_trait]
pub trait MediaBackend: Send + Sync {
    /// Probe stream metadata for a source file.
    async fn probe(&self, path: &Path) -> WorkerResult<MediaInfo>;

    /// Extract all segments into `segments_dir`, reusing intact clips
    /// recorded in `existing`.
    async fn extract_segments(
        &self,
        source: &Path,
        segments_dir: &Path,
        media: &MediaInfo,
        existing: &[Segment],
    ) -> WorkerResult<Vec<Segment>>;
}

/// FFmpeg-backed implementation.
pub struct FfmpegBackend {
    segmenter_config: SegmenterConfig,
    cancel_rx: watch::Receiver<bool>,
}

impl FfmpegBackend {
    pub fn new(segmenter_config: SegmenterConfig, cancel_rx: watch::Receiver<bool>) -> Self {
        Self {
            segmenter_config,
            cancel_rx,
        }
    }
}

#[async_trait]
impl MediaBackend for FfmpegBackend {
    async fn probe(&self, path: &Path) -> WorkerResult<MediaInfo> {
        Ok(probe_media(path).await?)
    }

    async fn extract_segments(
        &self,
        source: &Path,
        segments_dir: &Path,
        media: &MediaInfo,
        existing: &[Segment],
    ) -> WorkerResult<Vec<Segment>> {
        let segmenter =
            Segmenter::new(self.segmenter_config.clone()).with_cancel(self.cancel_rx.clone());
        Ok(segmenter
            .extract(source, segments_dir, media, existing)
            .await?)
    }
}

/// Everything a stage needs: configuration, durable store, scratch
/// space, backend seams, and the process-wide worker pools.
pub struct PipelineContext {
    pub config: WorkerConfig,
    pub store: JobStore,
    pub scratch: ScratchDir,
    pub media: Arc<dyn MediaBackend>,
    pub blobs: Arc<dyn BlobStore>,
    pub model: SingleFlightModel,
    pub prompts: PromptRegistry,
    pub gate: QualityGate,
    /// Process-wide model-call slots
    pub generation_slots: Arc<Semaphore>,
    /// Process-wide upload slots
    pub upload_slots: Arc<Semaphore>,
    /// Process shutdown signal; tasks observe it at await points
    pub shutdown_rx: watch::Receiver<bool>,
}

impl PipelineContext {
    /// Production context: S3 blob store, hosted model, FFmpeg tools.
    pub async fn new(
        config: WorkerConfig,
        shutdown_rx: watch::Receiver<bool>,
    ) -> WorkerResult<Self> {
        let store = JobStore::open(&config.job_store_dir).await?;
        let blobs: Arc<dyn BlobStore> = Arc::new(S3BlobStore::from_env()?);
        let model_client: Arc<dyn SubtitleModel> = Arc::new(GenerativeModelClient::new(
            ModelConfig::from_env(config.model_identifier.clone())?,
        ));
        let prompts =
            PromptRegistry::load(config.prompt_template_registry_dir.as_deref()).await?;

        let segmenter_config = SegmenterConfig {
            chunk_duration_s: config.chunk_duration_s,
            disk_reserve_bytes: config.disk_reserve_bytes,
            ..SegmenterConfig::default()
        };
        let media: Arc<dyn MediaBackend> =
            Arc::new(FfmpegBackend::new(segmenter_config, shutdown_rx.clone()));

        Ok(Self::with_backends(
            config,
            store,
            media,
            blobs,
            model_client,
            prompts,
            Arc::new(HeuristicScorer),
            shutdown_rx,
        ))
    }

    /// Context with injected backends; the constructor tests use.
    #[allow(clippy::too_many_arguments)]
    pub fn with_backends(
        config: WorkerConfig,
        store: JobStore,
        media: Arc<dyn MediaBackend>,
        blobs: Arc<dyn BlobStore>,
        model: Arc<dyn SubtitleModel>,
        prompts: PromptRegistry,
        scorer: Arc<dyn TranslationScorer>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        let gate = QualityGate::new(
            QualityThresholds {
                min_coverage: config.min_coverage,
                max_density_cps: config.max_density_cps,
                min_translation_quality: config.min_translation_quality,
                min_cultural_accuracy: config.min_cultural_accuracy,
            },
            scorer,
            config.source_language.clone(),
        );

        let generation_slots = Arc::new(Semaphore::new(config.max_concurrent_generations));
        let upload_slots = Arc::new(Semaphore::new(
            config.max_concurrent_uploads * config.max_concurrent_jobs,
        ));
        let scratch = ScratchDir::new(&config.temp_dir);

        Self {
            config,
            store,
            scratch,
            media,
            blobs,
            model: SingleFlightModel::new(model),
            prompts,
            gate,
            generation_slots,
            upload_slots,
            shutdown_rx,
        }
    }

    /// Whether process shutdown has been requested.
    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_rx.borrow()
    }
}
