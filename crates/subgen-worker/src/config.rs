//! Worker configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Worker configuration. Every field can be overridden through a
/// `SUBGEN_`-prefixed environment variable.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Nominal segment length in seconds
    pub chunk_duration_s: f64,
    /// Full attempts allowed per (segment, track) unit
    pub max_attempts: u32,
    /// Maximum jobs driven concurrently
    pub max_concurrent_jobs: usize,
    /// Maximum concurrent segment uploads per job
    pub max_concurrent_uploads: usize,
    /// Maximum concurrent model calls, process-wide
    pub max_concurrent_generations: usize,
    /// Input size ceiling in bytes
    pub max_video_size_bytes: u64,
    /// Input duration ceiling in seconds
    pub max_duration_s: f64,
    /// Admitted video codecs; empty admits everything
    pub admitted_codecs: Vec<String>,
    /// Minimum fraction of media duration covered by cues
    pub min_coverage: f64,
    /// Maximum mean reading speed in characters per second
    pub max_density_cps: f64,
    /// Maximum cue duration in seconds
    pub max_cue_duration_s: f64,
    /// Minimum translation quality score
    pub min_translation_quality: f64,
    /// Minimum cultural accuracy score
    pub min_cultural_accuracy: f64,
    /// Terminal job retention before the reaper sweeps scratch/blobs
    pub retention: Duration,
    /// Free-space floor for segmentation; `None` is sized dynamically
    pub disk_reserve_bytes: Option<u64>,
    /// Cooldown after a quota fault
    pub quota_cooldown: Duration,
    /// Scratch root for segment clips and cue text
    pub temp_dir: PathBuf,
    /// Output root for emitted subtitle files
    pub output_dir: PathBuf,
    /// Durable job record directory
    pub job_store_dir: PathBuf,
    /// Prompt template directory; built-in templates fill any gaps
    pub prompt_template_registry_dir: Option<PathBuf>,
    /// Generative model identifier
    pub model_identifier: String,
    /// Spoken language of the sources, when known. Linguistic scoring
    /// applies only to targets that differ from it.
    pub source_language: Option<String>,
    /// Keep scratch partitions after terminal transitions (debug)
    pub keep_temp: bool,
    /// Graceful shutdown drain window
    pub shutdown_timeout: Duration,
    /// Reaper sweep interval
    pub sweep_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            chunk_duration_s: 60.0,
            max_attempts: 3,
            max_concurrent_jobs: 3,
            max_concurrent_uploads: 3,
            max_concurrent_generations: 4,
            max_video_size_bytes: 10 * 1024 * 1024 * 1024,
            max_duration_s: 12.0 * 3600.0,
            admitted_codecs: Vec::new(),
            min_coverage: 0.6,
            max_density_cps: 25.0,
            max_cue_duration_s: 10.0,
            min_translation_quality: 0.70,
            min_cultural_accuracy: 0.80,
            retention: Duration::from_secs(86_400),
            disk_reserve_bytes: None,
            quota_cooldown: Duration::from_secs(60),
            temp_dir: PathBuf::from("/tmp/subgen"),
            output_dir: PathBuf::from("output"),
            job_store_dir: PathBuf::from("jobs"),
            prompt_template_registry_dir: None,
            model_identifier: "gemini-2.5-pro".to_string(),
            source_language: None,
            keep_temp: false,
            shutdown_timeout: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(300),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables, falling back to the
    /// defaults above.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            chunk_duration_s: env_parse("SUBGEN_CHUNK_DURATION_S", defaults.chunk_duration_s),
            max_attempts: env_parse("SUBGEN_MAX_ATTEMPTS", defaults.max_attempts),
            max_concurrent_jobs: env_parse("SUBGEN_MAX_CONCURRENT_JOBS", defaults.max_concurrent_jobs),
            max_concurrent_uploads: env_parse(
                "SUBGEN_MAX_CONCURRENT_UPLOADS",
                defaults.max_concurrent_uploads,
            ),
            max_concurrent_generations: env_parse(
                "SUBGEN_MAX_CONCURRENT_GENERATIONS",
                defaults.max_concurrent_generations,
            ),
            max_video_size_bytes: env_parse(
                "SUBGEN_MAX_VIDEO_SIZE_BYTES",
                defaults.max_video_size_bytes,
            ),
            max_duration_s: env_parse("SUBGEN_MAX_DURATION_S", defaults.max_duration_s),
            admitted_codecs: std::env::var("SUBGEN_ADMITTED_CODECS")
                .map(|v| {
                    v.split(',')
                        .map(|c| c.trim().to_string())
                        .filter(|c| !c.is_empty())
                        .collect()
                })
                .unwrap_or(defaults.admitted_codecs),
            min_coverage: env_parse("SUBGEN_MIN_COVERAGE", defaults.min_coverage),
            max_density_cps: env_parse("SUBGEN_MAX_DENSITY_CPS", defaults.max_density_cps),
            max_cue_duration_s: env_parse("SUBGEN_MAX_CUE_DURATION_S", defaults.max_cue_duration_s),
            min_translation_quality: env_parse(
                "SUBGEN_MIN_TRANSLATION_QUALITY",
                defaults.min_translation_quality,
            ),
            min_cultural_accuracy: env_parse(
                "SUBGEN_MIN_CULTURAL_ACCURACY",
                defaults.min_cultural_accuracy,
            ),
            retention: Duration::from_secs(env_parse(
                "SUBGEN_RETENTION_S",
                defaults.retention.as_secs(),
            )),
            disk_reserve_bytes: std::env::var("SUBGEN_DISK_RESERVE_BYTES")
                .ok()
                .and_then(|s| s.parse().ok())
                .or(defaults.disk_reserve_bytes),
            quota_cooldown: Duration::from_secs(env_parse(
                "SUBGEN_QUOTA_COOLDOWN_S",
                defaults.quota_cooldown.as_secs(),
            )),
            temp_dir: env_path("SUBGEN_TEMP_DIR", defaults.temp_dir),
            output_dir: env_path("SUBGEN_OUTPUT_DIR", defaults.output_dir),
            job_store_dir: env_path("SUBGEN_JOB_STORE_DIR", defaults.job_store_dir),
            prompt_template_registry_dir: std::env::var("SUBGEN_PROMPT_TEMPLATE_REGISTRY_DIR")
                .ok()
                .map(PathBuf::from)
                .or(defaults.prompt_template_registry_dir),
            model_identifier: std::env::var("SUBGEN_MODEL_IDENTIFIER")
                .unwrap_or(defaults.model_identifier),
            source_language: std::env::var("SUBGEN_SOURCE_LANGUAGE")
                .ok()
                .filter(|s| !s.is_empty())
                .or(defaults.source_language),
            keep_temp: std::env::var("SUBGEN_KEEP_TEMP")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(defaults.keep_temp),
            shutdown_timeout: Duration::from_secs(env_parse(
                "SUBGEN_SHUTDOWN_TIMEOUT_S",
                defaults.shutdown_timeout.as_secs(),
            )),
            sweep_interval: Duration::from_secs(env_parse(
                "SUBGEN_SWEEP_INTERVAL_S",
                defaults.sweep_interval.as_secs(),
            )),
        }
    }

    /// Maximum cue duration in milliseconds.
    pub fn max_cue_duration_ms(&self) -> u64 {
        (self.max_cue_duration_s * 1000.0).round() as u64
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_path(name: &str, default: PathBuf) -> PathBuf {
    std::env::var(name).map(PathBuf::from).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = WorkerConfig::default();
        assert_eq!(config.chunk_duration_s, 60.0);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.max_concurrent_jobs, 3);
        assert_eq!(config.max_concurrent_uploads, 3);
        assert_eq!(config.max_concurrent_generations, 4);
        assert_eq!(config.min_coverage, 0.6);
        assert_eq!(config.max_density_cps, 25.0);
        assert_eq!(config.max_cue_duration_ms(), 10_000);
        assert_eq!(config.min_translation_quality, 0.70);
        assert_eq!(config.min_cultural_accuracy, 0.80);
        assert_eq!(config.quota_cooldown, Duration::from_secs(60));
        assert_eq!(config.retention, Duration::from_secs(86_400));
    }
}
