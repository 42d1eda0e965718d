//! Fixed-interval segment extraction with resume and size adaptation.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use subgen_models::{MediaInfo, Segment};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};

/// Planned extraction interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentPlan {
    pub start_s: f64,
    pub duration_s: f64,
}

/// Compute the fixed-interval plan: `ceil(duration / chunk_duration)`
/// segments, the last one covering the remainder. A source shorter than
/// one chunk yields a single segment of the full duration.
pub fn plan_segments(duration_s: f64, chunk_duration_s: f64) -> Vec<SegmentPlan> {
    let count = ((duration_s / chunk_duration_s) - 1e-9).ceil().max(1.0) as u32;

    (0..count)
        .map(|i| {
            let start_s = round_ms(i as f64 * chunk_duration_s);
            let duration = round_ms((duration_s - start_s).min(chunk_duration_s));
            SegmentPlan {
                start_s,
                duration_s: duration,
            }
        })
        .collect()
}

fn round_ms(seconds: f64) -> f64 {
    (seconds * 1000.0).round() / 1000.0
}

/// Segmenter configuration.
#[derive(Debug, Clone)]
pub struct SegmenterConfig {
    /// Nominal segment length in seconds
    pub chunk_duration_s: f64,
    /// Segments larger than this are re-extracted with halved duration
    pub max_segment_bytes: u64,
    /// Free-space floor; `None` sizes it as twice the estimated
    /// remaining segment bytes
    pub disk_reserve_bytes: Option<u64>,
    /// Per-extraction FFmpeg timeout
    pub timeout_secs: u64,
    /// Floor for halved durations
    pub min_chunk_duration_s: f64,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            chunk_duration_s: 60.0,
            max_segment_bytes: 150 * 1024 * 1024,
            disk_reserve_bytes: None,
            timeout_secs: 600,
            min_chunk_duration_s: 1.0,
        }
    }
}

/// Splits a source into independently decodable clips under a job's
/// scratch partition.
///
/// Extraction is resumable: an interval whose clip file already exists
/// with the checksum recorded on a prior run is reused; partial or
/// mismatched files are deleted and recreated.
pub struct Segmenter {
    config: SegmenterConfig,
    cancel_rx: Option<watch::Receiver<bool>>,
}

impl Segmenter {
    pub fn new(config: SegmenterConfig) -> Self {
        Self {
            config,
            cancel_rx: None,
        }
    }

    /// Set cancellation signal, observed between extractions.
    pub fn with_cancel(mut self, cancel_rx: watch::Receiver<bool>) -> Self {
        self.cancel_rx = Some(cancel_rx);
        self
    }

    /// Extract all segments for `media` into `segments_dir`.
    ///
    /// `existing` carries segment records from a prior attempt; matching
    /// intervals with intact files are skipped.
    pub async fn extract(
        &self,
        source: &Path,
        segments_dir: &Path,
        media: &MediaInfo,
        existing: &[Segment],
    ) -> MediaResult<Vec<Segment>> {
        let plan = plan_segments(media.duration_s, self.config.chunk_duration_s);
        let per_segment_estimate = media.size_bytes / plan.len().max(1) as u64;

        let mut queue: VecDeque<SegmentPlan> = plan.into();
        let mut segments: Vec<Segment> = Vec::new();

        while let Some(interval) = queue.pop_front() {
            if let Some(ref cancel_rx) = self.cancel_rx {
                if *cancel_rx.borrow() {
                    return Err(MediaError::Cancelled);
                }
            }

            self.check_disk_reserve(segments_dir, per_segment_estimate, queue.len() as u64 + 1)?;

            let path = clip_path(segments_dir, &interval);

            if let Some(prior) = find_prior(existing, &interval) {
                if file_matches(&path, &prior.checksum).await {
                    debug!(
                        "Reusing segment at {:.3}s ({} bytes)",
                        interval.start_s, prior.size_bytes
                    );
                    segments.push(Segment {
                        index: 0,
                        local_path: path,
                        ..prior.clone()
                    });
                    continue;
                }
                if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                    warn!(
                        "Segment at {:.3}s does not match its recorded checksum, re-extracting",
                        interval.start_s
                    );
                    let _ = tokio::fs::remove_file(&path).await;
                }
            }

            self.run_extraction(source, &path, &interval).await?;

            let size_bytes = tokio::fs::metadata(&path).await?.len();
            if size_bytes == 0 {
                return Err(MediaError::ffmpeg_failed(
                    format!("segment at {:.3}s came out empty", interval.start_s),
                    None,
                    None,
                ));
            }

            // Oversized clip: halve the interval and redo both halves,
            // keeping time order.
            if size_bytes > self.config.max_segment_bytes
                && interval.duration_s / 2.0 >= self.config.min_chunk_duration_s
            {
                info!(
                    "Segment at {:.3}s is {} bytes (> {}), halving",
                    interval.start_s, size_bytes, self.config.max_segment_bytes
                );
                tokio::fs::remove_file(&path).await?;
                let (first, second) = halve(&interval);
                queue.push_front(second);
                queue.push_front(first);
                continue;
            }

            let checksum = file_checksum(&path).await?;
            segments.push(Segment {
                index: 0,
                start_s: interval.start_s,
                duration_s: interval.duration_s,
                local_path: path,
                blob_key: None,
                checksum,
                size_bytes,
            });
        }

        segments.sort_by(|a, b| a.start_s.total_cmp(&b.start_s));
        for (i, segment) in segments.iter_mut().enumerate() {
            segment.index = i as u32;
        }

        Ok(segments)
    }

    async fn run_extraction(
        &self,
        source: &Path,
        output: &Path,
        interval: &SegmentPlan,
    ) -> MediaResult<()> {
        let cmd = FfmpegCommand::new(source, output)
            .seek(interval.start_s)
            .duration(interval.duration_s)
            .video_codec("libx264")
            .preset("fast")
            .audio_codec("aac")
            .audio_bitrate("128k")
            .zero_timestamps();

        let mut runner = FfmpegRunner::new().with_timeout(self.config.timeout_secs);
        if let Some(ref cancel_rx) = self.cancel_rx {
            runner = runner.with_cancel(cancel_rx.clone());
        }
        runner.run(&cmd).await
    }

    fn check_disk_reserve(
        &self,
        dir: &Path,
        per_segment_estimate: u64,
        remaining: u64,
    ) -> MediaResult<()> {
        let reserve = self
            .config
            .disk_reserve_bytes
            .unwrap_or(2 * per_segment_estimate * remaining);
        if reserve == 0 {
            return Ok(());
        }
        let available = fs2::available_space(dir)?;
        if available < reserve {
            return Err(MediaError::DiskExhausted(format!(
                "{} bytes free, {} required for remaining segments",
                available, reserve
            )));
        }
        Ok(())
    }
}

/// Halve an interval into two contiguous pieces.
fn halve(interval: &SegmentPlan) -> (SegmentPlan, SegmentPlan) {
    let first_duration = round_ms(interval.duration_s / 2.0);
    let first = SegmentPlan {
        start_s: interval.start_s,
        duration_s: first_duration,
    };
    let second = SegmentPlan {
        start_s: round_ms(interval.start_s + first_duration),
        duration_s: round_ms(interval.duration_s - first_duration),
    };
    (first, second)
}

/// Clip filename, keyed by interval so resume survives plan changes from
/// halving.
fn clip_path(dir: &Path, interval: &SegmentPlan) -> PathBuf {
    let start_ms = (interval.start_s * 1000.0).round() as u64;
    let duration_ms = (interval.duration_s * 1000.0).round() as u64;
    dir.join(format!("seg_{start_ms:09}_{duration_ms:09}.mp4"))
}

fn find_prior<'a>(existing: &'a [Segment], interval: &SegmentPlan) -> Option<&'a Segment> {
    existing.iter().find(|s| {
        (s.start_s - interval.start_s).abs() < 0.0005
            && (s.duration_s - interval.duration_s).abs() < 0.0005
    })
}

async fn file_matches(path: &Path, checksum: &str) -> bool {
    match file_checksum(path).await {
        Ok(sum) => sum == checksum,
        Err(_) => false,
    }
}

/// SHA-256 of a file's bytes, hex encoded.
pub async fn file_checksum(path: &Path) -> MediaResult<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];

    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_exact_multiple() {
        let plan = plan_segments(120.0, 60.0);
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[1].start_s, 60.0);
        assert_eq!(plan[1].duration_s, 60.0);
    }

    #[test]
    fn test_plan_with_remainder() {
        let plan = plan_segments(125.0, 60.0);
        assert_eq!(plan.len(), 3);
        assert_eq!(plan[2].start_s, 120.0);
        assert!((plan[2].duration_s - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_plan_short_source() {
        let plan = plan_segments(42.5, 60.0);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].start_s, 0.0);
        assert!((plan[0].duration_s - 42.5).abs() < 1e-9);
    }

    #[test]
    fn test_plan_is_contiguous() {
        let plan = plan_segments(1234.567, 60.0);
        for pair in plan.windows(2) {
            assert!((pair[0].start_s + pair[0].duration_s - pair[1].start_s).abs() < 0.001);
        }
        let total: f64 = plan.iter().map(|p| p.duration_s).sum();
        assert!((total - 1234.567).abs() < 0.001);
    }

    #[test]
    fn test_halve_preserves_interval() {
        let (first, second) = halve(&SegmentPlan {
            start_s: 60.0,
            duration_s: 60.0,
        });
        assert_eq!(first.start_s, 60.0);
        assert_eq!(first.duration_s, 30.0);
        assert_eq!(second.start_s, 90.0);
        assert_eq!(second.duration_s, 30.0);
    }

    #[test]
    fn test_halve_odd_duration() {
        let (first, second) = halve(&SegmentPlan {
            start_s: 0.0,
            duration_s: 5.001,
        });
        assert!((first.duration_s + second.duration_s - 5.001).abs() < 1e-9);
        assert!((second.start_s - first.duration_s).abs() < 1e-9);
    }

    #[test]
    fn test_clip_path_is_interval_keyed() {
        let a = clip_path(Path::new("/tmp"), &SegmentPlan { start_s: 60.0, duration_s: 60.0 });
        let b = clip_path(Path::new("/tmp"), &SegmentPlan { start_s: 60.0, duration_s: 30.0 });
        assert_ne!(a, b);
        assert!(a.to_string_lossy().contains("seg_000060000_000060000"));
    }

    #[tokio::test]
    async fn test_file_checksum_stable() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("clip.bin");
        tokio::fs::write(&path, b"segment bytes").await.unwrap();

        let a = file_checksum(&path).await.unwrap();
        let b = file_checksum(&path).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);

        tokio::fs::write(&path, b"different").await.unwrap();
        assert_ne!(file_checksum(&path).await.unwrap(), a);
    }
}
