//! Output file emission.
//!
//! Both subtitle forms are written atomically (temp sibling + rename) so
//! a failed job never leaves partial output files, plus a human-readable
//! summary of what was produced.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio::fs;
use tracing::info;

use subgen_models::{
    quality_report, render_srt, render_vtt, Cue, CueMetrics, JobState, OutputPair, TargetTrack,
};

use crate::error::WorkerResult;

/// Write bytes atomically: temp sibling first, then rename into place.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> WorkerResult<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

/// Render and write both output forms for one track, returning the
/// emitted pair.
pub async fn emit_track(
    out_dir: &Path,
    basename: &str,
    track: &TargetTrack,
    cues: &[Cue],
) -> WorkerResult<OutputPair> {
    let base = format!("{basename}_{}", track.key());

    let srt_path = out_dir.join(format!("{base}.srt"));
    write_atomic(&srt_path, render_srt(cues).as_bytes()).await?;

    let vtt_path = out_dir.join(format!("{base}.vtt"));
    write_atomic(&vtt_path, render_vtt(cues).as_bytes()).await?;

    info!(
        "Emitted {} cues for track {} to {}",
        cues.len(),
        track,
        out_dir.display()
    );

    Ok(OutputPair {
        srt: srt_path,
        vtt: vtt_path,
    })
}

/// Write the `<basename>_info.txt` summary: the emitted files with
/// sizes, per-track quality reports, and a review disclaimer.
pub async fn write_summary(
    out_dir: &Path,
    job: &JobState,
    track_reports: &[(TargetTrack, CueMetrics)],
) -> WorkerResult<PathBuf> {
    let basename = job.basename();
    let mut body = format!(
        "Video Subtitle Generation Summary\n\
         =================================\n\n\
         Video: {}\n\
         Job: {}\n\
         Generated: {}\n\n\
         Generated Files:\n",
        basename,
        job.id,
        Utc::now().format("%Y-%m-%d %H:%M:%S"),
    );

    let mut files: Vec<&Path> = Vec::new();
    for pair in job.outputs.values() {
        files.push(&pair.srt);
        files.push(&pair.vtt);
    }
    files.sort();

    for file in &files {
        let size = fs::metadata(file).await.map(|m| m.len()).unwrap_or(0);
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        body.push_str(&format!("  - {name} ({size} bytes)\n"));
    }
    body.push_str(&format!("\nTotal Files: {}\n", files.len()));

    for (track, metrics) in track_reports {
        body.push('\n');
        body.push_str(&quality_report(metrics, &track.key()));
    }

    body.push_str(
        "\nNote: These subtitles were generated using AI and may require manual review.\n",
    );

    let path = out_dir.join(format!("{basename}_info.txt"));
    write_atomic(&path, body.as_bytes()).await?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use subgen_models::TrackMode;
    use tempfile::TempDir;

    fn cues() -> Vec<Cue> {
        vec![
            Cue::new(0, 2_000, "Hello"),
            Cue::new(2_000, 4_000, "World"),
        ]
    }

    #[tokio::test]
    async fn test_emit_track_writes_both_forms() {
        let dir = TempDir::new().unwrap();
        let track = TargetTrack::new("eng", TrackMode::Standard);

        let pair = emit_track(dir.path(), "talk", &track, &cues())
            .await
            .unwrap();

        assert_eq!(pair.srt.file_name().unwrap(), "talk_eng.srt");
        assert_eq!(pair.vtt.file_name().unwrap(), "talk_eng.vtt");

        let srt = std::fs::read_to_string(&pair.srt).unwrap();
        assert!(srt.starts_with('\u{feff}'));
        assert!(srt.contains("00:00:00,000 --> 00:00:02,000"));

        let vtt = std::fs::read_to_string(&pair.vtt).unwrap();
        assert!(vtt.starts_with("WEBVTT\n"));
        assert!(vtt.contains("00:00:00.000 --> 00:00:02.000"));

        // No temp siblings left behind.
        assert!(!dir.path().join("talk_eng.tmp").exists());
    }

    #[tokio::test]
    async fn test_sdh_suffix_in_filenames() {
        let dir = TempDir::new().unwrap();
        let track = TargetTrack::new("eng", TrackMode::Sdh);

        let pair = emit_track(dir.path(), "talk", &track, &cues())
            .await
            .unwrap();
        assert_eq!(pair.srt.file_name().unwrap(), "talk_eng_sdh.srt");
    }

    #[tokio::test]
    async fn test_summary_lists_outputs() {
        let dir = TempDir::new().unwrap();
        let track = TargetTrack::new("eng", TrackMode::Standard);
        let mut job = JobState::new("/videos/talk.mp4", vec![track.clone()]);

        let pair = emit_track(dir.path(), "talk", &track, &cues())
            .await
            .unwrap();
        job.outputs.insert(track.key(), pair);

        let metrics = subgen_models::analyze_cues(&cues(), 10_000);
        let path = write_summary(dir.path(), &job, &[(track, metrics)])
            .await
            .unwrap();

        let body = std::fs::read_to_string(&path).unwrap();
        assert!(body.contains("talk_eng.srt"));
        assert!(body.contains("Total Files: 2"));
        assert!(body.contains("Quality Report - ENG"));
        assert!(body.contains("manual review"));
    }
}
