//! FFprobe media information and input admission.

use serde::Deserialize;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

use subgen_models::MediaInfo;

use crate::error::{MediaError, MediaResult};

/// FFprobe JSON output format.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    size: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: String,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
}

/// Probe a media file for stream metadata.
pub async fn probe_media(path: impl AsRef<Path>) -> MediaResult<MediaInfo> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }

    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)?;

    let output = Command::new("ffprobe")
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if !output.status.success() {
        return Err(MediaError::FfprobeFailed {
            message: "FFprobe failed".to_string(),
            stderr: Some(String::from_utf8_lossy(&output.stderr).to_string()),
        });
    }

    let probe: FfprobeOutput = serde_json::from_slice(&output.stdout)?;

    let video_stream = probe
        .streams
        .iter()
        .find(|s| s.codec_type == "video")
        .ok_or_else(|| MediaError::input_rejected("no video stream found"))?;

    let audio_stream = probe.streams.iter().find(|s| s.codec_type == "audio");

    let duration = probe
        .format
        .duration
        .as_ref()
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0);

    let size = probe
        .format
        .size
        .as_ref()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(0);

    let fps = video_stream
        .avg_frame_rate
        .as_ref()
        .or(video_stream.r_frame_rate.as_ref())
        .and_then(|r| parse_frame_rate(r))
        .unwrap_or(30.0);

    Ok(MediaInfo {
        duration_s: duration,
        width: video_stream.width.unwrap_or(0),
        height: video_stream.height.unwrap_or(0),
        fps,
        video_codec: video_stream.codec_name.clone().unwrap_or_default(),
        audio_codec: audio_stream.and_then(|s| s.codec_name.clone()),
        size_bytes: size,
    })
}

/// Parse frame rate string (e.g., "30/1" or "29.97").
fn parse_frame_rate(s: &str) -> Option<f64> {
    if let Some((num, den)) = s.split_once('/') {
        let num: f64 = num.parse().ok()?;
        let den: f64 = den.parse().ok()?;
        if den > 0.0 {
            return Some(num / den);
        }
    }
    s.parse().ok()
}

/// Input admission limits. Sources outside these bounds are rejected
/// before any segmentation begins.
#[derive(Debug, Clone)]
pub struct AdmissionPolicy {
    /// Duration ceiling in seconds
    pub max_duration_s: f64,
    /// Size ceiling in bytes
    pub max_size_bytes: u64,
    /// Admitted video codec names; empty admits everything
    pub admitted_codecs: Vec<String>,
}

impl Default for AdmissionPolicy {
    fn default() -> Self {
        Self {
            max_duration_s: 12.0 * 3600.0,
            max_size_bytes: 10 * 1024 * 1024 * 1024,
            admitted_codecs: Vec::new(),
        }
    }
}

impl AdmissionPolicy {
    /// Admit or reject a probed source. The error message names the
    /// exact reason.
    pub fn admit(&self, info: &MediaInfo) -> MediaResult<()> {
        if !info.has_audio() {
            return Err(MediaError::input_rejected(
                "no audio stream present; subtitle generation requires audio",
            ));
        }
        if info.duration_s <= 0.0 {
            return Err(MediaError::input_rejected("duration is zero or unknown"));
        }
        if info.duration_s > self.max_duration_s {
            return Err(MediaError::input_rejected(format!(
                "duration {:.1}s exceeds ceiling {:.1}s",
                info.duration_s, self.max_duration_s
            )));
        }
        if info.size_bytes > self.max_size_bytes {
            return Err(MediaError::input_rejected(format!(
                "size {} bytes exceeds ceiling {} bytes",
                info.size_bytes, self.max_size_bytes
            )));
        }
        if !self.admitted_codecs.is_empty()
            && !self
                .admitted_codecs
                .iter()
                .any(|c| c.eq_ignore_ascii_case(&info.video_codec))
        {
            return Err(MediaError::input_rejected(format!(
                "video codec '{}' is not in the admitted set",
                info.video_codec
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> MediaInfo {
        MediaInfo {
            duration_s: 125.0,
            width: 1920,
            height: 1080,
            fps: 29.97,
            video_codec: "h264".to_string(),
            audio_codec: Some("aac".to_string()),
            size_bytes: 50 * 1024 * 1024,
        }
    }

    #[test]
    fn test_parse_frame_rate() {
        assert!((parse_frame_rate("30/1").unwrap() - 30.0).abs() < 0.01);
        assert!((parse_frame_rate("30000/1001").unwrap() - 29.97).abs() < 0.01);
        assert!((parse_frame_rate("29.97").unwrap() - 29.97).abs() < 0.01);
        assert!(parse_frame_rate("0/0").is_none());
    }

    #[test]
    fn test_admit_ok() {
        assert!(AdmissionPolicy::default().admit(&info()).is_ok());
    }

    #[test]
    fn test_reject_missing_audio() {
        let mut media = info();
        media.audio_codec = None;
        let err = AdmissionPolicy::default().admit(&media).unwrap_err();
        assert!(err.to_string().contains("no audio stream"));
    }

    #[test]
    fn test_reject_zero_duration() {
        let mut media = info();
        media.duration_s = 0.0;
        assert!(AdmissionPolicy::default().admit(&media).is_err());
    }

    #[test]
    fn test_reject_over_limits() {
        let policy = AdmissionPolicy {
            max_duration_s: 100.0,
            ..Default::default()
        };
        assert!(policy.admit(&info()).is_err());

        let policy = AdmissionPolicy {
            max_size_bytes: 1024,
            ..Default::default()
        };
        assert!(policy.admit(&info()).is_err());
    }

    #[test]
    fn test_codec_allowlist() {
        let policy = AdmissionPolicy {
            admitted_codecs: vec!["hevc".to_string()],
            ..Default::default()
        };
        let err = policy.admit(&info()).unwrap_err();
        assert!(err.to_string().contains("h264"));

        let policy = AdmissionPolicy {
            admitted_codecs: vec!["H264".to_string()],
            ..Default::default()
        };
        assert!(policy.admit(&info()).is_ok());
    }
}
