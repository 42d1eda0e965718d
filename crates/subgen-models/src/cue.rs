//! Subtitle cues with SRT parsing and SRT/VTT rendering.

use serde::{Deserialize, Serialize};

use crate::timestamp::{format_srt_timestamp, format_vtt_timestamp, parse_srt_timestamp};

/// UTF-8 byte-order mark, required at the head of emitted SRT files.
const BOM: char = '\u{feff}';

/// One timed subtitle line group.
///
/// Block numbers are assigned at render time, not carried on the cue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cue {
    /// Start time in milliseconds
    pub start_ms: u64,
    /// End time in milliseconds, always greater than `start_ms`
    pub end_ms: u64,
    /// Cue text, one or more lines
    pub text: String,
}

impl Cue {
    pub fn new(start_ms: u64, end_ms: u64, text: impl Into<String>) -> Self {
        Self {
            start_ms,
            end_ms,
            text: text.into(),
        }
    }

    pub fn duration_ms(&self) -> u64 {
        self.end_ms.saturating_sub(self.start_ms)
    }

    /// Reading speed in characters per second.
    pub fn density_cps(&self) -> f64 {
        let dur = self.duration_ms();
        if dur == 0 {
            return 0.0;
        }
        self.text.chars().count() as f64 / (dur as f64 / 1000.0)
    }
}

/// Cue text parse error, pointing at the offending input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CueParseError {
    /// 1-based line number in the input
    pub line: usize,
    pub message: String,
}

impl std::fmt::Display for CueParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for CueParseError {}

/// Parse a line-oriented cue list (the SRT block form).
///
/// Blocks are separated by blank lines. Each block is an optional numeric
/// index line, a timing line `HH:MM:SS,mmm --> HH:MM:SS,mmm` (either `,`
/// or `.` before the milliseconds), and one or more text lines. A leading
/// byte-order mark and trailing blank lines are tolerated. Blocks with no
/// text are rejected, as are timings with `end <= start`.
pub fn parse_cue_text(input: &str) -> Result<Vec<Cue>, CueParseError> {
    let input = input.strip_prefix(BOM).unwrap_or(input);
    let lines: Vec<&str> = input.lines().collect();

    let mut cues = Vec::new();
    let mut i = 0usize;

    while i < lines.len() {
        // Skip blank lines between blocks.
        if lines[i].trim().is_empty() {
            i += 1;
            continue;
        }

        let block_start = i;

        // Optional numeric index line.
        let first = lines[i].trim();
        if is_index_line(first) {
            i += 1;
            if i >= lines.len() {
                return Err(CueParseError {
                    line: block_start + 1,
                    message: "block ends after index line".to_string(),
                });
            }
        }

        let timing_line_no = i + 1;
        let (start_ms, end_ms) = parse_timing_line(lines[i]).map_err(|message| CueParseError {
            line: timing_line_no,
            message,
        })?;

        if end_ms <= start_ms {
            return Err(CueParseError {
                line: timing_line_no,
                message: format!(
                    "cue end {} is not after start {}",
                    format_srt_timestamp(end_ms),
                    format_srt_timestamp(start_ms)
                ),
            });
        }
        i += 1;

        // Text lines until the next blank line.
        let mut text_lines = Vec::new();
        while i < lines.len() && !lines[i].trim().is_empty() {
            text_lines.push(lines[i].trim_end());
            i += 1;
        }

        if text_lines.is_empty() {
            return Err(CueParseError {
                line: timing_line_no,
                message: "cue has no text".to_string(),
            });
        }

        cues.push(Cue::new(start_ms, end_ms, text_lines.join("\n")));
    }

    Ok(cues)
}

fn is_index_line(line: &str) -> bool {
    !line.is_empty() && line.bytes().all(|b| b.is_ascii_digit())
}

fn parse_timing_line(line: &str) -> Result<(u64, u64), String> {
    let line = line.trim();
    let (start, end) = line
        .split_once("-->")
        .ok_or_else(|| format!("expected timing line, got '{}'", line))?;

    let start_ms = parse_srt_timestamp(start).map_err(|e| e.to_string())?;
    let end_ms = parse_srt_timestamp(end).map_err(|e| e.to_string())?;
    Ok((start_ms, end_ms))
}

/// Render cues in the compact SRT form: UTF-8 with a leading byte-order
/// mark, 1-based block numbers, `,` millisecond separator, trailing
/// newline.
pub fn render_srt(cues: &[Cue]) -> String {
    let mut out = String::new();
    out.push(BOM);
    for (n, cue) in cues.iter().enumerate() {
        if n > 0 {
            out.push('\n');
        }
        out.push_str(&format!(
            "{}\n{} --> {}\n{}\n",
            n + 1,
            format_srt_timestamp(cue.start_ms),
            format_srt_timestamp(cue.end_ms),
            cue.text
        ));
    }
    out
}

/// Render cues in the WebVTT form: no byte-order mark, `WEBVTT` header,
/// unnumbered blocks, `.` millisecond separator, trailing newline.
pub fn render_vtt(cues: &[Cue]) -> String {
    let mut out = String::from("WEBVTT\n");
    for cue in cues {
        out.push('\n');
        out.push_str(&format!(
            "{} --> {}\n{}\n",
            format_vtt_timestamp(cue.start_ms),
            format_vtt_timestamp(cue.end_ms),
            cue.text
        ));
    }
    out
}
