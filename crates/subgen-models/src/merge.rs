//! Timestamp offset and merge algebra for per-segment cue sequences.
//!
//! The merge is pure and deterministic: the same inputs always produce
//! the same output, regardless of the order segments finished generating.

use crate::cue::Cue;

/// Slack allowed past a segment's end before a cue is clipped.
pub const SEGMENT_TOLERANCE_MS: u64 = 50;

/// Overlaps up to this size are resolved by snapping the later cue
/// forward; larger overlaps truncate the earlier cue.
pub const OVERLAP_SNAP_MS: u64 = 200;

/// Time window of one segment within the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentWindow {
    /// Segment start offset in the source, milliseconds
    pub start_ms: u64,
    /// Segment duration, milliseconds
    pub duration_ms: u64,
}

/// Outcome of a merge, with counters for every repair applied.
#[derive(Debug, Clone, Default)]
pub struct MergeReport {
    /// Final cue sequence, strictly ordered and non-overlapping
    pub cues: Vec<Cue>,
    /// Cues whose end was pulled back to the segment boundary
    pub clipped: usize,
    /// Cues dropped as degenerate after clipping or snapping
    pub dropped: usize,
    /// Overlaps resolved by snapping the later cue forward
    pub snapped: usize,
    /// Overlaps resolved by truncating the earlier cue
    pub truncated: usize,
    /// Cues split to respect the maximum duration
    pub split: usize,
}

/// Merge per-segment cue sequences into one source-relative sequence.
///
/// Per segment: cue times are local to the segment and constrained to
/// `[0, duration + SEGMENT_TOLERANCE_MS]`; cues ending past the tolerance
/// are clipped to the segment duration and dropped when that makes them
/// degenerate. Cues are then shifted by the segment start and
/// concatenated in segment order. Overlaps are repaired by the snap or
/// truncate rule, and cues longer than `max_cue_duration_ms` are split
/// into the minimum number of pieces respecting the bound, partitioning
/// the text contiguously so the concatenation of piece texts equals the
/// original.
pub fn merge_segments(
    parts: &[(SegmentWindow, Vec<Cue>)],
    max_cue_duration_ms: u64,
) -> MergeReport {
    let mut report = MergeReport::default();
    let mut merged: Vec<Cue> = Vec::new();

    for (window, cues) in parts {
        let mut local: Vec<Cue> = cues.clone();
        local.sort_by_key(|c| (c.start_ms, c.end_ms));

        for mut cue in local {
            let limit = window.duration_ms + SEGMENT_TOLERANCE_MS;

            if cue.end_ms > limit {
                cue.end_ms = window.duration_ms;
                report.clipped += 1;
            }
            if cue.start_ms >= cue.end_ms {
                report.dropped += 1;
                continue;
            }

            cue.start_ms += window.start_ms;
            cue.end_ms += window.start_ms;
            merged.push(cue);
        }
    }

    let ordered = enforce_non_overlap(merged, &mut report);
    report.cues = split_long_cues(ordered, max_cue_duration_ms, &mut report.split);
    report
}

fn enforce_non_overlap(cues: Vec<Cue>, report: &mut MergeReport) -> Vec<Cue> {
    let mut out: Vec<Cue> = Vec::with_capacity(cues.len());

    // Each repair can expose a new overlap against the element it
    // uncovers, so the cue is re-checked against the tail until it
    // either fits, snaps, or is dropped.
    for mut cue in cues {
        loop {
            let Some(prev) = out.last_mut() else {
                out.push(cue);
                break;
            };

            if cue.start_ms >= prev.end_ms {
                out.push(cue);
                break;
            }

            let overlap = prev.end_ms - cue.start_ms;
            if overlap <= OVERLAP_SNAP_MS {
                cue.start_ms = prev.end_ms;
                report.snapped += 1;
                if cue.start_ms >= cue.end_ms {
                    report.dropped += 1;
                } else {
                    out.push(cue);
                }
                break;
            }

            let new_end = cue.start_ms.saturating_sub(1);
            if new_end <= prev.start_ms {
                // Truncation would leave the earlier cue degenerate;
                // drop it and re-check against the uncovered tail.
                report.dropped += 1;
                out.pop();
            } else {
                prev.end_ms = new_end;
                report.truncated += 1;
                out.push(cue);
                break;
            }
        }
    }

    out
}

fn split_long_cues(cues: Vec<Cue>, max_ms: u64, split_count: &mut usize) -> Vec<Cue> {
    let mut out = Vec::with_capacity(cues.len());

    for cue in cues {
        let duration = cue.duration_ms();
        if duration <= max_ms {
            out.push(cue);
            continue;
        }

        *split_count += 1;
        let pieces = duration.div_ceil(max_ms) as usize;
        let texts = partition_text(&cue.text, pieces);

        for (i, text) in texts.into_iter().enumerate() {
            // A text shorter than the piece count leaves empty tails;
            // dropping them keeps the concatenation law intact.
            if text.is_empty() {
                continue;
            }
            let start = cue.start_ms + i as u64 * max_ms;
            let end = (start + max_ms).min(cue.end_ms);
            out.push(Cue::new(start, end, text));
        }
    }

    out
}

/// Partition text into `pieces` contiguous chunks on character
/// boundaries, sizes as even as possible. No re-flow: concatenating the
/// chunks reproduces the input exactly.
fn partition_text(text: &str, pieces: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let total = chars.len();
    let base = total / pieces;
    let remainder = total % pieces;

    let mut out = Vec::with_capacity(pieces);
    let mut offset = 0;
    for i in 0..pieces {
        let take = base + usize::from(i < remainder);
        out.push(chars[offset..offset + take].iter().collect());
        offset += take;
    }
    out
}
