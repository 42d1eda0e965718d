//! Structural quality metrics for merged cue sequences.

use crate::cue::Cue;

/// Structural metrics of a cue sequence relative to its media duration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CueMetrics {
    /// Number of cues
    pub cue_count: usize,
    /// Total characters across all cue texts
    pub total_chars: usize,
    /// Cues with only whitespace text
    pub empty_cues: usize,
    /// Pairs where a cue starts before the previous one ends
    pub overlaps: usize,
    /// Mean reading speed in characters per second
    pub mean_density_cps: f64,
    /// Highest per-cue reading speed
    pub max_density_cps: f64,
    /// Mean cue duration in seconds
    pub mean_duration_s: f64,
    /// Longest cue duration in seconds
    pub max_duration_s: f64,
    /// Fraction of the media duration covered by cues
    pub coverage: f64,
}

/// Compute structural metrics for a merged cue sequence.
pub fn analyze_cues(cues: &[Cue], media_duration_ms: u64) -> CueMetrics {
    let mut metrics = CueMetrics {
        cue_count: cues.len(),
        ..Default::default()
    };

    if cues.is_empty() {
        return metrics;
    }

    let mut covered_ms: u64 = 0;
    let mut density_sum = 0.0;
    let mut previous_end: Option<u64> = None;

    for cue in cues {
        let chars = cue.text.chars().count();
        metrics.total_chars += chars;

        if cue.text.trim().is_empty() {
            metrics.empty_cues += 1;
        }

        let duration_s = cue.duration_ms() as f64 / 1000.0;
        covered_ms += cue.duration_ms();
        metrics.max_duration_s = metrics.max_duration_s.max(duration_s);

        let density = cue.density_cps();
        density_sum += density;
        metrics.max_density_cps = metrics.max_density_cps.max(density);

        if let Some(prev_end) = previous_end {
            if cue.start_ms < prev_end {
                metrics.overlaps += 1;
            }
        }
        previous_end = Some(cue.end_ms);
    }

    let count = cues.len() as f64;
    metrics.mean_density_cps = density_sum / count;
    metrics.mean_duration_s = covered_ms as f64 / 1000.0 / count;
    if media_duration_ms > 0 {
        metrics.coverage = covered_ms as f64 / media_duration_ms as f64;
    }

    metrics
}

/// Render a human-readable quality report for one track, included in the
/// job's info summary file.
pub fn quality_report(metrics: &CueMetrics, language: &str) -> String {
    let mut report = format!(
        "Subtitle Quality Report - {}\n\
         ----------------------------------------\n\
         Cues: {}\n\
         Total characters: {}\n\
         Mean reading speed: {:.1} cps\n\
         Mean cue duration: {:.1}s (max {:.1}s)\n\
         Coverage: {:.0}%\n",
        language.to_uppercase(),
        metrics.cue_count,
        metrics.total_chars,
        metrics.mean_density_cps,
        metrics.mean_duration_s,
        metrics.max_duration_s,
        metrics.coverage * 100.0,
    );

    if metrics.overlaps > 0 {
        report.push_str(&format!("Overlapping cues: {}\n", metrics.overlaps));
    }
    if metrics.empty_cues > 0 {
        report.push_str(&format!("Empty cues: {}\n", metrics.empty_cues));
    }
    if metrics.mean_density_cps > 25.0 {
        report.push_str("Note: reading speed is high; long lines may need splitting.\n");
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_sequence() {
        let metrics = analyze_cues(&[], 60_000);
        assert_eq!(metrics.cue_count, 0);
        assert_eq!(metrics.coverage, 0.0);
    }

    #[test]
    fn test_basic_metrics() {
        let cues = vec![
            Cue::new(0, 2_000, "Hello world"), // 11 chars over 2 s
            Cue::new(2_000, 4_000, "More text here"),
        ];
        let metrics = analyze_cues(&cues, 10_000);

        assert_eq!(metrics.cue_count, 2);
        assert_eq!(metrics.total_chars, 25);
        assert_eq!(metrics.overlaps, 0);
        assert_eq!(metrics.empty_cues, 0);
        assert!((metrics.coverage - 0.4).abs() < 1e-9);
        assert!((metrics.mean_duration_s - 2.0).abs() < 1e-9);
        assert!((metrics.max_density_cps - 7.0).abs() < 1e-9);
    }

    #[test]
    fn test_overlap_and_empty_detection() {
        let cues = vec![
            Cue::new(0, 3_000, "a"),
            Cue::new(2_500, 4_000, "   "),
        ];
        let metrics = analyze_cues(&cues, 4_000);
        assert_eq!(metrics.overlaps, 1);
        assert_eq!(metrics.empty_cues, 1);
    }

    #[test]
    fn test_report_mentions_issues() {
        let cues = vec![Cue::new(0, 3_000, "a"), Cue::new(2_500, 4_000, " ")];
        let metrics = analyze_cues(&cues, 4_000);
        let report = quality_report(&metrics, "eng");
        assert!(report.contains("ENG"));
        assert!(report.contains("Overlapping cues: 1"));
        assert!(report.contains("Empty cues: 1"));
    }
}
