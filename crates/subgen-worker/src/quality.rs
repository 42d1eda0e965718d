//! Quality gate over merged cue sequences.
//!
//! Structural metrics come from `subgen-models`; linguistic scores come
//! from a pluggable scorer applied only when the target language differs
//! from the source language. Structural faults are deterministic and
//! fail outright; only quality-shaped faults earn a retry.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use subgen_models::{analyze_cues, Cue, CueMetrics, TargetTrack};

use crate::error::WorkerResult;

/// Linguistic scores in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TranslationScores {
    pub quality: f64,
    pub cultural: f64,
}

/// Pluggable cross-language quality scorer.
#[async_trait]
pub trait TranslationScorer: Send + Sync {
    async fn score(
        &self,
        cues: &[Cue],
        source_language: &str,
        target_language: &str,
    ) -> WorkerResult<TranslationScores>;
}

/// Heuristic fallback scorer.
///
/// Without a reference translation only surface signals are available:
/// cue length distribution, punctuation presence, and leftover
/// source-script residue in non-Latin targets.
pub struct HeuristicScorer;

#[async_trait]
impl TranslationScorer for HeuristicScorer {
    async fn score(
        &self,
        cues: &[Cue],
        _source_language: &str,
        target_language: &str,
    ) -> WorkerResult<TranslationScores> {
        if cues.is_empty() {
            return Ok(TranslationScores {
                quality: 0.0,
                cultural: 0.0,
            });
        }

        let mut quality: f64 = 0.9;
        let mut cultural: f64 = 0.9;

        let total_chars: usize = cues.iter().map(|c| c.text.chars().count()).sum();
        let mean_chars = total_chars as f64 / cues.len() as f64;

        // Implausibly short or long cue texts read as truncated or
        // unsegmented output.
        if mean_chars < 5.0 {
            quality -= 0.25;
        } else if mean_chars > 120.0 {
            quality -= 0.15;
        }

        let punctuated = cues
            .iter()
            .filter(|c| c.text.contains(['.', '!', '?', ',', '।', '…']))
            .count();
        if (punctuated as f64) < cues.len() as f64 * 0.2 {
            quality -= 0.1;
        }

        // Latin residue in a non-Latin-script target suggests untranslated
        // passages.
        if matches!(target_language, "ben" | "hin") {
            let latin_heavy = cues
                .iter()
                .filter(|c| {
                    let letters: Vec<char> =
                        c.text.chars().filter(|ch| ch.is_alphabetic()).collect();
                    if letters.is_empty() {
                        return false;
                    }
                    let latin = letters.iter().filter(|ch| ch.is_ascii()).count();
                    latin * 2 > letters.len()
                })
                .count();
            let ratio = latin_heavy as f64 / cues.len() as f64;
            if ratio > 0.3 {
                quality -= 0.3;
                cultural -= 0.2;
            }
        }

        Ok(TranslationScores {
            quality: quality.clamp(0.0, 1.0),
            cultural: cultural.clamp(0.0, 1.0),
        })
    }
}

/// Acceptance thresholds for the gate.
#[derive(Debug, Clone)]
pub struct QualityThresholds {
    pub min_coverage: f64,
    pub max_density_cps: f64,
    pub min_translation_quality: f64,
    pub min_cultural_accuracy: f64,
}

/// Gate verdict for one track.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Accept,
    /// Quality-shaped shortfall worth another attempt
    Retry { reason: String },
    /// Deterministic structural fault; retrying cannot help
    Fail { reason: String },
}

/// Evaluates merged cue sequences against the rubric.
pub struct QualityGate {
    thresholds: QualityThresholds,
    scorer: Arc<dyn TranslationScorer>,
    source_language: Option<String>,
}

impl QualityGate {
    pub fn new(
        thresholds: QualityThresholds,
        scorer: Arc<dyn TranslationScorer>,
        source_language: Option<String>,
    ) -> Self {
        Self {
            thresholds,
            scorer,
            source_language,
        }
    }

    /// Evaluate one track's merged sequence. Also returns the metrics so
    /// the caller can fold them into the job summary.
    pub async fn evaluate(
        &self,
        cues: &[Cue],
        media_duration_ms: u64,
        track: &TargetTrack,
    ) -> WorkerResult<(Verdict, CueMetrics)> {
        let metrics = analyze_cues(cues, media_duration_ms);

        // Structural faults first; these are deterministic.
        if metrics.overlaps > 0 {
            return Ok((
                Verdict::Fail {
                    reason: format!("{} overlapping cues after merge", metrics.overlaps),
                },
                metrics,
            ));
        }
        if metrics.empty_cues > 0 {
            return Ok((
                Verdict::Fail {
                    reason: format!("{} empty cues", metrics.empty_cues),
                },
                metrics,
            ));
        }

        if metrics.coverage < self.thresholds.min_coverage {
            return Ok((
                Verdict::Retry {
                    reason: format!(
                        "coverage {:.2} below minimum {:.2}",
                        metrics.coverage, self.thresholds.min_coverage
                    ),
                },
                metrics,
            ));
        }
        if metrics.mean_density_cps > self.thresholds.max_density_cps {
            return Ok((
                Verdict::Retry {
                    reason: format!(
                        "mean density {:.1} cps above maximum {:.1}",
                        metrics.mean_density_cps, self.thresholds.max_density_cps
                    ),
                },
                metrics,
            ));
        }

        // Linguistic scoring applies only when translating.
        if let Some(ref source) = self.source_language {
            if source != &track.language {
                let scores = self
                    .scorer
                    .score(cues, source, &track.language)
                    .await?;
                debug!(
                    "Track {} linguistic scores: quality {:.2}, cultural {:.2}",
                    track, scores.quality, scores.cultural
                );
                if scores.quality < self.thresholds.min_translation_quality {
                    return Ok((
                        Verdict::Retry {
                            reason: format!(
                                "translation quality {:.2} below minimum {:.2}",
                                scores.quality, self.thresholds.min_translation_quality
                            ),
                        },
                        metrics,
                    ));
                }
                if scores.cultural < self.thresholds.min_cultural_accuracy {
                    return Ok((
                        Verdict::Retry {
                            reason: format!(
                                "cultural accuracy {:.2} below minimum {:.2}",
                                scores.cultural, self.thresholds.min_cultural_accuracy
                            ),
                        },
                        metrics,
                    ));
                }
            }
        }

        Ok((Verdict::Accept, metrics))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use subgen_models::TrackMode;

    fn thresholds() -> QualityThresholds {
        QualityThresholds {
            min_coverage: 0.6,
            max_density_cps: 25.0,
            min_translation_quality: 0.70,
            min_cultural_accuracy: 0.80,
        }
    }

    fn eng() -> TargetTrack {
        TargetTrack::new("eng", TrackMode::Standard)
    }

    /// Scorer returning fixed values.
    struct FixedScorer(f64, f64);

    #[async_trait]
    impl TranslationScorer for FixedScorer {
        async fn score(
            &self,
            _cues: &[Cue],
            _source: &str,
            _target: &str,
        ) -> WorkerResult<TranslationScores> {
            Ok(TranslationScores {
                quality: self.0,
                cultural: self.1,
            })
        }
    }

    fn good_cues() -> Vec<Cue> {
        // 8 cues of 3 s each over a 30 s clip: coverage 0.8, modest density.
        (0..8)
            .map(|i| {
                Cue::new(
                    i * 3_750,
                    i * 3_750 + 3_000,
                    "A perfectly ordinary line.",
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn test_accept_same_language_skips_scorer() {
        let gate = QualityGate::new(
            thresholds(),
            Arc::new(FixedScorer(0.0, 0.0)),
            Some("eng".to_string()),
        );
        let (verdict, metrics) = gate.evaluate(&good_cues(), 30_000, &eng()).await.unwrap();
        assert_eq!(verdict, Verdict::Accept);
        assert_eq!(metrics.cue_count, 8);
    }

    #[tokio::test]
    async fn test_overlap_is_structural_fail() {
        let cues = vec![Cue::new(0, 3_000, "a"), Cue::new(2_000, 4_000, "b")];
        let gate = QualityGate::new(thresholds(), Arc::new(FixedScorer(1.0, 1.0)), None);
        let (verdict, _) = gate.evaluate(&cues, 4_000, &eng()).await.unwrap();
        assert!(matches!(verdict, Verdict::Fail { .. }));
    }

    #[tokio::test]
    async fn test_low_coverage_is_retry() {
        let cues = vec![Cue::new(0, 2_000, "short")];
        let gate = QualityGate::new(thresholds(), Arc::new(FixedScorer(1.0, 1.0)), None);
        let (verdict, _) = gate.evaluate(&cues, 60_000, &eng()).await.unwrap();
        match verdict {
            Verdict::Retry { reason } => assert!(reason.contains("coverage")),
            other => panic!("unexpected verdict: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_low_translation_score_is_retry() {
        let gate = QualityGate::new(
            thresholds(),
            Arc::new(FixedScorer(0.65, 0.9)),
            Some("eng".to_string()),
        );
        let ben = TargetTrack::new("ben", TrackMode::Standard);
        let (verdict, _) = gate.evaluate(&good_cues(), 30_000, &ben).await.unwrap();
        match verdict {
            Verdict::Retry { reason } => assert!(reason.contains("translation quality")),
            other => panic!("unexpected verdict: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cultural_threshold_enforced() {
        let gate = QualityGate::new(
            thresholds(),
            Arc::new(FixedScorer(0.9, 0.5)),
            Some("eng".to_string()),
        );
        let ben = TargetTrack::new("ben", TrackMode::Standard);
        let (verdict, _) = gate.evaluate(&good_cues(), 30_000, &ben).await.unwrap();
        assert!(matches!(verdict, Verdict::Retry { .. }));
    }

    #[tokio::test]
    async fn test_heuristic_scorer_reasonable_on_normal_text() {
        let scores = HeuristicScorer
            .score(&good_cues(), "eng", "spa")
            .await
            .unwrap();
        assert!(scores.quality >= 0.7);
        assert!(scores.cultural >= 0.8);
    }

    #[tokio::test]
    async fn test_heuristic_scorer_penalizes_latin_residue() {
        let cues: Vec<Cue> = (0..4)
            .map(|i| Cue::new(i * 2_000, i * 2_000 + 1_500, "untranslated english text."))
            .collect();
        let scores = HeuristicScorer.score(&cues, "eng", "ben").await.unwrap();
        assert!(scores.quality < 0.7);
    }
}
