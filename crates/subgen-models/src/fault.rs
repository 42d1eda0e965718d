//! Fault classification shared across the pipeline.

use serde::{Deserialize, Serialize};

/// Classified fault kinds. The scheduler maps each kind to a fixed
/// retry/pause/fail policy; components only classify, they never decide
/// terminal fate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// Source unreadable, unsupported format, or over admission limits
    InvalidInput,
    /// Credentials missing/expired or permission denied
    AuthFault,
    /// Upload/download/RPC flapped; safe to retry internally
    TransientIo,
    /// Upstream rate or quota limit
    QuotaExceeded,
    /// Model response could not be parsed into cues
    ModelOutputInvalid,
    /// Quality gate returned a retry verdict
    QualityBelowThreshold,
    /// Produced cues violate merge invariants after clipping
    StructuralInvariant,
    /// Scratch write failed for space
    DiskExhausted,
    /// Operator request or process shutdown
    Cancelled,
}

impl FaultKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FaultKind::InvalidInput => "invalid_input",
            FaultKind::AuthFault => "auth_fault",
            FaultKind::TransientIo => "transient_io",
            FaultKind::QuotaExceeded => "quota_exceeded",
            FaultKind::ModelOutputInvalid => "model_output_invalid",
            FaultKind::QualityBelowThreshold => "quality_below_threshold",
            FaultKind::StructuralInvariant => "structural_invariant",
            FaultKind::DiskExhausted => "disk_exhausted",
            FaultKind::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for FaultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
