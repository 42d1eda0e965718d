//! Fixed fault policy table.
//!
//! The scheduler is the only decision-maker for terminal fate; every
//! other component returns classified faults and this table says what to
//! do with each kind.

use std::time::Duration;

use subgen_models::{FaultKind, JobStage};

/// What the scheduler does with a fault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// Whether the fault consumes one of the unit's bounded attempts
    pub consume_attempt: bool,
    /// Pause before the unit is re-queued
    pub delay: Option<Duration>,
    /// Terminal stage to move the job to, if the fault is fatal
    pub terminal: Option<JobStage>,
}

impl Decision {
    /// The fault leaves the job running and the unit eligible for
    /// another try.
    pub fn is_retry(&self) -> bool {
        self.terminal.is_none()
    }
}

/// Map a fault kind to its fixed policy. `quota_cooldown` parameterizes
/// the one kind that pauses instead of failing or counting.
pub fn decide(kind: FaultKind, quota_cooldown: Duration) -> Decision {
    match kind {
        FaultKind::InvalidInput
        | FaultKind::AuthFault
        | FaultKind::StructuralInvariant
        | FaultKind::DiskExhausted => Decision {
            consume_attempt: false,
            delay: None,
            terminal: Some(JobStage::Failed),
        },
        // The adapters already retried internally; a transient fault
        // surfacing here fails the job, which resumes cleanly later.
        FaultKind::TransientIo => Decision {
            consume_attempt: false,
            delay: None,
            terminal: Some(JobStage::Failed),
        },
        FaultKind::QuotaExceeded => Decision {
            consume_attempt: false,
            delay: Some(quota_cooldown),
            terminal: None,
        },
        FaultKind::ModelOutputInvalid | FaultKind::QualityBelowThreshold => Decision {
            consume_attempt: true,
            delay: None,
            terminal: None,
        },
        FaultKind::Cancelled => Decision {
            consume_attempt: false,
            delay: None,
            terminal: Some(JobStage::Abandoned),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COOLDOWN: Duration = Duration::from_secs(60);

    #[test]
    fn test_fatal_kinds_fail_immediately() {
        for kind in [
            FaultKind::InvalidInput,
            FaultKind::AuthFault,
            FaultKind::StructuralInvariant,
            FaultKind::DiskExhausted,
        ] {
            let decision = decide(kind, COOLDOWN);
            assert_eq!(decision.terminal, Some(JobStage::Failed));
            assert!(!decision.consume_attempt);
        }
    }

    #[test]
    fn test_quota_pauses_without_consuming_attempt() {
        let decision = decide(FaultKind::QuotaExceeded, COOLDOWN);
        assert!(decision.is_retry());
        assert!(!decision.consume_attempt);
        assert_eq!(decision.delay, Some(COOLDOWN));
    }

    #[test]
    fn test_quality_kinds_consume_attempts() {
        for kind in [FaultKind::ModelOutputInvalid, FaultKind::QualityBelowThreshold] {
            let decision = decide(kind, COOLDOWN);
            assert!(decision.is_retry());
            assert!(decision.consume_attempt);
            assert!(decision.delay.is_none());
        }
    }

    #[test]
    fn test_cancellation_abandons() {
        let decision = decide(FaultKind::Cancelled, COOLDOWN);
        assert_eq!(decision.terminal, Some(JobStage::Abandoned));
    }
}
