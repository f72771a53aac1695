//! Authentication and enrollment failure taxonomy

use crate::embedding::Modality;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Machine-readable reason attached to every decision and event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    Granted,
    NoTemplates,
    NoMatch,
    LivenessFailed,
    VotesNotReached,
    Timeout,
    Cancelled,
    ResourceUnavailable,
    DetectionFailure,
    SignalTooWeak,
    VoiceTemplateMissing,
    VoiceFloorNotMet,
    CombinedBelowMin,
    InsufficientSamples,
    DegenerateTemplate,
    StoreError,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::Granted => "granted",
            ReasonCode::NoTemplates => "no_templates",
            ReasonCode::NoMatch => "no_match",
            ReasonCode::LivenessFailed => "liveness_failed",
            ReasonCode::VotesNotReached => "votes_not_reached",
            ReasonCode::Timeout => "timeout",
            ReasonCode::Cancelled => "cancelled",
            ReasonCode::ResourceUnavailable => "resource_unavailable",
            ReasonCode::DetectionFailure => "detection_failure",
            ReasonCode::SignalTooWeak => "signal_too_weak",
            ReasonCode::VoiceTemplateMissing => "voice_template_missing",
            ReasonCode::VoiceFloorNotMet => "voice_floor_not_met",
            ReasonCode::CombinedBelowMin => "combined_below_min",
            ReasonCode::InsufficientSamples => "insufficient_samples",
            ReasonCode::DegenerateTemplate => "degenerate_template",
            ReasonCode::StoreError => "store_error",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failures raised while authenticating a subject
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("No face or voice detected in sample")]
    DetectionFailure,

    #[error("Signal too weak: {0}")]
    SignalTooWeak(String),

    #[error("No {0} templates enrolled")]
    NoTemplatesEnrolled(Modality),

    #[error("Authentication deadline elapsed")]
    Timeout,

    #[error("Resource unavailable: {0}")]
    ResourceUnavailable(String),

    #[error("Score {score:.3} below threshold {threshold:.3}")]
    ThresholdNotMet { score: f32, threshold: f32 },

    #[error("Authentication cancelled")]
    Cancelled,
}

impl AuthError {
    /// Recoverable conditions are absorbed locally (skip cycle or retry)
    pub fn is_recoverable(&self) -> bool {
        matches!(self, AuthError::DetectionFailure | AuthError::SignalTooWeak(_))
    }

    pub fn reason(&self) -> ReasonCode {
        match self {
            AuthError::DetectionFailure => ReasonCode::DetectionFailure,
            AuthError::SignalTooWeak(_) => ReasonCode::SignalTooWeak,
            AuthError::NoTemplatesEnrolled(Modality::Voice) => ReasonCode::VoiceTemplateMissing,
            AuthError::NoTemplatesEnrolled(Modality::Face) => ReasonCode::NoTemplates,
            AuthError::Timeout => ReasonCode::Timeout,
            AuthError::ResourceUnavailable(_) => ReasonCode::ResourceUnavailable,
            AuthError::ThresholdNotMet { .. } => ReasonCode::NoMatch,
            AuthError::Cancelled => ReasonCode::Cancelled,
        }
    }
}

/// Failures raised while building or persisting a template
#[derive(Error, Debug)]
pub enum EnrollmentError {
    #[error("Insufficient samples: {valid} valid, {required} required")]
    InsufficientSamples { valid: usize, required: usize },

    #[error("Enrollment samples cancel out (mean norm {norm:.2e}); recapture required")]
    DegenerateTemplate { norm: f32 },

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Expected {expected} sample, got {actual}")]
    ModalityMismatch { expected: Modality, actual: Modality },

    #[error("No enrollment in progress")]
    NotStarted,

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl EnrollmentError {
    pub fn reason(&self) -> ReasonCode {
        match self {
            EnrollmentError::InsufficientSamples { .. } | EnrollmentError::NotStarted => {
                ReasonCode::InsufficientSamples
            }
            EnrollmentError::DegenerateTemplate { .. }
            | EnrollmentError::DimensionMismatch { .. }
            | EnrollmentError::ModalityMismatch { .. } => ReasonCode::DegenerateTemplate,
            EnrollmentError::Store(_) => ReasonCode::StoreError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(AuthError::DetectionFailure.is_recoverable());
        assert!(AuthError::SignalTooWeak("rms".into()).is_recoverable());
        assert!(!AuthError::Timeout.is_recoverable());
        assert!(!AuthError::NoTemplatesEnrolled(Modality::Face).is_recoverable());
        assert!(!AuthError::ResourceUnavailable("camera".into()).is_recoverable());
    }

    #[test]
    fn test_reason_codes_serialize_snake_case() {
        let json = serde_json::to_string(&ReasonCode::NoTemplates).unwrap();
        assert_eq!(json, "\"no_templates\"");
        assert_eq!(ReasonCode::VoiceFloorNotMet.as_str(), "voice_floor_not_met");
        assert_eq!(
            AuthError::NoTemplatesEnrolled(Modality::Face).reason(),
            ReasonCode::NoTemplates
        );
    }

    #[test]
    fn test_enrollment_reason() {
        let err = EnrollmentError::InsufficientSamples {
            valid: 1,
            required: 3,
        };
        assert_eq!(err.reason(), ReasonCode::InsufficientSamples);
        assert_eq!(err.reason().as_str(), "insufficient_samples");
    }
}
