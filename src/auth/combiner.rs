//! Multi-factor combiner: face outcome + voice score -> grant/deny
//!
//! Voice is evaluated only for the face-selected candidate, and only after
//! face voting accepted. Grant requires the voice floor AND the weighted
//! blend to clear the policy minimum.

use crate::error::{AuthError, ReasonCode};
use crate::validation::{validate_similarity_threshold, validate_weights, ValidationError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Named policy preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyMode {
    Strict,
    Balanced,
    Relaxed,
}

impl PolicyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyMode::Strict => "strict",
            PolicyMode::Balanced => "balanced",
            PolicyMode::Relaxed => "relaxed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "strict" => Some(PolicyMode::Strict),
            "balanced" => Some(PolicyMode::Balanced),
            "relaxed" => Some(PolicyMode::Relaxed),
            _ => None,
        }
    }
}

impl fmt::Display for PolicyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PolicyBundle {
    pub face_weight: f32,
    pub voice_weight: f32,
    pub combined_min: f32,
    /// Minimum voice score regardless of the blend
    pub voice_floor: f32,
}

impl PolicyBundle {
    pub fn combined(&self, face_score: f32, voice_score: f32) -> f32 {
        self.face_weight * face_score + self.voice_weight * voice_score
    }

    pub fn validate(&self, mode: PolicyMode) -> Result<(), ValidationError> {
        validate_weights(mode.as_str(), &[self.face_weight, self.voice_weight], true)?;
        validate_similarity_threshold("Combined minimum", self.combined_min)?;
        validate_similarity_threshold("Voice floor", self.voice_floor)?;
        Ok(())
    }
}

/// Every threshold and weight the combiner uses, in one place
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    pub mode: PolicyMode,
    pub strict: PolicyBundle,
    pub balanced: PolicyBundle,
    pub relaxed: PolicyBundle,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            mode: PolicyMode::Balanced,
            strict: PolicyBundle {
                face_weight: 0.5,
                voice_weight: 0.5,
                combined_min: 0.75,
                voice_floor: 0.60,
            },
            balanced: PolicyBundle {
                face_weight: 0.6,
                voice_weight: 0.4,
                combined_min: 0.68,
                voice_floor: 0.50,
            },
            relaxed: PolicyBundle {
                face_weight: 0.5,
                voice_weight: 0.5,
                combined_min: 0.55,
                voice_floor: 0.40,
            },
        }
    }
}

impl PolicyConfig {
    pub fn bundle(&self, mode: PolicyMode) -> &PolicyBundle {
        match mode {
            PolicyMode::Strict => &self.strict,
            PolicyMode::Balanced => &self.balanced,
            PolicyMode::Relaxed => &self.relaxed,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        for mode in [PolicyMode::Strict, PolicyMode::Balanced, PolicyMode::Relaxed] {
            self.bundle(mode).validate(mode)?;
        }
        Ok(())
    }
}

/// Terminal result of the face stage
#[derive(Debug, Clone, PartialEq)]
pub enum FaceOutcome {
    Accepted { subject_id: String, score: f32 },
    Rejected { reason: ReasonCode, best_score: Option<f32> },
}

/// Final decision for one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthDecision {
    pub subject_id: Option<String>,
    pub granted: bool,
    pub combined_score: f32,
    pub face_score: Option<f32>,
    pub voice_score: Option<f32>,
    pub reason: ReasonCode,
    pub mode: PolicyMode,
    pub decided_at: DateTime<Utc>,
}

impl AuthDecision {
    /// Denial raised before any factor produced a score
    pub fn denied(reason: ReasonCode, mode: PolicyMode, decided_at: DateTime<Utc>) -> Self {
        Self {
            subject_id: None,
            granted: false,
            combined_score: 0.0,
            face_score: None,
            voice_score: None,
            reason,
            mode,
            decided_at,
        }
    }
}

pub struct MultiFactorCombiner {
    policy: PolicyConfig,
}

impl MultiFactorCombiner {
    pub fn new(policy: PolicyConfig) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &PolicyConfig {
        &self.policy
    }

    /// Decide under the configured default mode
    pub fn decide<F>(&self, face: &FaceOutcome, voice: F, now: DateTime<Utc>) -> AuthDecision
    where
        F: FnOnce(&str) -> Result<f32, AuthError>,
    {
        self.decide_with_mode(self.policy.mode, face, voice, now)
    }

    /// `voice` is called at most once, with the face-selected subject id
    pub fn decide_with_mode<F>(
        &self,
        mode: PolicyMode,
        face: &FaceOutcome,
        voice: F,
        now: DateTime<Utc>,
    ) -> AuthDecision
    where
        F: FnOnce(&str) -> Result<f32, AuthError>,
    {
        let (subject_id, face_score) = match face {
            FaceOutcome::Rejected { reason, best_score } => {
                log::info!("Face stage rejected ({}), voice not evaluated", reason);
                let mut decision = AuthDecision::denied(*reason, mode, now);
                decision.face_score = *best_score;
                return decision;
            }
            FaceOutcome::Accepted { subject_id, score } => (subject_id.clone(), *score),
        };

        let bundle = self.policy.bundle(mode);
        let mut decision = AuthDecision {
            subject_id: Some(subject_id.clone()),
            granted: false,
            combined_score: 0.0,
            face_score: Some(face_score),
            voice_score: None,
            reason: ReasonCode::Granted,
            mode,
            decided_at: now,
        };

        let voice_score = match voice(&subject_id) {
            Ok(score) => score,
            Err(e) => {
                log::info!("Voice stage failed for '{}': {}", subject_id, e);
                decision.reason = e.reason();
                return decision;
            }
        };

        let combined = bundle.combined(face_score, voice_score);
        decision.voice_score = Some(voice_score);
        decision.combined_score = combined;

        if voice_score < bundle.voice_floor {
            decision.reason = ReasonCode::VoiceFloorNotMet;
        } else if combined < bundle.combined_min {
            decision.reason = ReasonCode::CombinedBelowMin;
        } else {
            decision.granted = true;
        }

        log::info!(
            "Decision for '{}' [{}]: face={:.3} voice={:.3} combined={:.3} min={:.2} floor={:.2} -> {}",
            subject_id,
            mode,
            face_score,
            voice_score,
            combined,
            bundle.combined_min,
            bundle.voice_floor,
            decision.reason
        );

        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn accepted(score: f32) -> FaceOutcome {
        FaceOutcome::Accepted {
            subject_id: "alice".to_string(),
            score,
        }
    }

    #[test]
    fn test_balanced_grant() {
        let combiner = MultiFactorCombiner::new(PolicyConfig::default());
        let decision = combiner.decide(&accepted(0.95), |_| Ok(0.80), Utc::now());
        assert!(decision.granted);
        assert_eq!(decision.reason, ReasonCode::Granted);
        assert!((decision.combined_score - 0.89).abs() < 1e-4);
    }

    #[test]
    fn test_strict_voice_floor_blocks_high_face() {
        let combiner = MultiFactorCombiner::new(PolicyConfig::default());
        let decision =
            combiner.decide_with_mode(PolicyMode::Strict, &accepted(0.9), |_| Ok(0.0), Utc::now());
        assert!(!decision.granted);
        assert_eq!(decision.reason, ReasonCode::VoiceFloorNotMet);
    }

    #[test]
    fn test_floor_met_but_combined_low() {
        let combiner = MultiFactorCombiner::new(PolicyConfig::default());
        let decision = combiner.decide_with_mode(
            PolicyMode::Strict,
            &accepted(0.7),
            |_| Ok(0.65),
            Utc::now(),
        );
        assert!(!decision.granted);
        assert_eq!(decision.reason, ReasonCode::CombinedBelowMin);
    }

    #[test]
    fn test_face_rejection_short_circuits_voice() {
        let combiner = MultiFactorCombiner::new(PolicyConfig::default());
        let called = Cell::new(false);
        let face = FaceOutcome::Rejected {
            reason: ReasonCode::VotesNotReached,
            best_score: Some(0.1),
        };
        let decision = combiner.decide(
            &face,
            |_| {
                called.set(true);
                Ok(1.0)
            },
            Utc::now(),
        );
        assert!(!called.get());
        assert!(!decision.granted);
        assert_eq!(decision.reason, ReasonCode::VotesNotReached);
        assert!(decision.voice_score.is_none());
    }

    #[test]
    fn test_voice_receives_face_candidate() {
        let combiner = MultiFactorCombiner::new(PolicyConfig::default());
        let decision = combiner.decide(
            &accepted(0.9),
            |subject| {
                assert_eq!(subject, "alice");
                Err(AuthError::NoTemplatesEnrolled(crate::embedding::Modality::Voice))
            },
            Utc::now(),
        );
        assert!(!decision.granted);
        assert_eq!(decision.reason, ReasonCode::VoiceTemplateMissing);
        assert_eq!(decision.combined_score, 0.0);
        assert_eq!(decision.face_score, Some(0.9));
        assert_eq!(decision.voice_score, None);
    }

    #[test]
    fn test_mode_parse_and_defaults_validate() {
        assert_eq!(PolicyMode::from_str("STRICT"), Some(PolicyMode::Strict));
        assert_eq!(PolicyMode::from_str("paranoid"), None);
        assert!(PolicyConfig::default().validate().is_ok());

        let mut config = PolicyConfig::default();
        config.relaxed.voice_weight = 0.9;
        assert!(config.validate().is_err());
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn never_grants_below_floor(face in 0.0f32..1.0, voice in 0.0f32..1.0) {
            let combiner = MultiFactorCombiner::new(PolicyConfig::default());
            for mode in [PolicyMode::Strict, PolicyMode::Balanced, PolicyMode::Relaxed] {
                let face_outcome = FaceOutcome::Accepted { subject_id: "s".into(), score: face };
                let d = combiner.decide_with_mode(mode, &face_outcome, |_| Ok(voice), Utc::now());
                let bundle = combiner.policy().bundle(mode);
                if d.granted {
                    prop_assert!(voice >= bundle.voice_floor);
                    prop_assert!(d.combined_score >= bundle.combined_min);
                }
            }
        }
    }
}
