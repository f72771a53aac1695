//! Enrollment: several captured embeddings -> one canonical template
//!
//! Samples below the modality's quality floor are discarded. The rest are
//! unit-normalized, averaged and renormalized. A mean that collapses to
//! (nearly) zero means the samples disagree in direction and the enrollment
//! fails instead of storing a meaningless vector.

use crate::embedding::{l2_norm, mean, normalize, Embedding, Modality};
use crate::error::{EnrollmentError, ReasonCode};
use crate::events::{emit, EventRecord, EventSink, Stage};
use crate::store::{Template, TemplateRepository};
use crate::validation::{validate_positive, validate_unit_interval, ValidationError};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollmentConfig {
    /// Valid samples needed to build a template
    pub min_samples: usize,
    pub face_quality_floor: f32,
    pub voice_quality_floor: f32,
    /// Pre-normalization mean norm below which samples are considered opposing
    pub degenerate_epsilon: f32,
}

impl Default for EnrollmentConfig {
    fn default() -> Self {
        Self {
            min_samples: 3,
            face_quality_floor: 0.5,
            voice_quality_floor: 0.15,
            degenerate_epsilon: 1e-3,
        }
    }
}

impl EnrollmentConfig {
    pub fn quality_floor(&self, modality: Modality) -> f32 {
        match modality {
            Modality::Face => self.face_quality_floor,
            Modality::Voice => self.voice_quality_floor,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.min_samples == 0 {
            return Err(ValidationError::InvalidRange(
                "Enrollment needs at least 1 sample".to_string(),
            ));
        }
        validate_unit_interval("Face quality floor", self.face_quality_floor)?;
        validate_unit_interval("Voice quality floor", self.voice_quality_floor)?;
        validate_positive("Degenerate epsilon", self.degenerate_epsilon)?;
        Ok(())
    }
}

/// Enrollment progress information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrollmentProgress {
    pub subject_id: String,
    pub modality: Modality,
    pub collected: usize,
    pub required: usize,
    /// Samples discarded for low quality
    pub rejected: usize,
    pub completed: bool,
}

struct PendingEnrollment {
    subject_id: String,
    modality: Modality,
    samples: Vec<Embedding>,
    rejected: usize,
}

pub struct EnrollmentManager {
    config: EnrollmentConfig,
    repository: Arc<TemplateRepository>,
    events: Arc<dyn EventSink>,
    pending: Mutex<Option<PendingEnrollment>>,
}

impl EnrollmentManager {
    pub fn new(
        config: EnrollmentConfig,
        repository: Arc<TemplateRepository>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            config,
            repository,
            events,
            pending: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &EnrollmentConfig {
        &self.config
    }

    /// Aggregate samples into a template without persisting it
    pub fn build_template(
        &self,
        subject_id: &str,
        modality: Modality,
        samples: &[Embedding],
    ) -> Result<Template, EnrollmentError> {
        let floor = self.config.quality_floor(modality);
        let mut valid: Vec<Vec<f32>> = Vec::with_capacity(samples.len());

        for sample in samples {
            if sample.modality != modality {
                return Err(EnrollmentError::ModalityMismatch {
                    expected: modality,
                    actual: sample.modality,
                });
            }
            if sample.quality < floor {
                log::debug!(
                    "Discarding {} sample: quality {:.2} < floor {:.2}",
                    modality,
                    sample.quality,
                    floor
                );
                continue;
            }
            match normalize(&sample.vector) {
                Some(unit) => valid.push(unit),
                None => log::debug!("Discarding zero-norm {} sample", modality),
            }
        }

        if let Some(first) = valid.first() {
            let expected = first.len();
            if let Some(bad) = valid.iter().find(|v| v.len() != expected) {
                return Err(EnrollmentError::DimensionMismatch {
                    expected,
                    actual: bad.len(),
                });
            }
        }

        if valid.len() < self.config.min_samples {
            return Err(EnrollmentError::InsufficientSamples {
                valid: valid.len(),
                required: self.config.min_samples,
            });
        }

        let centroid = mean(&valid).ok_or(EnrollmentError::InsufficientSamples {
            valid: 0,
            required: self.config.min_samples,
        })?;
        let norm = l2_norm(&centroid);
        if norm < self.config.degenerate_epsilon {
            return Err(EnrollmentError::DegenerateTemplate { norm });
        }
        let vector = normalize(&centroid).ok_or(EnrollmentError::DegenerateTemplate { norm })?;

        Ok(Template {
            subject_id: subject_id.to_string(),
            modality,
            vector,
            created_at: Utc::now(),
            sample_count: valid.len(),
        })
    }

    /// Build and persist in one step. Re-enrollment overwrites.
    pub fn enroll(
        &self,
        subject_id: &str,
        modality: Modality,
        samples: &[Embedding],
    ) -> Result<Template, EnrollmentError> {
        let result = self
            .build_template(subject_id, modality, samples)
            .and_then(|template| {
                self.repository.put(&template)?;
                Ok(template)
            });

        match &result {
            Ok(template) => {
                log::info!(
                    "Enrollment complete for '{}' ({}): {} samples, fingerprint {}",
                    subject_id,
                    modality,
                    template.sample_count,
                    template.fingerprint()
                );
                emit(
                    self.events.as_ref(),
                    EventRecord::new(Utc::now(), subject_id, Stage::Enrollment, ReasonCode::Granted)
                        .with_detail(format!("{} fingerprint={}", modality, template.fingerprint())),
                );
            }
            Err(e) => {
                log::warn!("Enrollment failed for '{}' ({}): {}", subject_id, modality, e);
                emit(
                    self.events.as_ref(),
                    EventRecord::new(Utc::now(), subject_id, Stage::Enrollment, e.reason())
                        .with_detail(modality.as_str()),
                );
            }
        }

        result
    }

    /// Start an incremental enrollment, replacing any unfinished one
    pub fn start(&self, subject_id: &str, modality: Modality) -> Result<(), EnrollmentError> {
        let mut pending = self.lock_pending()?;
        if let Some(previous) = pending.take() {
            log::warn!(
                "Discarding unfinished enrollment for '{}'",
                previous.subject_id
            );
        }

        log::info!("Starting {} enrollment for '{}'", modality, subject_id);
        *pending = Some(PendingEnrollment {
            subject_id: subject_id.to_string(),
            modality,
            samples: Vec::new(),
            rejected: 0,
        });
        Ok(())
    }

    pub fn add_sample(&self, sample: Embedding) -> Result<EnrollmentProgress, EnrollmentError> {
        let mut pending = self.lock_pending()?;
        let enrollment = pending.as_mut().ok_or(EnrollmentError::NotStarted)?;

        if sample.modality != enrollment.modality {
            return Err(EnrollmentError::ModalityMismatch {
                expected: enrollment.modality,
                actual: sample.modality,
            });
        }

        let floor = self.config.quality_floor(enrollment.modality);
        if sample.quality < floor || normalize(&sample.vector).is_none() {
            enrollment.rejected += 1;
            log::warn!(
                "Enrollment sample rejected (quality {:.2}, floor {:.2})",
                sample.quality,
                floor
            );
        } else {
            enrollment.samples.push(sample);
        }

        let progress = EnrollmentProgress {
            subject_id: enrollment.subject_id.clone(),
            modality: enrollment.modality,
            collected: enrollment.samples.len(),
            required: self.config.min_samples,
            rejected: enrollment.rejected,
            completed: enrollment.samples.len() >= self.config.min_samples,
        };
        log::info!("Enrollment progress: {}/{}", progress.collected, progress.required);
        Ok(progress)
    }

    /// Aggregate collected samples and persist the template
    pub fn finalize(&self) -> Result<Template, EnrollmentError> {
        let enrollment = self
            .lock_pending()?
            .take()
            .ok_or(EnrollmentError::NotStarted)?;
        self.enroll(
            &enrollment.subject_id,
            enrollment.modality,
            &enrollment.samples,
        )
    }

    pub fn cancel(&self) {
        if let Ok(mut pending) = self.pending.lock() {
            if let Some(enrollment) = pending.take() {
                log::info!("Enrollment cancelled for '{}'", enrollment.subject_id);
            }
        }
    }

    fn lock_pending(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, Option<PendingEnrollment>>, EnrollmentError> {
        self.pending
            .lock()
            .map_err(|_| EnrollmentError::Store(anyhow::anyhow!("Enrollment state lock poisoned")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NullEventSink;
    use crate::store::InMemoryTemplateStore;

    fn manager(config: EnrollmentConfig) -> (EnrollmentManager, Arc<TemplateRepository>) {
        let repo = Arc::new(TemplateRepository::new(Arc::new(InMemoryTemplateStore::new())));
        let manager = EnrollmentManager::new(config, repo.clone(), Arc::new(NullEventSink));
        (manager, repo)
    }

    fn face(vector: Vec<f32>) -> Embedding {
        Embedding::new(Modality::Face, vector)
    }

    #[test]
    fn test_identical_samples_give_normalized_vector() {
        let (manager, _) = manager(EnrollmentConfig::default());
        let v = vec![3.0, 4.0, 0.0];
        let template = manager
            .build_template("alice", Modality::Face, &[face(v.clone()), face(v.clone()), face(v)])
            .unwrap();
        assert!((template.vector[0] - 0.6).abs() < 1e-6);
        assert!((template.vector[1] - 0.8).abs() < 1e-6);
        assert_eq!(template.vector[2], 0.0);
        assert_eq!(template.sample_count, 3);
    }

    #[test]
    fn test_opposing_samples_are_degenerate() {
        let (manager, _) = manager(EnrollmentConfig {
            min_samples: 2,
            ..EnrollmentConfig::default()
        });
        let err = manager
            .build_template(
                "alice",
                Modality::Face,
                &[face(vec![0.5, -0.5, 1.0]), face(vec![-0.5, 0.5, -1.0])],
            )
            .unwrap_err();
        assert!(matches!(err, EnrollmentError::DegenerateTemplate { .. }));
        assert_eq!(err.reason(), ReasonCode::DegenerateTemplate);
    }

    #[test]
    fn test_low_quality_samples_discarded() {
        let (manager, _) = manager(EnrollmentConfig::default());
        let samples = vec![
            face(vec![1.0, 0.0]),
            face(vec![1.0, 0.1]),
            face(vec![0.0, 1.0]).with_quality(0.2),
            face(vec![0.0, 0.0]),
        ];
        let err = manager
            .build_template("alice", Modality::Face, &samples)
            .unwrap_err();
        match err {
            EnrollmentError::InsufficientSamples { valid, required } => {
                assert_eq!(valid, 2);
                assert_eq!(required, 3);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_mixed_modality_and_dimension() {
        let (manager, _) = manager(EnrollmentConfig::default());
        let err = manager
            .build_template(
                "alice",
                Modality::Face,
                &[face(vec![1.0]), Embedding::new(Modality::Voice, vec![1.0])],
            )
            .unwrap_err();
        assert!(matches!(err, EnrollmentError::ModalityMismatch { .. }));

        let err = manager
            .build_template(
                "alice",
                Modality::Face,
                &[face(vec![1.0, 0.0]), face(vec![1.0, 0.0]), face(vec![1.0])],
            )
            .unwrap_err();
        assert!(matches!(err, EnrollmentError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_enroll_persists_and_overwrites() {
        let (manager, repo) = manager(EnrollmentConfig::default());
        let first = vec![face(vec![1.0, 0.0]); 3];
        manager.enroll("alice", Modality::Face, &first).unwrap();

        let second = vec![face(vec![0.0, 2.0]); 3];
        manager.enroll("alice", Modality::Face, &second).unwrap();

        let stored = repo.template("alice", Modality::Face).unwrap().unwrap();
        assert_eq!(stored.vector, vec![0.0, 1.0]);
        assert_eq!(repo.templates(Modality::Face, false).unwrap().len(), 1);
    }

    #[test]
    fn test_incremental_session() {
        let (manager, repo) = manager(EnrollmentConfig::default());
        assert!(matches!(
            manager.add_sample(face(vec![1.0])),
            Err(EnrollmentError::NotStarted)
        ));

        manager.start("bob", Modality::Voice).unwrap();
        let voice = |v: Vec<f32>| Embedding::new(Modality::Voice, v);

        let p = manager.add_sample(voice(vec![0.0, 1.0])).unwrap();
        assert_eq!((p.collected, p.required, p.completed), (1, 3, false));

        let p = manager.add_sample(voice(vec![0.0, 1.0]).with_quality(0.05)).unwrap();
        assert_eq!((p.collected, p.rejected), (1, 1));

        assert!(manager.add_sample(face(vec![1.0, 0.0])).is_err());

        manager.add_sample(voice(vec![0.1, 1.0])).unwrap();
        let p = manager.add_sample(voice(vec![-0.1, 1.0])).unwrap();
        assert!(p.completed);

        let template = manager.finalize().unwrap();
        assert_eq!(template.sample_count, 3);
        assert!(repo.template("bob", Modality::Voice).unwrap().is_some());
        assert!(matches!(manager.finalize(), Err(EnrollmentError::NotStarted)));
    }

    #[test]
    fn test_cancel_discards_samples() {
        let (manager, repo) = manager(EnrollmentConfig::default());
        manager.start("carol", Modality::Face).unwrap();
        manager.add_sample(face(vec![1.0, 0.0])).unwrap();
        manager.cancel();
        assert!(matches!(manager.finalize(), Err(EnrollmentError::NotStarted)));
        assert!(repo.template("carol", Modality::Face).unwrap().is_none());
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use crate::embedding::l2_norm;
    use crate::events::NullEventSink;
    use crate::store::InMemoryTemplateStore;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn template_is_unit_length(samples in prop::collection::vec(prop::collection::vec(0.1f32..1.0, 8), 3..6)) {
            let repo = Arc::new(TemplateRepository::new(Arc::new(InMemoryTemplateStore::new())));
            let manager = EnrollmentManager::new(EnrollmentConfig::default(), repo, Arc::new(NullEventSink));
            let embeddings: Vec<Embedding> = samples
                .into_iter()
                .map(|v| Embedding::new(Modality::Face, v))
                .collect();
            let template = manager.build_template("p", Modality::Face, &embeddings).unwrap();
            prop_assert!((l2_norm(&template.vector) - 1.0).abs() < 1e-4);
        }
    }
}
