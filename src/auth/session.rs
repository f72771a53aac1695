//! One authentication attempt, end to end
//!
//! cancel check -> face templates -> [camera] liveness burst -> voting ->
//! [camera released] -> voice for the face-selected subject only ->
//! combiner -> decision. Every exit path yields an [`AuthDecision`].

use super::combiner::{AuthDecision, FaceOutcome, MultiFactorCombiner, PolicyMode};
use super::matcher::{MatchOutcome, Observation, SimilarityMatcher};
use super::voting::{VoteOutcome, VotingStateMachine};
use crate::config::AppConfig;
use crate::embedding::{Embedding, EmbeddingProvider, Modality};
use crate::error::{AuthError, ReasonCode};
use crate::events::{emit, EventRecord, EventSink, Stage};
use crate::sampling::{CancellationToken, Clock, Sample, SamplingGuard, SamplingSource, SystemClock};
use crate::store::{Template, TemplateRepository, TemplateSet};
use crate::validation::ValidationError;
use crate::vision::{blink_score, EyeLandmarkProvider, EyePair, GrayRegion, LivenessAnalyzer, LivenessReport};
use crate::voice::{analyze_clip, pick_phrase, AudioClip};
use anyhow::Result;
use chacha20poly1305::aead::OsRng;
use chrono::{DateTime, Duration, Utc};
use rand_core::RngCore;
use std::sync::Arc;

pub struct Authenticator {
    config: AppConfig,
    repository: Arc<TemplateRepository>,
    face_provider: Arc<dyn EmbeddingProvider<GrayRegion>>,
    voice_provider: Arc<dyn EmbeddingProvider<AudioClip>>,
    landmarks: Option<Arc<dyn EyeLandmarkProvider>>,
    events: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    liveness: LivenessAnalyzer,
    matcher: SimilarityMatcher,
    combiner: MultiFactorCombiner,
}

impl Authenticator {
    pub fn new(
        config: AppConfig,
        repository: Arc<TemplateRepository>,
        face_provider: Arc<dyn EmbeddingProvider<GrayRegion>>,
        voice_provider: Arc<dyn EmbeddingProvider<AudioClip>>,
        events: Arc<dyn EventSink>,
    ) -> Result<Self, ValidationError> {
        config.validate()?;
        if face_provider.modality() != Modality::Face || voice_provider.modality() != Modality::Voice {
            log::warn!("Embedding providers report unexpected modalities");
        }
        Ok(Self {
            liveness: LivenessAnalyzer::new(config.liveness.clone()),
            matcher: SimilarityMatcher::new(config.matcher.clone()),
            combiner: MultiFactorCombiner::new(config.policy.clone()),
            config,
            repository,
            face_provider,
            voice_provider,
            landmarks: None,
            events,
            clock: Arc::new(SystemClock),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Enable the blink signal
    pub fn with_landmarks(mut self, landmarks: Arc<dyn EyeLandmarkProvider>) -> Self {
        self.landmarks = Some(landmarks);
        self
    }

    /// Score texture against a calibrated live-skin region
    pub fn with_liveness_reference(mut self, reference: &GrayRegion) -> Self {
        self.liveness = self.liveness.with_reference(reference);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Drop cached template sets so the next session reads the store
    pub fn reload_templates(&self) -> Result<()> {
        for modality in Modality::ALL {
            self.repository.templates(modality, true)?;
        }
        Ok(())
    }

    pub fn authenticate(
        &self,
        camera: &mut dyn SamplingSource<GrayRegion>,
        microphone: &mut dyn SamplingSource<AudioClip>,
        cancel: &CancellationToken,
    ) -> AuthDecision {
        self.authenticate_with_mode(self.config.policy.mode, camera, microphone, cancel)
    }

    pub fn authenticate_with_mode(
        &self,
        mode: PolicyMode,
        camera: &mut dyn SamplingSource<GrayRegion>,
        microphone: &mut dyn SamplingSource<AudioClip>,
        cancel: &CancellationToken,
    ) -> AuthDecision {
        let session_id = new_session_id();
        log::info!("Authentication session {} started [{}]", session_id, mode);
        self.event(&session_id, Stage::SessionStart, ReasonCode::Granted, Some(mode.as_str().to_string()));

        let decision = self.run(&session_id, mode, camera, microphone, cancel);

        log::info!(
            "Session {} finished: granted={} reason={}",
            session_id,
            decision.granted,
            decision.reason
        );
        self.event(
            &session_id,
            Stage::Decision,
            decision.reason,
            Some(format!(
                "subject={} combined={:.3}",
                decision.subject_id.as_deref().unwrap_or("-"),
                decision.combined_score
            )),
        );
        decision
    }

    fn run(
        &self,
        session_id: &str,
        mode: PolicyMode,
        camera: &mut dyn SamplingSource<GrayRegion>,
        microphone: &mut dyn SamplingSource<AudioClip>,
        cancel: &CancellationToken,
    ) -> AuthDecision {
        if cancel.is_cancelled() {
            log::info!("Session {} cancelled before sampling", session_id);
            return AuthDecision::denied(ReasonCode::Cancelled, mode, self.clock.now());
        }

        let templates = match self.repository.templates(Modality::Face, false) {
            Ok(templates) => templates,
            Err(e) => {
                log::error!("Failed to load face templates: {:#}", e);
                return AuthDecision::denied(ReasonCode::StoreError, mode, self.clock.now());
            }
        };
        if templates.is_empty() {
            log::warn!("{}", AuthError::NoTemplatesEnrolled(Modality::Face));
            return AuthDecision::denied(ReasonCode::NoTemplates, mode, self.clock.now());
        }

        let face = self.face_stage(session_id, camera, &templates, cancel);
        match &face {
            FaceOutcome::Accepted { subject_id, score } => self.event(
                session_id,
                Stage::FaceOutcome,
                ReasonCode::Granted,
                Some(format!("subject={} score={:.3}", subject_id, score)),
            ),
            FaceOutcome::Rejected { reason, .. } => {
                self.event(session_id, Stage::FaceOutcome, *reason, None)
            }
        }

        if matches!(face, FaceOutcome::Accepted { .. }) && cancel.is_cancelled() {
            log::info!("Session {} cancelled before voice stage", session_id);
            return AuthDecision::denied(ReasonCode::Cancelled, mode, self.clock.now());
        }

        self.combiner.decide_with_mode(
            mode,
            &face,
            |subject_id| self.voice_stage(session_id, subject_id, microphone, cancel),
            self.clock.now(),
        )
    }

    /// Camera is held only inside this function
    fn face_stage(
        &self,
        session_id: &str,
        camera: &mut dyn SamplingSource<GrayRegion>,
        templates: &TemplateSet,
        cancel: &CancellationToken,
    ) -> FaceOutcome {
        let mut guard = match SamplingGuard::<GrayRegion, _>::acquire(&mut *camera, "camera") {
            Ok(guard) => guard,
            Err(e) => return rejected(e.reason(), None),
        };

        let report = self.liveness_burst(&mut guard);
        self.event(
            session_id,
            Stage::Liveness,
            if report.pass {
                ReasonCode::Granted
            } else {
                ReasonCode::LivenessFailed
            },
            Some(format!("aggregate={:.3}", report.aggregate_score)),
        );
        if !report.pass {
            return rejected(ReasonCode::LivenessFailed, None);
        }

        let voting = self.config.voting.clone();
        let threshold = voting.match_threshold;
        let mut vsm = VotingStateMachine::new(voting);
        let started = self.clock.now();
        let deadline = deadline_after(started, self.config.session.timeout_ms);
        if deadline.is_none() {
            log::warn!(
                "Session timeout of {}ms is out of range; voting bounded by trial budget only",
                self.config.session.timeout_ms
            );
        }
        vsm.start(started, deadline);

        while !vsm.phase().is_terminal() {
            if cancel.is_cancelled() {
                vsm.cancel();
                log::info!("Session {} cancelled during face voting", session_id);
                return rejected(ReasonCode::Cancelled, None);
            }

            let sample = guard.next_sample();
            let now = self.clock.now();
            if vsm.check_deadline(now).is_terminal() {
                break;
            }

            let observation = match sample {
                Sample::NoData => {
                    log::debug!("Camera returned no data");
                    None
                }
                Sample::Data(region) => self.observe_face(&region, templates, threshold, now),
            };
            vsm.tick(observation.as_ref(), now);

            let (outcome, detail) = match &observation {
                None => (ReasonCode::DetectionFailure, format!("trial={}", vsm.state().trials)),
                Some(obs) => (
                    if obs.score >= threshold {
                        ReasonCode::Granted
                    } else {
                        ReasonCode::NoMatch
                    },
                    format!(
                        "trial={} candidate={} score={:.3} count={}",
                        vsm.state().trials,
                        obs.candidate_id,
                        obs.score,
                        vsm.state().consecutive_matches
                    ),
                ),
            };
            self.event(session_id, Stage::FaceVote, outcome, Some(detail));
        }

        match vsm.outcome() {
            Some(VoteOutcome::Accepted {
                candidate, score, ..
            }) => FaceOutcome::Accepted {
                subject_id: candidate,
                score,
            },
            Some(VoteOutcome::Rejected { best, .. }) => {
                let best_score = best.map(|b| b.score);
                let reason = if best_score.map_or(false, |s| s >= threshold) {
                    ReasonCode::VotesNotReached
                } else {
                    ReasonCode::NoMatch
                };
                rejected(reason, best_score)
            }
            Some(VoteOutcome::TimedOut { best, .. }) => {
                rejected(ReasonCode::Timeout, best.map(|b| b.score))
            }
            None => rejected(ReasonCode::VotesNotReached, None),
        }
    }

    fn liveness_burst<S: SamplingSource<GrayRegion> + ?Sized>(
        &self,
        guard: &mut SamplingGuard<'_, GrayRegion, S>,
    ) -> LivenessReport {
        let frames = self.config.liveness.burst_frames;
        let mut burst = Vec::with_capacity(frames);
        for _ in 0..frames {
            match guard.next_sample() {
                Sample::Data(region) => burst.push(region),
                Sample::NoData => {
                    log::warn!("Liveness burst incomplete: camera returned no data");
                    return LivenessReport::failed();
                }
            }
        }

        let blink = self.landmarks.as_ref().and_then(|landmarks| {
            let eyes: Vec<EyePair> = burst.iter().filter_map(|r| landmarks.locate(r)).collect();
            if eyes.is_empty() {
                None
            } else {
                Some(blink_score(&eyes, self.config.liveness.blink_ear_threshold))
            }
        });

        self.liveness.analyze(&burst, blink)
    }

    fn observe_face(
        &self,
        region: &GrayRegion,
        templates: &TemplateSet,
        threshold: f32,
        now: DateTime<Utc>,
    ) -> Option<Observation> {
        if region.is_empty() {
            log::debug!("{}", AuthError::DetectionFailure);
            return None;
        }

        let Some(vector) = self.face_provider.embed(region) else {
            log::debug!("{}", AuthError::DetectionFailure);
            return None;
        };
        let live = Embedding::new(Modality::Face, vector).captured_at(now);

        // Below-threshold ticks still reach the voting machine, which resets on them
        match self.matcher.best_match(&live, templates, threshold) {
            Ok(MatchOutcome::Matched(best)) | Ok(MatchOutcome::NoMatch { best }) => Some(Observation {
                candidate_id: best.subject_id,
                score: best.score,
                modality: Modality::Face,
                timestamp: now,
            }),
            Ok(MatchOutcome::NoTemplates) => None,
            Err(e) => {
                log::error!("Face match failed: {}", e);
                None
            }
        }
    }

    /// Microphone is held only inside this function
    fn voice_stage(
        &self,
        session_id: &str,
        subject_id: &str,
        microphone: &mut dyn SamplingSource<AudioClip>,
        cancel: &CancellationToken,
    ) -> Result<f32, AuthError> {
        let template = match self.repository.template(subject_id, Modality::Voice) {
            Ok(Some(template)) => template,
            Ok(None) => {
                log::warn!("No voice template for '{}'", subject_id);
                return Err(AuthError::NoTemplatesEnrolled(Modality::Voice));
            }
            Err(e) => {
                return Err(AuthError::ResourceUnavailable(format!(
                    "template store: {:#}",
                    e
                )))
            }
        };

        let mut guard = SamplingGuard::<AudioClip, _>::acquire(&mut *microphone, "microphone")?;

        if self.config.session.challenge_enabled {
            if let Some(phrase) = pick_phrase(&self.config.session.challenge_phrases) {
                guard.prompt(phrase);
                self.event(session_id, Stage::Challenge, ReasonCode::Granted, Some(phrase.to_string()));
            }
        }

        let attempts = self.config.session.voice_attempts.max(1);
        let mut last_error = AuthError::SignalTooWeak("no attempt made".to_string());

        for attempt in 1..=attempts {
            if cancel.is_cancelled() {
                return Err(AuthError::Cancelled);
            }

            let result = match guard.next_sample() {
                Sample::NoData => Err(AuthError::SignalTooWeak("no audio captured".to_string())),
                Sample::Data(clip) => self.score_clip(&clip, &template),
            };

            match result {
                Ok(score) => {
                    log::info!(
                        "Voice score for '{}': {:.3} (attempt {}/{})",
                        subject_id,
                        score,
                        attempt,
                        attempts
                    );
                    return Ok(score);
                }
                Err(e) if e.is_recoverable() => {
                    log::info!("Voice attempt {}/{} unusable: {}", attempt, attempts, e);
                    self.event(session_id, Stage::VoiceAttempt, e.reason(), Some(e.to_string()));
                    last_error = e;
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error)
    }

    fn score_clip(&self, clip: &AudioClip, template: &Template) -> Result<f32, AuthError> {
        let report = analyze_clip(clip, &self.config.signal);
        if let Some(weakness) = report.weakness {
            return Err(AuthError::SignalTooWeak(weakness));
        }

        let vector = self
            .voice_provider
            .embed(clip)
            .ok_or(AuthError::DetectionFailure)?;
        let live = Embedding::new(Modality::Voice, vector).with_quality(report.quality);

        self.matcher.verify(&live, template).map_err(|e| {
            log::error!("Voice match failed: {}", e);
            AuthError::DetectionFailure
        })
    }

    fn event(&self, session_id: &str, stage: Stage, outcome: ReasonCode, detail: Option<String>) {
        let mut record = EventRecord::new(self.clock.now(), session_id, stage, outcome);
        record.detail = detail;
        emit(self.events.as_ref(), record);
    }
}

fn rejected(reason: ReasonCode, best_score: Option<f32>) -> FaceOutcome {
    FaceOutcome::Rejected { reason, best_score }
}

/// `None` when the timeout does not fit the calendar
fn deadline_after(start: DateTime<Utc>, timeout_ms: u64) -> Option<DateTime<Utc>> {
    i64::try_from(timeout_ms)
        .ok()
        .and_then(Duration::try_milliseconds)
        .and_then(|timeout| start.checked_add_signed(timeout))
}

fn new_session_id() -> String {
    let mut bytes = [0u8; 8];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
