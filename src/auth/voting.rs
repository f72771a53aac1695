//! Temporal voting: debounces noisy per-cycle matches into one outcome
//!
//! IDLE -> SAMPLING -> {ACCEPTED, REJECTED, TIMED_OUT}. One tick per
//! sampling cycle. A run of `required_votes` consecutive matches for the same
//! candidate, each within `max_inter_vote_gap_ms` of the previous one,
//! accepts. Exhausting `trial_budget` rejects; an elapsed deadline times out.

use super::matcher::{Candidate, Observation};
use crate::validation::{validate_similarity_threshold, validate_votes, ValidationError};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VotingParams {
    /// R: consecutive matches needed to accept
    pub required_votes: u32,
    /// T: total ticks allowed (T >= R)
    pub trial_budget: u32,
    /// G: longest gap between two votes of one run
    pub max_inter_vote_gap_ms: u64,
    /// Similarity a tick must reach to count as a vote
    pub match_threshold: f32,
}

impl Default for VotingParams {
    fn default() -> Self {
        Self {
            required_votes: 3,
            trial_budget: 5,
            max_inter_vote_gap_ms: 3000,
            match_threshold: 0.70,
        }
    }
}

impl VotingParams {
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_votes(self.required_votes, self.trial_budget)?;
        validate_similarity_threshold("Match threshold", self.match_threshold)?;
        Ok(())
    }

    fn max_gap(&self) -> Duration {
        Duration::milliseconds(self.max_inter_vote_gap_ms.min(i64::MAX as u64) as i64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VotingPhase {
    Idle,
    Sampling,
    Accepted,
    Rejected,
    TimedOut,
}

impl VotingPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            VotingPhase::Accepted | VotingPhase::Rejected | VotingPhase::TimedOut
        )
    }
}

/// Per-session vote bookkeeping. Never shared between sessions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VotingState {
    pub consecutive_matches: u32,
    pub last_match_time: Option<DateTime<Utc>>,
    /// Candidate the current run belongs to
    pub candidate: Option<String>,
    run_scores: Vec<f32>,
    pub trials: u32,
    best: Option<Candidate>,
}

impl VotingState {
    fn reset_run(&mut self) {
        self.consecutive_matches = 0;
        self.last_match_time = None;
        self.candidate = None;
        self.run_scores.clear();
    }

    fn start_run(&mut self, observation: &Observation) {
        self.consecutive_matches = 1;
        self.candidate = Some(observation.candidate_id.clone());
        self.run_scores.clear();
        self.run_scores.push(observation.score);
        self.last_match_time = Some(observation.timestamp);
    }

    fn record_best(&mut self, observation: &Observation) {
        let better = self
            .best
            .as_ref()
            .map_or(true, |b| observation.score > b.score);
        if better {
            self.best = Some(Candidate {
                subject_id: observation.candidate_id.clone(),
                score: observation.score,
            });
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum VoteOutcome {
    Accepted {
        candidate: String,
        /// Mean score of the accepted run
        score: f32,
        votes: u32,
        trials: u32,
    },
    Rejected {
        trials: u32,
        best: Option<Candidate>,
    },
    TimedOut {
        trials: u32,
        best: Option<Candidate>,
    },
}

pub struct VotingStateMachine {
    params: VotingParams,
    phase: VotingPhase,
    state: VotingState,
    deadline: Option<DateTime<Utc>>,
}

impl VotingStateMachine {
    pub fn new(params: VotingParams) -> Self {
        Self {
            params,
            phase: VotingPhase::Idle,
            state: VotingState::default(),
            deadline: None,
        }
    }

    pub fn phase(&self) -> VotingPhase {
        self.phase
    }

    pub fn state(&self) -> &VotingState {
        &self.state
    }

    pub fn params(&self) -> &VotingParams {
        &self.params
    }

    /// Enter SAMPLING with a fresh state. `deadline` is optional.
    pub fn start(&mut self, now: DateTime<Utc>, deadline: Option<DateTime<Utc>>) {
        self.state = VotingState::default();
        self.deadline = deadline;
        self.phase = VotingPhase::Sampling;
        log::debug!(
            "Voting started at {} (R={}, T={}, G={}ms)",
            now,
            self.params.required_votes,
            self.params.trial_budget,
            self.params.max_inter_vote_gap_ms
        );
    }

    /// Check the external deadline without consuming a trial
    pub fn check_deadline(&mut self, now: DateTime<Utc>) -> VotingPhase {
        if self.phase == VotingPhase::Sampling {
            if let Some(deadline) = self.deadline {
                if now >= deadline {
                    self.phase = VotingPhase::TimedOut;
                    log::info!("Voting timed out after {} trials", self.state.trials);
                }
            }
        }
        self.phase
    }

    /// Feed one cycle. `None` means the cycle produced no usable sample
    /// (no data, no detection); it spends a trial without touching the run.
    pub fn tick(&mut self, observation: Option<&Observation>, now: DateTime<Utc>) -> VotingPhase {
        match self.phase {
            VotingPhase::Sampling => {}
            VotingPhase::Idle => {
                log::warn!("Voting tick ignored: machine not started");
                return self.phase;
            }
            terminal => return terminal,
        }

        if self.check_deadline(now) == VotingPhase::TimedOut {
            return self.phase;
        }

        self.state.trials += 1;

        match observation {
            None => {
                log::debug!("Vote tick {}: no sample", self.state.trials);
            }
            Some(obs) if obs.score >= self.params.match_threshold => {
                self.state.record_best(obs);
                let same_candidate =
                    self.state.candidate.as_deref() == Some(obs.candidate_id.as_str());
                match self.state.last_match_time {
                    Some(last) if same_candidate => {
                        if obs.timestamp - last > self.params.max_gap() {
                            log::debug!("Vote gap exceeded for '{}', restarting run", obs.candidate_id);
                            self.state.start_run(obs);
                        } else {
                            self.state.consecutive_matches += 1;
                            self.state.run_scores.push(obs.score);
                            self.state.last_match_time = Some(obs.timestamp);
                        }
                    }
                    _ => self.state.start_run(obs),
                }
                log::debug!(
                    "Vote tick {}: '{}' score={:.3} count={}",
                    self.state.trials,
                    obs.candidate_id,
                    obs.score,
                    self.state.consecutive_matches
                );
            }
            Some(obs) => {
                self.state.record_best(obs);
                self.state.reset_run();
                log::debug!(
                    "Vote tick {}: best '{}' score={:.3} below threshold, count=0",
                    self.state.trials,
                    obs.candidate_id,
                    obs.score
                );
            }
        }

        let accepted = match self.state.candidate.as_deref() {
            Some(candidate) if self.state.consecutive_matches >= self.params.required_votes => {
                log::info!(
                    "Voting accepted '{}' after {} trials",
                    candidate,
                    self.state.trials
                );
                true
            }
            _ => false,
        };

        if accepted {
            self.phase = VotingPhase::Accepted;
        } else if self.state.trials >= self.params.trial_budget {
            self.phase = VotingPhase::Rejected;
            log::info!("Voting rejected: trial budget of {} exhausted", self.params.trial_budget);
        }

        self.phase
    }

    /// Abort the session; no partial vote state survives
    pub fn cancel(&mut self) {
        self.state = VotingState::default();
        self.deadline = None;
        self.phase = VotingPhase::Idle;
    }

    /// Terminal outcome, once one is reached
    pub fn outcome(&self) -> Option<VoteOutcome> {
        match self.phase {
            VotingPhase::Accepted => {
                let votes = self.state.consecutive_matches;
                let scores = &self.state.run_scores;
                let score = if scores.is_empty() {
                    0.0
                } else {
                    scores.iter().sum::<f32>() / scores.len() as f32
                };
                Some(VoteOutcome::Accepted {
                    candidate: self.state.candidate.clone().unwrap_or_default(),
                    score,
                    votes,
                    trials: self.state.trials,
                })
            }
            VotingPhase::Rejected => Some(VoteOutcome::Rejected {
                trials: self.state.trials,
                best: self.state.best.clone(),
            }),
            VotingPhase::TimedOut => Some(VoteOutcome::TimedOut {
                trials: self.state.trials,
                best: self.state.best.clone(),
            }),
            VotingPhase::Idle | VotingPhase::Sampling => None,
        }
    }
}
