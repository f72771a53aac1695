//! Similarity matcher: one live embedding against a template set
//!
//! Ranking is by cosine similarity, descending, ties broken by the smaller
//! subject id so the order never depends on storage or thread scheduling.

use crate::embedding::{cosine_similarity, Embedding, Modality};
use crate::store::{Template, TemplateSet};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatcherConfig {
    /// Template sets at least this large are scored on the rayon pool
    pub parallel_threshold: usize,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            parallel_threshold: 256,
        }
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum MatchError {
    #[error("Cannot compare {live} embedding against {templates} templates")]
    ModalityMismatch { live: Modality, templates: Modality },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub subject_id: String,
    pub score: f32,
}

/// One comparison result fed to the voting state machine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub candidate_id: String,
    pub score: f32,
    pub modality: Modality,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Ranking {
    /// Nothing enrolled for this modality
    NoTemplates,
    /// Non-empty, best first
    Ranked(Vec<Candidate>),
}

impl Ranking {
    pub fn best(&self) -> Option<&Candidate> {
        match self {
            Ranking::NoTemplates => None,
            Ranking::Ranked(candidates) => candidates.first(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    NoTemplates,
    /// Best candidate scored below the threshold
    NoMatch { best: Candidate },
    Matched(Candidate),
}

pub struct SimilarityMatcher {
    config: MatcherConfig,
}

impl SimilarityMatcher {
    pub fn new(config: MatcherConfig) -> Self {
        Self { config }
    }

    /// Rank every template in `templates` against `live`
    pub fn rank(&self, live: &Embedding, templates: &TemplateSet) -> Result<Ranking, MatchError> {
        if live.modality != templates.modality() {
            return Err(MatchError::ModalityMismatch {
                live: live.modality,
                templates: templates.modality(),
            });
        }

        if templates.is_empty() {
            return Ok(Ranking::NoTemplates);
        }

        let entries: Vec<&Template> = templates.iter().collect();
        let mut candidates: Vec<Candidate> = if entries.len() >= self.config.parallel_threshold {
            entries.par_iter().map(|t| score(&live.vector, t)).collect()
        } else {
            entries.iter().map(|t| score(&live.vector, t)).collect()
        };

        candidates.sort_by(rank_order);
        Ok(Ranking::Ranked(candidates))
    }

    /// Best candidate against `threshold`
    pub fn best_match(
        &self,
        live: &Embedding,
        templates: &TemplateSet,
        threshold: f32,
    ) -> Result<MatchOutcome, MatchError> {
        let outcome = match self.rank(live, templates)? {
            Ranking::NoTemplates => MatchOutcome::NoTemplates,
            Ranking::Ranked(mut candidates) => {
                if candidates.is_empty() {
                    MatchOutcome::NoTemplates
                } else {
                    let best = candidates.swap_remove(0);
                    if best.score >= threshold {
                        MatchOutcome::Matched(best)
                    } else {
                        MatchOutcome::NoMatch { best }
                    }
                }
            }
        };
        Ok(outcome)
    }

    /// Score `live` against a single subject's template (voice stage)
    pub fn verify(&self, live: &Embedding, template: &Template) -> Result<f32, MatchError> {
        if live.modality != template.modality {
            return Err(MatchError::ModalityMismatch {
                live: live.modality,
                templates: template.modality,
            });
        }
        if live.dim() != template.dim() {
            log::warn!(
                "Dimension mismatch for '{}': live {} vs template {}",
                template.subject_id,
                live.dim(),
                template.dim()
            );
        }
        Ok(cosine_similarity(&live.vector, &template.vector))
    }
}

fn score(live: &[f32], template: &Template) -> Candidate {
    if template.dim() != live.len() {
        log::warn!(
            "Template '{}' has dimension {}, live embedding {}",
            template.subject_id,
            template.dim(),
            live.len()
        );
    }
    Candidate {
        subject_id: template.subject_id.clone(),
        score: cosine_similarity(live, &template.vector),
    }
}

fn rank_order(a: &Candidate, b: &Candidate) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.subject_id.cmp(&b.subject_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(subject: &str, modality: Modality, vector: Vec<f32>) -> Template {
        Template {
            subject_id: subject.to_string(),
            modality,
            vector,
            created_at: Utc::now(),
            sample_count: 3,
        }
    }

    fn face_set(entries: Vec<(&str, Vec<f32>)>) -> TemplateSet {
        TemplateSet::new(
            Modality::Face,
            entries
                .into_iter()
                .map(|(s, v)| template(s, Modality::Face, v)),
        )
    }

    #[test]
    fn test_empty_set_is_no_templates() {
        let matcher = SimilarityMatcher::new(MatcherConfig::default());
        let live = Embedding::new(Modality::Face, vec![1.0, 0.0]);
        let set = face_set(vec![]);
        assert_eq!(matcher.rank(&live, &set).unwrap(), Ranking::NoTemplates);
        assert_eq!(
            matcher.best_match(&live, &set, 0.7).unwrap(),
            MatchOutcome::NoTemplates
        );
    }

    #[test]
    fn test_ranking_descending_with_tie_break() {
        let matcher = SimilarityMatcher::new(MatcherConfig::default());
        let live = Embedding::new(Modality::Face, vec![1.0, 0.0]);
        let set = face_set(vec![
            ("carol", vec![0.0, 1.0]),
            ("bob", vec![1.0, 0.0]),
            ("alice", vec![2.0, 0.0]),
        ]);

        let Ranking::Ranked(candidates) = matcher.rank(&live, &set).unwrap() else {
            panic!("expected ranked candidates");
        };
        let ids: Vec<&str> = candidates.iter().map(|c| c.subject_id.as_str()).collect();
        assert_eq!(ids, vec!["alice", "bob", "carol"]);
        assert!((candidates[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_no_match_below_threshold() {
        let matcher = SimilarityMatcher::new(MatcherConfig::default());
        let live = Embedding::new(Modality::Face, vec![1.0, 1.0]);
        let set = face_set(vec![("alice", vec![1.0, 0.0])]);

        match matcher.best_match(&live, &set, 0.9).unwrap() {
            MatchOutcome::NoMatch { best } => {
                assert_eq!(best.subject_id, "alice");
                assert!((best.score - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-4);
            }
            other => panic!("expected NoMatch, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_norm_live_scores_zero() {
        let matcher = SimilarityMatcher::new(MatcherConfig::default());
        let live = Embedding::new(Modality::Face, vec![0.0, 0.0]);
        let set = face_set(vec![("alice", vec![1.0, 0.0])]);
        let ranking = matcher.rank(&live, &set).unwrap();
        assert_eq!(ranking.best().unwrap().score, 0.0);
    }

    #[test]
    fn test_modality_mismatch() {
        let matcher = SimilarityMatcher::new(MatcherConfig::default());
        let live = Embedding::new(Modality::Voice, vec![1.0, 0.0]);
        let set = face_set(vec![("alice", vec![1.0, 0.0])]);
        assert!(matcher.rank(&live, &set).is_err());

        let voice = template("alice", Modality::Voice, vec![0.0, 1.0]);
        assert_eq!(matcher.verify(&live, &voice).unwrap(), 0.0);
        let face = template("alice", Modality::Face, vec![0.0, 1.0]);
        assert!(matcher.verify(&live, &face).is_err());
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let entries: Vec<(String, Vec<f32>)> = (0..300)
            .map(|i| {
                let angle = (i % 37) as f32 * 0.1;
                (format!("s{:03}", i), vec![angle.cos(), angle.sin(), 0.1])
            })
            .collect();
        let set = TemplateSet::new(
            Modality::Face,
            entries
                .iter()
                .map(|(s, v)| template(s, Modality::Face, v.clone())),
        );
        let live = Embedding::new(Modality::Face, vec![0.8, 0.6, 0.0]);

        let sequential = SimilarityMatcher::new(MatcherConfig {
            parallel_threshold: usize::MAX,
        });
        let parallel = SimilarityMatcher::new(MatcherConfig {
            parallel_threshold: 16,
        });

        let expected = sequential.rank(&live, &set).unwrap();
        let ranked = parallel.rank(&live, &set).unwrap();
        assert_eq!(expected, ranked);
        let Ranking::Ranked(candidates) = ranked else {
            panic!("expected ranked candidates");
        };
        // Every template is scored, none dropped
        assert_eq!(candidates.len(), 300);
    }
}
