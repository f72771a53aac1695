//! Authentication core: matching, temporal voting, factor combination and
//! the session that drives them

pub mod combiner;
pub mod matcher;
pub mod session;
pub mod voting;

pub use combiner::{AuthDecision, FaceOutcome, MultiFactorCombiner, PolicyBundle, PolicyConfig, PolicyMode};
pub use matcher::{Candidate, MatchError, MatchOutcome, MatcherConfig, Observation, Ranking, SimilarityMatcher};
pub use session::Authenticator;
pub use voting::{VoteOutcome, VotingParams, VotingPhase, VotingState, VotingStateMachine};
