//! Ember Gate: local face + voice multi-factor access control
//!
//! Liveness gates face matching, temporal voting turns per-cycle matches into
//! a stable face outcome, and the combiner blends it with a voice score for
//! the same subject under a named policy.

pub mod auth;
pub mod config;
pub mod embedding;
pub mod enrollment;
pub mod error;
pub mod events;
pub mod paths;
pub mod preflight;
pub mod sampling;
pub mod store;
pub mod validation;
pub mod vision;
pub mod voice;

pub use auth::{AuthDecision, Authenticator, PolicyMode};
pub use config::AppConfig;
pub use embedding::{Embedding, EmbeddingProvider, Modality};
pub use error::{AuthError, EnrollmentError, ReasonCode};
