//! Template persistence
//!
//! Templates are the canonical per-(subject, modality) vectors produced by
//! enrollment. Stores only persist them; caching and reload live in
//! [`TemplateRepository`].

pub mod encrypted;
pub mod memory;
pub mod repository;

use crate::embedding::Modality;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

pub use encrypted::EncryptedFileStore;
pub use memory::InMemoryTemplateStore;
pub use repository::{TemplateRepository, TemplateSet};

/// Canonical enrolled vector for one subject and modality. Immutable once
/// created; re-enrollment replaces it wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub subject_id: String,
    pub modality: Modality,
    pub vector: Vec<f32>,
    pub created_at: DateTime<Utc>,
    pub sample_count: usize,
}

impl Template {
    pub fn dim(&self) -> usize {
        self.vector.len()
    }

    /// Short SHA-256 digest of the vector, safe to log
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for value in &self.vector {
            hasher.update(value.to_le_bytes());
        }
        let digest = hex::encode(hasher.finalize());
        digest[..16].to_string()
    }
}

/// Persistent template storage keyed by (subject, modality)
pub trait TemplateStore: Send + Sync {
    fn get(&self, subject_id: &str, modality: Modality) -> Result<Option<Template>>;

    /// Insert or fully overwrite the template
    fn put(&self, template: &Template) -> Result<()>;

    fn list(&self, modality: Modality) -> Result<BTreeSet<String>>;

    /// Returns `true` if a template was removed
    fn delete(&self, subject_id: &str, modality: Modality) -> Result<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(vector: Vec<f32>) -> Template {
        Template {
            subject_id: "alice".to_string(),
            modality: Modality::Face,
            vector,
            created_at: Utc::now(),
            sample_count: 3,
        }
    }

    #[test]
    fn test_fingerprint_stable_and_distinct() {
        let a = template(vec![0.6, 0.8]);
        let b = template(vec![0.8, 0.6]);
        assert_eq!(a.fingerprint(), a.clone().fingerprint());
        assert_eq!(a.fingerprint().len(), 16);
        assert_ne!(a.fingerprint(), b.fingerprint());
    }
}
