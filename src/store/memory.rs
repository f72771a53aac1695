use super::{Template, TemplateStore};
use crate::embedding::Modality;
use anyhow::{anyhow, Result};
use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

/// Process-local store, used for tests and ephemeral deployments
#[derive(Debug, Default)]
pub struct InMemoryTemplateStore {
    templates: Mutex<HashMap<(String, Modality), Template>>,
}

impl InMemoryTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TemplateStore for InMemoryTemplateStore {
    fn get(&self, subject_id: &str, modality: Modality) -> Result<Option<Template>> {
        let templates = self
            .templates
            .lock()
            .map_err(|_| anyhow!("Template store lock poisoned"))?;
        Ok(templates.get(&(subject_id.to_string(), modality)).cloned())
    }

    fn put(&self, template: &Template) -> Result<()> {
        let mut templates = self
            .templates
            .lock()
            .map_err(|_| anyhow!("Template store lock poisoned"))?;
        templates.insert(
            (template.subject_id.clone(), template.modality),
            template.clone(),
        );
        Ok(())
    }

    fn list(&self, modality: Modality) -> Result<BTreeSet<String>> {
        let templates = self
            .templates
            .lock()
            .map_err(|_| anyhow!("Template store lock poisoned"))?;
        Ok(templates
            .keys()
            .filter(|(_, m)| *m == modality)
            .map(|(subject, _)| subject.clone())
            .collect())
    }

    fn delete(&self, subject_id: &str, modality: Modality) -> Result<bool> {
        let mut templates = self
            .templates
            .lock()
            .map_err(|_| anyhow!("Template store lock poisoned"))?;
        Ok(templates
            .remove(&(subject_id.to_string(), modality))
            .is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn template(subject: &str, modality: Modality, vector: Vec<f32>) -> Template {
        Template {
            subject_id: subject.to_string(),
            modality,
            vector,
            created_at: Utc::now(),
            sample_count: 1,
        }
    }

    #[test]
    fn test_put_get_list_delete() {
        let store = InMemoryTemplateStore::new();
        store.put(&template("bob", Modality::Face, vec![1.0])).unwrap();
        store.put(&template("alice", Modality::Face, vec![0.0, 1.0])).unwrap();
        store.put(&template("alice", Modality::Voice, vec![1.0, 0.0])).unwrap();

        let faces: Vec<String> = store.list(Modality::Face).unwrap().into_iter().collect();
        assert_eq!(faces, vec!["alice".to_string(), "bob".to_string()]);
        assert_eq!(store.list(Modality::Voice).unwrap().len(), 1);

        let alice = store.get("alice", Modality::Face).unwrap().unwrap();
        assert_eq!(alice.vector, vec![0.0, 1.0]);
        assert!(store.get("carol", Modality::Face).unwrap().is_none());

        assert!(store.delete("bob", Modality::Face).unwrap());
        assert!(!store.delete("bob", Modality::Face).unwrap());
    }

    #[test]
    fn test_put_overwrites() {
        let store = InMemoryTemplateStore::new();
        store.put(&template("alice", Modality::Face, vec![1.0, 0.0])).unwrap();
        store.put(&template("alice", Modality::Face, vec![0.0, 1.0])).unwrap();
        let alice = store.get("alice", Modality::Face).unwrap().unwrap();
        assert_eq!(alice.vector, vec![0.0, 1.0]);
    }
}
