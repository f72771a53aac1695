use super::{Template, TemplateStore};
use crate::embedding::Modality;
use anyhow::{anyhow, Context, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

/// Snapshot of every template enrolled for one modality
#[derive(Debug, Clone)]
pub struct TemplateSet {
    modality: Modality,
    entries: BTreeMap<String, Template>,
}

impl TemplateSet {
    pub fn new(modality: Modality, templates: impl IntoIterator<Item = Template>) -> Self {
        let entries = templates
            .into_iter()
            .filter(|t| t.modality == modality)
            .map(|t| (t.subject_id.clone(), t))
            .collect();
        Self { modality, entries }
    }

    pub fn modality(&self) -> Modality {
        self.modality
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, subject_id: &str) -> Option<&Template> {
        self.entries.get(subject_id)
    }

    /// Templates in subject-id order
    pub fn iter(&self) -> impl Iterator<Item = &Template> {
        self.entries.values()
    }
}

/// Read-through cache over a [`TemplateStore`].
///
/// Sets are loaded once per modality and shared as `Arc` snapshots until a
/// forced reload or a write through this repository.
pub struct TemplateRepository {
    store: Arc<dyn TemplateStore>,
    cache: Mutex<HashMap<Modality, Arc<TemplateSet>>>,
}

impl TemplateRepository {
    pub fn new(store: Arc<dyn TemplateStore>) -> Self {
        Self {
            store,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn TemplateStore> {
        &self.store
    }

    /// Load (or return the cached) template set for a modality
    pub fn templates(&self, modality: Modality, force_reload: bool) -> Result<Arc<TemplateSet>> {
        let mut cache = self
            .cache
            .lock()
            .map_err(|_| anyhow!("Template cache lock poisoned"))?;

        if !force_reload {
            if let Some(set) = cache.get(&modality) {
                return Ok(Arc::clone(set));
            }
        }

        let subjects = self
            .store
            .list(modality)
            .with_context(|| format!("Failed to list {} templates", modality))?;

        let mut templates = Vec::with_capacity(subjects.len());
        for subject in &subjects {
            match self.store.get(subject, modality) {
                Ok(Some(template)) => templates.push(template),
                Ok(None) => log::warn!("{} template for '{}' vanished during load", modality, subject),
                Err(e) => log::warn!("Skipping unreadable {} template '{}': {:#}", modality, subject, e),
            }
        }

        let set = Arc::new(TemplateSet::new(modality, templates));
        log::debug!("Loaded {} {} templates", set.len(), modality);
        cache.insert(modality, Arc::clone(&set));
        Ok(set)
    }

    /// Single template lookup, served from the cached set when present
    pub fn template(&self, subject_id: &str, modality: Modality) -> Result<Option<Template>> {
        let cached = {
            let cache = self
                .cache
                .lock()
                .map_err(|_| anyhow!("Template cache lock poisoned"))?;
            cache.get(&modality).map(Arc::clone)
        };

        match cached {
            Some(set) => Ok(set.get(subject_id).cloned()),
            None => self.store.get(subject_id, modality),
        }
    }

    pub fn put(&self, template: &Template) -> Result<()> {
        self.store.put(template)?;
        self.invalidate(template.modality)
    }

    pub fn delete(&self, subject_id: &str, modality: Modality) -> Result<bool> {
        let removed = self.store.delete(subject_id, modality)?;
        self.invalidate(modality)?;
        Ok(removed)
    }

    pub fn invalidate(&self, modality: Modality) -> Result<()> {
        let mut cache = self
            .cache
            .lock()
            .map_err(|_| anyhow!("Template cache lock poisoned"))?;
        cache.remove(&modality);
        Ok(())
    }
}
