//! File-backed template store with encrypted vectors
//!
//! Layout: `<root>/<modality>/<subject>.template`, one JSON document per
//! template. The vector is sealed with XChaCha20-Poly1305 under a
//! per-installation key kept at `<root>/.key` (owner-only permissions).
//! Metadata stays in clear so listings do not need the key.

use super::{Template, TemplateStore};
use crate::embedding::Modality;
use crate::validation::validate_subject_id;
use anyhow::{bail, Context, Result};
use chacha20poly1305::{
    aead::{Aead, KeyInit, OsRng},
    XChaCha20Poly1305, XNonce,
};
use chrono::{DateTime, Utc};
use rand_core::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

const TEMPLATE_EXTENSION: &str = "template";

/// On-disk template document
#[derive(Serialize, Deserialize)]
struct EncryptedTemplate {
    /// XChaCha20-Poly1305 nonce (192-bit)
    nonce: Vec<u8>,
    /// Encrypted vector data
    ciphertext: Vec<u8>,
    /// Metadata (unencrypted)
    subject_id: String,
    modality: Modality,
    created_at: DateTime<Utc>,
    sample_count: usize,
    dim: usize,
}

pub struct EncryptedFileStore {
    root: PathBuf,
    encryption_key: Zeroizing<[u8; 32]>,
}

impl EncryptedFileStore {
    /// Open (or initialise) a store rooted at `root`
    pub fn open(root: PathBuf) -> Result<Self> {
        for modality in Modality::ALL {
            fs::create_dir_all(root.join(modality.as_str()))
                .with_context(|| format!("Failed to create {} template directory", modality))?;
        }

        let encryption_key = Self::get_or_create_encryption_key(&root)?;

        log::info!("Template store opened at {}", root.display());
        Ok(Self {
            root,
            encryption_key,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get or create the encryption key for template storage
    fn get_or_create_encryption_key(root: &Path) -> Result<Zeroizing<[u8; 32]>> {
        let key_path = root.join(".key");

        let key = if key_path.exists() {
            let key_bytes = Zeroizing::new(fs::read(&key_path).context("Failed to read encryption key")?);
            if key_bytes.len() != 32 {
                bail!("Invalid encryption key length");
            }
            let mut key_array = Zeroizing::new([0u8; 32]);
            key_array.copy_from_slice(&key_bytes);
            key_array
        } else {
            let mut key_array = Zeroizing::new([0u8; 32]);
            OsRng.fill_bytes(&mut *key_array);

            fs::write(&key_path, &*key_array).context("Failed to write encryption key")?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(&key_path, fs::Permissions::from_mode(0o600))
                    .context("Failed to set key file permissions")?;
            }

            log::info!("Generated new template encryption key");
            key_array
        };

        Ok(key)
    }

    fn template_path(&self, subject_id: &str, modality: Modality) -> Result<PathBuf> {
        let subject = validate_subject_id(subject_id)?;
        Ok(self
            .root
            .join(modality.as_str())
            .join(format!("{}.{}", subject, TEMPLATE_EXTENSION)))
    }

    fn encrypt_vector(&self, vector: &[f32]) -> Result<(Vec<u8>, Vec<u8>)> {
        let cipher = XChaCha20Poly1305::new((&*self.encryption_key).into());

        let mut nonce_bytes = [0u8; 24];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = XNonce::from(nonce_bytes);

        let plaintext: Zeroizing<Vec<u8>> =
            Zeroizing::new(vector.iter().flat_map(|&f| f.to_le_bytes()).collect());

        let ciphertext = cipher
            .encrypt(&nonce, plaintext.as_ref())
            .map_err(|e| anyhow::anyhow!("Encryption failed: {:?}", e))?;

        Ok((nonce_bytes.to_vec(), ciphertext))
    }

    fn decrypt_vector(&self, doc: &EncryptedTemplate) -> Result<Vec<f32>> {
        let cipher = XChaCha20Poly1305::new((&*self.encryption_key).into());

        if doc.nonce.len() != 24 {
            bail!("Invalid nonce length");
        }
        let nonce = XNonce::from_slice(&doc.nonce);

        let plaintext = Zeroizing::new(
            cipher
                .decrypt(nonce, doc.ciphertext.as_ref())
                .map_err(|e| anyhow::anyhow!("Decryption failed: {:?}", e))?,
        );

        let vector: Vec<f32> = plaintext
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();

        if vector.len() != doc.dim {
            bail!(
                "Template dimension mismatch: header says {}, payload has {}",
                doc.dim,
                vector.len()
            );
        }

        Ok(vector)
    }
}

impl TemplateStore for EncryptedFileStore {
    fn get(&self, subject_id: &str, modality: Modality) -> Result<Option<Template>> {
        let path = self.template_path(subject_id, modality)?;
        if !path.exists() {
            return Ok(None);
        }

        let json = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read template file: {}", path.display()))?;
        let doc: EncryptedTemplate =
            serde_json::from_str(&json).context("Failed to deserialize template")?;
        let vector = self.decrypt_vector(&doc)?;

        Ok(Some(Template {
            subject_id: doc.subject_id,
            modality: doc.modality,
            vector,
            created_at: doc.created_at,
            sample_count: doc.sample_count,
        }))
    }

    fn put(&self, template: &Template) -> Result<()> {
        let path = self.template_path(&template.subject_id, template.modality)?;
        let (nonce, ciphertext) = self.encrypt_vector(&template.vector)?;

        let doc = EncryptedTemplate {
            nonce,
            ciphertext,
            subject_id: template.subject_id.clone(),
            modality: template.modality,
            created_at: template.created_at,
            sample_count: template.sample_count,
            dim: template.dim(),
        };
        let json = serde_json::to_string_pretty(&doc).context("Failed to serialize template")?;

        // Write then rename so a crash never leaves a half-written template
        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, json).context("Failed to write template file")?;
        fs::rename(&tmp_path, &path).context("Failed to replace template file")?;

        log::info!(
            "Stored {} template for '{}' ({} samples, fingerprint {})",
            template.modality,
            template.subject_id,
            template.sample_count,
            template.fingerprint()
        );
        Ok(())
    }

    fn list(&self, modality: Modality) -> Result<BTreeSet<String>> {
        let dir = self.root.join(modality.as_str());
        let mut subjects = BTreeSet::new();
        if !dir.exists() {
            return Ok(subjects);
        }

        for entry in fs::read_dir(&dir).context("Failed to read template directory")? {
            let entry = entry.context("Failed to read directory entry")?;
            let path = entry.path();

            if path.extension().and_then(|s| s.to_str()) == Some(TEMPLATE_EXTENSION) {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    subjects.insert(stem.to_string());
                }
            }
        }

        Ok(subjects)
    }

    fn delete(&self, subject_id: &str, modality: Modality) -> Result<bool> {
        let path = self.template_path(subject_id, modality)?;
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path).context("Failed to delete template")?;
        log::info!("Deleted {} template for '{}'", modality, subject_id);
        Ok(true)
    }
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
            sample_count: 4,
        }
    }

    #[test]
    fn test_roundtrip_and_listing() {
        let dir = tempfile::tempdir().unwrap();
        let store = EncryptedFileStore::open(dir.path().to_path_buf()).unwrap();

        let alice = template("alice", Modality::Voice, vec![0.6, -0.8, 0.0]);
        store.put(&alice).unwrap();

        let loaded = store.get("alice", Modality::Voice).unwrap().unwrap();
        assert_eq!(loaded.vector, alice.vector);
        assert_eq!(loaded.sample_count, 4);
        assert!(store.get("alice", Modality::Face).unwrap().is_none());

        let voices: Vec<String> = store.list(Modality::Voice).unwrap().into_iter().collect();
        assert_eq!(voices, vec!["alice".to_string()]);
        assert!(store.list(Modality::Face).unwrap().is_empty());
    }

    #[test]
    fn test_vector_not_stored_in_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = EncryptedFileStore::open(dir.path().to_path_buf()).unwrap();
        store
            .put(&template("bob", Modality::Face, vec![0.25, 0.5]))
            .unwrap();

        let raw = fs::read_to_string(dir.path().join("face").join("bob.template")).unwrap();
        let doc: EncryptedTemplate = serde_json::from_str(&raw).unwrap();
        let clear: Vec<u8> = [0.25f32, 0.5]
            .iter()
            .flat_map(|f| f.to_le_bytes())
            .collect();
        assert_ne!(&doc.ciphertext[..clear.len()], &clear[..]);
    }

    #[test]
    fn test_key_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = EncryptedFileStore::open(dir.path().to_path_buf()).unwrap();
            store
                .put(&template("carol", Modality::Face, vec![1.0, 0.0]))
                .unwrap();
        }
        let reopened = EncryptedFileStore::open(dir.path().to_path_buf()).unwrap();
        let carol = reopened.get("carol", Modality::Face).unwrap().unwrap();
        assert_eq!(carol.vector, vec![1.0, 0.0]);
    }

    #[test]
    fn test_wrong_key_fails_to_decrypt() {
        let dir = tempfile::tempdir().unwrap();
        let store = EncryptedFileStore::open(dir.path().to_path_buf()).unwrap();
        store
            .put(&template("dave", Modality::Face, vec![1.0, 0.0]))
            .unwrap();

        fs::write(dir.path().join(".key"), [7u8; 32]).unwrap();
        let other = EncryptedFileStore::open(dir.path().to_path_buf()).unwrap();
        assert!(other.get("dave", Modality::Face).is_err());
    }

    #[test]
    fn test_overwrite_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = EncryptedFileStore::open(dir.path().to_path_buf()).unwrap();
        store.put(&template("erin", Modality::Face, vec![1.0, 0.0])).unwrap();
        store.put(&template("erin", Modality::Face, vec![0.0, 1.0])).unwrap();
        assert_eq!(
            store.get("erin", Modality::Face).unwrap().unwrap().vector,
            vec![0.0, 1.0]
        );
        assert!(store.delete("erin", Modality::Face).unwrap());
        assert!(!store.delete("erin", Modality::Face).unwrap());
    }

    #[test]
    fn test_rejects_traversal_subject() {
        let dir = tempfile::tempdir().unwrap();
        let store = EncryptedFileStore::open(dir.path().to_path_buf()).unwrap();
        assert!(store.get("../etc/passwd", Modality::Face).is_err());
        assert!(store
            .put(&template("a/b", Modality::Face, vec![1.0]))
            .is_err());
    }
}
