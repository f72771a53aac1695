use crate::auth::{MatcherConfig, PolicyConfig, VotingParams};
use crate::enrollment::EnrollmentConfig;
use crate::validation::{
    validate_burst_frames, validate_positive, validate_unit_interval, validate_weights,
    ValidationError,
};
use crate::vision::LivenessConfig;
use crate::voice::{default_phrases, SignalQualityConfig};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Longest face stage a session may be configured for (10 minutes)
pub const MAX_SESSION_TIMEOUT_MS: u64 = 600_000;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub liveness: LivenessConfig,
    #[serde(default)]
    pub matcher: MatcherConfig,
    #[serde(default)]
    pub voting: VotingParams,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub enrollment: EnrollmentConfig,
    #[serde(default)]
    pub signal: SignalQualityConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Deadline for the whole face stage (ms)
    pub timeout_ms: u64,
    /// Weak voice clips tolerated before giving up
    pub voice_attempts: u32,
    /// Prompt a random phrase before voice capture
    pub challenge_enabled: bool,
    pub challenge_phrases: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 15_000,
            voice_attempts: 3,
            challenge_enabled: true,
            challenge_phrases: default_phrases(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSinkKind {
    Log,
    Jsonl,
    Null,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Overrides the default templates directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub templates_dir: Option<PathBuf>,
    /// Overrides the default event log path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub events_log: Option<PathBuf>,
    pub event_sink: EventSinkKind,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            templates_dir: None,
            events_log: None,
            event_sink: EventSinkKind::Jsonl,
        }
    }
}

impl AppConfig {
    /// Load config from file or create default
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config: {}", path.display()))?;
            let config: AppConfig = toml::from_str(&content).context("Failed to parse config")?;
            log::info!("Config loaded from: {}", path.display());
            Ok(config)
        } else {
            let config = Self::default();
            config.save(path)?;
            log::info!("Default config created at: {}", path.display());
            Ok(config)
        }
    }

    /// Write config with owner-only permissions
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let toml_str = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, toml_str).context("Failed to write config")?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(path)
                .context("Failed to read config metadata")?
                .permissions();
            perms.set_mode(0o600); // Owner read/write only
            fs::set_permissions(path, perms).context("Failed to set config permissions")?;
        }

        Ok(())
    }

    /// Check every tunable before a session or enrollment uses it
    pub fn validate(&self) -> Result<(), ValidationError> {
        let l = &self.liveness;
        validate_burst_frames(l.burst_frames)?;
        if l.region_size < 8 {
            return Err(ValidationError::InvalidRange(format!(
                "Region size must be at least 8px, got {}",
                l.region_size
            )));
        }
        validate_unit_interval("Liveness threshold", l.threshold)?;
        validate_positive("Motion alpha", l.motion_alpha)?;
        validate_positive("Texture scale", l.texture_scale)?;
        validate_positive("Flow smoothness", l.flow_smoothness)?;
        validate_unit_interval("Blink EAR threshold", l.blink_ear_threshold)?;
        if l.blink_weight > 0.2 {
            return Err(ValidationError::InvalidRange(format!(
                "Blink weight must not exceed 0.2, got {}",
                l.blink_weight
            )));
        }
        validate_weights(
            "Liveness",
            &[l.motion_weight, l.texture_weight, l.blink_weight],
            false,
        )?;

        self.voting.validate()?;
        self.policy.validate()?;
        self.enrollment.validate()?;

        validate_unit_interval("Minimum RMS", self.signal.min_rms)?;
        validate_unit_interval("Minimum peak", self.signal.min_peak)?;
        validate_unit_interval("Minimum zero-crossing rate", self.signal.min_zero_crossing_rate)?;

        if self.session.timeout_ms == 0 || self.session.timeout_ms > MAX_SESSION_TIMEOUT_MS {
            return Err(ValidationError::InvalidRange(format!(
                "Session timeout must be between 1 and {}ms, got {}",
                MAX_SESSION_TIMEOUT_MS, self.session.timeout_ms
            )));
        }
        if self.session.voice_attempts == 0 {
            return Err(ValidationError::InvalidRange(
                "Voice attempts must be at least 1".to_string(),
            ));
        }
        if self.session.challenge_enabled && self.session.challenge_phrases.is_empty() {
            return Err(ValidationError::InvalidFormat(
                "Challenge enabled but no phrases configured".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::PolicyMode;

    #[test]
    fn test_defaults_validate() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.policy.mode, PolicyMode::Balanced);
        assert_eq!(config.voting.required_votes, 3);
        assert_eq!(config.session.timeout_ms, 15_000);
    }

    #[test]
    fn test_load_or_create_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let created = AppConfig::load_or_create(&path).unwrap();
        assert!(path.exists());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        let loaded = AppConfig::load_or_create(&path).unwrap();
        assert_eq!(loaded.voting.trial_budget, created.voting.trial_budget);
        assert_eq!(loaded.policy.strict, created.policy.strict);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "[voting]\nrequired_votes = 2\ntrial_budget = 4\nmax_inter_vote_gap_ms = 1000\nmatch_threshold = 0.8\n",
        )
        .unwrap();

        let config = AppConfig::load_or_create(&path).unwrap();
        assert_eq!(config.voting.required_votes, 2);
        assert_eq!(config.liveness.burst_frames, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = AppConfig::default();
        config.liveness.motion_weight = 0.9;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.voting.trial_budget = 2;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.session.timeout_ms = u64::MAX;
        assert!(config.validate().is_err());
        config.session.timeout_ms = MAX_SESSION_TIMEOUT_MS;
        assert!(config.validate().is_ok());

        let mut config = AppConfig::default();
        config.session.challenge_phrases.clear();
        assert!(config.validate().is_err());
        config.session.challenge_enabled = false;
        assert!(config.validate().is_ok());
    }
}
