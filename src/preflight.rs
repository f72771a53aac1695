/**
 * Preflight readiness checks
 *
 * Verifies configuration, template store access, key file permissions and
 * enrollment coverage before the first authentication session.
 */
use crate::config::AppConfig;
use crate::embedding::Modality;
use crate::store::TemplateRepository;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Status of an individual preflight check
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

/// Individual preflight check result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreflightItem {
    pub name: String,
    pub status: CheckStatus,
    pub message: String,
    pub fix_hint: Option<String>,
}

impl PreflightItem {
    fn pass(name: &str, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Pass,
            message: message.into(),
            fix_hint: None,
        }
    }

    fn problem(name: &str, status: CheckStatus, message: impl Into<String>, hint: &str) -> Self {
        Self {
            name: name.to_string(),
            status,
            message: message.into(),
            fix_hint: Some(hint.to_string()),
        }
    }
}

/// Complete preflight report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreflightReport {
    pub items: Vec<PreflightItem>,
    pub overall: CheckStatus,
    pub can_proceed: bool,
}

impl PreflightReport {
    /// Determine overall status from individual checks
    fn compute_overall(items: &[PreflightItem]) -> CheckStatus {
        if items.iter().any(|i| i.status == CheckStatus::Fail) {
            CheckStatus::Fail
        } else if items.iter().any(|i| i.status == CheckStatus::Warn) {
            CheckStatus::Warn
        } else {
            CheckStatus::Pass
        }
    }

    /// Can sessions run despite warnings?
    fn can_proceed(items: &[PreflightItem]) -> bool {
        !items.iter().any(|i| i.status == CheckStatus::Fail)
    }
}

/// Run all preflight checks. `templates_dir` enables the key file check.
pub fn run_preflight(
    config: &AppConfig,
    repository: &TemplateRepository,
    templates_dir: Option<&Path>,
) -> PreflightReport {
    log::info!("Starting preflight checks...");

    let mut items = vec![check_config(config)];

    if let Some(dir) = templates_dir {
        items.push(check_key_file(dir));
    }

    match check_enrollment(repository) {
        Ok(mut enrollment) => items.append(&mut enrollment),
        Err(item) => items.push(item),
    }

    let overall = PreflightReport::compute_overall(&items);
    let can_proceed = PreflightReport::can_proceed(&items);

    log::info!("Preflight complete: {:?}", overall);
    PreflightReport {
        items,
        overall,
        can_proceed,
    }
}

fn check_config(config: &AppConfig) -> PreflightItem {
    match config.validate() {
        Ok(()) => PreflightItem::pass(
            "config",
            format!(
                "Configuration valid (mode {}, R={}, T={})",
                config.policy.mode, config.voting.required_votes, config.voting.trial_budget
            ),
        ),
        Err(e) => PreflightItem::problem(
            "config",
            CheckStatus::Fail,
            format!("Configuration invalid: {}", e),
            "Fix the value in config.toml, or delete the file to regenerate defaults",
        ),
    }
}

fn check_key_file(dir: &Path) -> PreflightItem {
    let key_path = dir.join(".key");
    if !key_path.exists() {
        return PreflightItem::problem(
            "encryption_key",
            CheckStatus::Warn,
            "No template encryption key yet",
            "A key is generated on the first enrollment",
        );
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        match std::fs::metadata(&key_path) {
            Ok(meta) if meta.permissions().mode() & 0o077 != 0 => {
                return PreflightItem::problem(
                    "encryption_key",
                    CheckStatus::Warn,
                    format!(
                        "Key file is readable by others (mode {:o})",
                        meta.permissions().mode() & 0o777
                    ),
                    "Restrict it: chmod 600 <templates>/.key",
                );
            }
            Ok(_) => {}
            Err(e) => {
                return PreflightItem::problem(
                    "encryption_key",
                    CheckStatus::Fail,
                    format!("Cannot read key file metadata: {}", e),
                    "Check ownership of the templates directory",
                );
            }
        }
    }

    PreflightItem::pass("encryption_key", "Template encryption key present")
}

fn check_enrollment(repository: &TemplateRepository) -> Result<Vec<PreflightItem>, PreflightItem> {
    let store_failure = |e: anyhow::Error| {
        PreflightItem::problem(
            "template_store",
            CheckStatus::Fail,
            format!("Template store unreadable: {:#}", e),
            "Check the templates directory and its .key file",
        )
    };

    let faces = repository
        .templates(Modality::Face, true)
        .map_err(store_failure)?;
    let voices = repository
        .templates(Modality::Voice, true)
        .map_err(store_failure)?;

    let mut items = vec![PreflightItem::pass(
        "template_store",
        format!(
            "Template store readable ({} face, {} voice)",
            faces.len(),
            voices.len()
        ),
    )];

    if faces.is_empty() {
        items.push(PreflightItem::problem(
            "face_enrollment",
            CheckStatus::Fail,
            "No face templates enrolled",
            "Enroll a subject: ember-gate enroll <subject> face <samples.json>",
        ));
        return Ok(items);
    }
    items.push(PreflightItem::pass(
        "face_enrollment",
        format!("{} subject(s) enrolled", faces.len()),
    ));

    let uncovered: Vec<&str> = faces
        .iter()
        .map(|t| t.subject_id.as_str())
        .filter(|subject| voices.get(subject).is_none())
        .collect();
    if uncovered.is_empty() {
        items.push(PreflightItem::pass(
            "voice_coverage",
            "Every face-enrolled subject has a voice template",
        ));
    } else {
        items.push(PreflightItem::problem(
            "voice_coverage",
            CheckStatus::Warn,
            format!("No voice template for: {}", uncovered.join(", ")),
            "These subjects will always be denied: ember-gate enroll <subject> voice <samples.json>",
        ));
    }

    Ok(items)
}
