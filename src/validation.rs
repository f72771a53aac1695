/**
 * Input Validation Module
 *
 * Centralized validation for subject identifiers, CLI arguments and every
 * numeric configuration parameter. Subject ids become file names in the
 * template store, so they are restricted to a safe character set.
 */
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Invalid range: {0}")]
    InvalidRange(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Value too long: max {max}, got {actual}")]
    ValueTooLong { max: usize, actual: usize },
}

const MAX_SUBJECT_ID_LEN: usize = 64;

/// Validate subject id (alphanumeric + underscore/hyphen, max 64 chars)
pub fn validate_subject_id(id: &str) -> Result<&str, ValidationError> {
    if id.is_empty() {
        return Err(ValidationError::InvalidFormat(
            "Subject id cannot be empty".to_string(),
        ));
    }

    if id.len() > MAX_SUBJECT_ID_LEN {
        return Err(ValidationError::ValueTooLong {
            max: MAX_SUBJECT_ID_LEN,
            actual: id.len(),
        });
    }

    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(ValidationError::InvalidFormat(
            "Subject id can only contain letters, numbers, underscores, and hyphens".to_string(),
        ));
    }

    Ok(id)
}

/// Validate a probability-like value (0.0 to 1.0)
pub fn validate_unit_interval(name: &str, value: f32) -> Result<f32, ValidationError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(ValidationError::InvalidRange(format!(
            "{} must be between 0.0 and 1.0, got {}",
            name, value
        )));
    }
    Ok(value)
}

/// Validate a cosine-similarity threshold (-1.0 to 1.0)
pub fn validate_similarity_threshold(name: &str, value: f32) -> Result<f32, ValidationError> {
    if !(-1.0..=1.0).contains(&value) {
        return Err(ValidationError::InvalidRange(format!(
            "{} must be between -1.0 and 1.0, got {}",
            name, value
        )));
    }
    Ok(value)
}

/// Validate a strictly positive, finite scale factor
pub fn validate_positive(name: &str, value: f32) -> Result<f32, ValidationError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(ValidationError::InvalidRange(format!(
            "{} must be a positive number, got {}",
            name, value
        )));
    }
    Ok(value)
}

/// Validate voting parameters: T >= R >= 1
pub fn validate_votes(required_votes: u32, trial_budget: u32) -> Result<(), ValidationError> {
    if required_votes == 0 {
        return Err(ValidationError::InvalidRange(
            "Required votes must be at least 1".to_string(),
        ));
    }
    if trial_budget < required_votes {
        return Err(ValidationError::InvalidRange(format!(
            "Trial budget ({}) must be >= required votes ({})",
            trial_budget, required_votes
        )));
    }
    Ok(())
}

/// Validate a burst length (2 to 30 regions)
pub fn validate_burst_frames(frames: usize) -> Result<usize, ValidationError> {
    if !(2..=30).contains(&frames) {
        return Err(ValidationError::InvalidRange(format!(
            "Burst must contain between 2 and 30 frames, got {}",
            frames
        )));
    }
    Ok(frames)
}

/// Validate a set of blend weights: each in [0, 1], sum <= 1 (or == 1 when `exact`)
pub fn validate_weights(name: &str, weights: &[f32], exact: bool) -> Result<(), ValidationError> {
    for &w in weights {
        validate_unit_interval(name, w)?;
    }
    let sum: f32 = weights.iter().sum();
    if exact && (sum - 1.0).abs() > 1e-3 {
        return Err(ValidationError::InvalidRange(format!(
            "{} weights must sum to 1.0, got {}",
            name, sum
        )));
    }
    if sum > 1.0 + 1e-3 {
        return Err(ValidationError::InvalidRange(format!(
            "{} weights must not sum above 1.0, got {}",
            name, sum
        )));
    }
    Ok(())
}

/// Validate a samples file path given on the command line
pub fn validate_input_file(path: &str) -> Result<PathBuf, ValidationError> {
    if path.is_empty() {
        return Err(ValidationError::InvalidPath(
            "Path cannot be empty".to_string(),
        ));
    }

    if path.contains('\0') {
        return Err(ValidationError::InvalidPath(
            "Path contains null byte".to_string(),
        ));
    }

    let path_buf = Path::new(path);
    if !path_buf.is_file() {
        return Err(ValidationError::InvalidPath(format!(
            "{} is not a readable file",
            path
        )));
    }

    path_buf
        .canonicalize()
        .map_err(|e| ValidationError::InvalidPath(e.to_string()))
}
