//! Submission preconditions.
//!
//! Everything here runs before the orchestrator makes its first state transition, so
//! a rejected submission leaves no trace.

use crate::models::{Identity, SubmissionFile};
use crate::submission_error::ValidationError;

/// Upload limits applied to each submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmissionLimits {
    pub max_files: usize,
    pub max_file_size_bytes: usize,
}

impl Default for SubmissionLimits {
    fn default() -> Self {
        Self {
            max_files: 20,
            max_file_size_bytes: 50 * 1024 * 1024,
        }
    }
}

/// Check identity and file set against the limits.
pub fn validate_submission(
    identity: &Identity,
    files: &[SubmissionFile],
    limits: &SubmissionLimits,
) -> Result<(), ValidationError> {
    if !identity.is_authenticated() {
        return Err(ValidationError::NotSignedIn);
    }
    if files.is_empty() {
        return Err(ValidationError::EmptyFileSet);
    }
    if files.len() > limits.max_files {
        return Err(ValidationError::TooManyFiles {
            count: files.len(),
            max: limits.max_files,
        });
    }
    for file in files {
        if sanitize_filename(&file.filename).is_none() {
            return Err(ValidationError::InvalidFilename(file.filename.clone()));
        }
        if file.size() > limits.max_file_size_bytes {
            return Err(ValidationError::FileTooLarge {
                filename: file.filename.clone(),
                size: file.size(),
                max: limits.max_file_size_bytes,
            });
        }
    }
    Ok(())
}

/// Reduce a client-supplied filename to a safe storage key segment.
///
/// Path components are dropped and anything outside `[A-Za-z0-9._-]` becomes `_`.
/// Returns `None` when nothing usable is left.
pub fn sanitize_filename(filename: &str) -> Option<String> {
    let base = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();

    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.').to_string();

    if cleaned.is_empty() || cleaned.chars().all(|c| c == '_') {
        None
    } else {
        Some(cleaned.chars().take(200).collect())
    }
}
