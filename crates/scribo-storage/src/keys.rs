//! Shared key generation for storage backends.
//!
//! Key format: `submissions/{owner_digest}/{submission_id}/{index:02}-{filename}`.

use scribo_core::constants::SUBMISSION_KEY_PREFIX;
use scribo_core::validation::sanitize_filename;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{StorageError, StorageResult};

/// Build the storage key for the `index`-th file of a submission.
///
/// The owner segment is a digest of the owner id and the filename is sanitized, so the
/// key never escapes its prefix. The same inputs always produce the same key.
pub fn submission_file_key(
    owner_id: &str,
    submission_id: Uuid,
    index: usize,
    filename: &str,
) -> StorageResult<String> {
    let owner = owner_segment(owner_id);
    let name = sanitize_filename(filename)
        .ok_or_else(|| StorageError::InvalidKey(format!("invalid filename: {filename:?}")))?;

    Ok(format!(
        "{}/{}/{}/{:02}-{}",
        SUBMISSION_KEY_PREFIX, owner, submission_id, index, name
    ))
}

/// First 32 hex chars of `sha256(owner_id)`. Defined for every owner id.
pub fn owner_segment(owner_id: &str) -> String {
    let mut digest = hex::encode(Sha256::digest(owner_id.as_bytes()));
    digest.truncate(32);
    digest
}

/// Reject keys that could resolve outside the storage root.
pub(crate) fn validate_key(key: &str) -> StorageResult<()> {
    let bad_segment = key
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == "..");
    if bad_segment || key.contains('\\') {
        return Err(StorageError::InvalidKey(
            "Storage key contains invalid characters".to_string(),
        ));
    }
    Ok(())
}
