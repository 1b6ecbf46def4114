//! Application-wide constants.

/// Prefix for all versioned routes, e.g. `/api/v0/submissions`.
pub const API_PREFIX: &str = "/api/v0";

/// Root prefix for submitted files in object storage.
pub const SUBMISSION_KEY_PREFIX: &str = "submissions";

/// Metadata key a caller may use to override the derived notification priority.
pub const PRIORITY_METADATA_KEY: &str = "priority";
