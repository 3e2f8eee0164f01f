//! Error taxonomy for the QA data-access layer.
//!
//! The variants follow the recovery policy of the retrieval layer:
//! configuration and malformed-identifier errors surface to the caller
//! unmodified, data absence is handled locally (logged and skipped, never
//! raised from a batch fetch), and backend failures are retried once before
//! propagating.

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, QaError>;

#[derive(Debug, thiserror::Error)]
pub enum QaError {
    /// Unknown camera, unusable description file, or bad credentials file.
    /// Fatal; raised at construction and never retried.
    #[error("configuration error: {0}")]
    Config(String),

    /// The caller supplied an identifier field this camera does not declare,
    /// a wildcard form outside the supported grammar, or a composite field
    /// with the wrong arity. Always names the offending field.
    #[error("malformed identifier field '{field}': {reason}")]
    MalformedIdentifier { field: String, reason: String },

    /// No backing record exists for a concrete identifier. Batch fetches
    /// convert this to a warning and an absent map entry.
    #[error("no data for identifier '{0}'")]
    DataAbsent(String),

    /// A backend fetch failed after the single reconnect retry.
    #[error("backend failure: {0}")]
    Backend(String),

    /// Detector geometry was requested but the camera was constructed
    /// without a focal-plane description.
    #[error("camera '{0}' has no focal-plane geometry loaded")]
    GeometryUnavailable(String),

    /// Unknown detector name within a loaded geometry.
    #[error("unknown detector '{0}'")]
    UnknownDetector(String),

    #[error("credentials file {path}: {source}")]
    Credentials {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Sql(#[from] rusqlite::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl QaError {
    /// Shorthand used throughout identifier parsing and translation.
    pub fn malformed(field: impl Into<String>, reason: impl Into<String>) -> Self {
        QaError::MalformedIdentifier {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
