//! Unified core error definitions.

use serde::Serialize;
use thiserror::Error;

// Re-export wire-layer error types.
pub use desec_desk_client::catalog::RecordValidationError;
pub use desec_desk_client::ApiError;

/// Error type for the core layer.
#[derive(Error, Debug, Serialize)]
#[serde(tag = "code", content = "details")]
pub enum CoreError {
    /// Profile was not found.
    #[error("Profile not found: {0}")]
    ProfileNotFound(String),

    /// Profile name is already taken.
    #[error("Profile already exists: {0}")]
    ProfileExists(String),

    /// The active or default profile cannot be deleted.
    #[error("Profile '{0}' cannot be deleted while it is active or the default")]
    ProfileProtected(String),

    /// Profile name contains characters unsafe for directory use.
    #[error("Invalid profile name: {0}")]
    InvalidProfileName(String),

    /// Zone was not found in the cache or version store.
    #[error("Zone not found: {0}")]
    ZoneNotFound(String),

    /// Version snapshot was not found.
    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(String),

    /// Local record validation failed; nothing was sent to the network.
    #[error("{0}")]
    Validation(#[from] RecordValidationError),

    /// Credential sealing/unsealing error.
    #[error("Credential error: {0}")]
    CredentialError(String),

    /// Cache, config, or version-store I/O failure. Non-fatal for the
    /// logical operation; surfaced as a warning.
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// The queue worker has shut down and no longer accepts work.
    #[error("Queue is shut down")]
    QueueClosed,

    /// Wire-layer error.
    #[error("{0}")]
    Api(#[from] ApiError),
}

impl CoreError {
    /// Returns whether this error is expected (user input, missing resource,
    /// permissions) rather than a fault.
    ///
    /// Use `warn` when this returns `true`, and `error` otherwise.
    /// Keep this method updated when adding new variants.
    #[must_use]
    pub fn is_expected(&self) -> bool {
        match self {
            Self::ProfileNotFound(_)
            | Self::ProfileExists(_)
            | Self::ProfileProtected(_)
            | Self::InvalidProfileName(_)
            | Self::ZoneNotFound(_)
            | Self::SnapshotNotFound(_)
            | Self::Validation(_) => true,
            Self::Api(e) => e.is_expected(),
            _ => false,
        }
    }
}

impl From<std::io::Error> for CoreError {
    fn from(e: std::io::Error) -> Self {
        Self::StorageError(e.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::SerializationError(e.to_string())
    }
}

/// `Result` alias used by the core layer.
pub type CoreResult<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_are_expected() {
        let e = CoreError::Validation(RecordValidationError {
            index: 0,
            reason: "ttl<3600".to_string(),
        });
        assert!(e.is_expected());
        assert_eq!(e.to_string(), "record 0: ttl<3600");
    }

    #[test]
    fn storage_errors_are_not_expected() {
        let e = CoreError::StorageError("disk full".to_string());
        assert!(!e.is_expected());
    }

    #[test]
    fn api_errors_delegate_expectedness() {
        assert!(CoreError::Api(ApiError::Unauthenticated).is_expected());
        assert!(!CoreError::Api(ApiError::NetworkError {
            detail: "down".into()
        })
        .is_expected());
    }

    #[test]
    fn serializes_with_code_tag() {
        let e = CoreError::ProfileNotFound("work".to_string());
        let json = serde_json::to_string(&e).unwrap();
        assert!(json.contains("\"code\":\"ProfileNotFound\""));
    }
}
