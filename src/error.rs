use thiserror::Error;

/// Central error type for listing version control operations.
#[derive(Error, Debug)]
pub enum VcsError {
    #[error("Version {version_id} not found for listing '{listing_id}' on branch '{branch}'")]
    VersionNotFound {
        listing_id: String,
        branch: String,
        version_id: String,
    },

    #[error("Listing '{listing_id}' has no history on branch '{branch}'")]
    NoHistory { listing_id: String, branch: String },

    /// Another writer already appended this version number. Safe to retry
    /// after re-reading the latest version.
    #[error("Duplicate version {version_id} for listing '{listing_id}' on branch '{branch}'")]
    DuplicateVersion {
        listing_id: String,
        branch: String,
        version_id: String,
    },

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Branch '{branch}' of listing '{listing_id}' has no versions to copy from")]
    BranchSourceMissing { listing_id: String, branch: String },

    #[error("Branch '{branch}' already exists for listing '{listing_id}'")]
    BranchAlreadyExists { listing_id: String, branch: String },

    #[error("Invalid version string: {0}")]
    InvalidVersion(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl VcsError {
    /// Whether the failed call can be repeated after re-reading state.
    pub fn is_retryable(&self) -> bool {
        matches!(self, VcsError::DuplicateVersion { .. })
    }

    /// True for every variant that reports a missing listing, branch or version.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            VcsError::VersionNotFound { .. }
                | VcsError::NoHistory { .. }
                | VcsError::BranchSourceMissing { .. }
        )
    }
}

/// Convenience type alias for listing version control results.
pub type VcsResult<T> = Result<T, VcsError>;
