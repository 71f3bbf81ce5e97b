//! Error types for repocache operations

use thiserror::Error;

/// Backing store errors.
///
/// These come from whichever store sits behind a cache and are handed to the
/// caller untouched; the cache layer never retries or rewrites them.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Object not found: {key}")]
    NotFound { key: String },

    #[error("Write rejected by store: {reason}")]
    Rejected { reason: String },
}

impl StoreError {
    /// Shorthand for [`StoreError::Unavailable`].
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all repocache errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RepoError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for repo and cache operations.
pub type RepoResult<T> = Result<T, RepoError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display_unavailable() {
        let err = StoreError::unavailable("connection refused");
        let msg = format!("{}", err);
        assert!(msg.contains("Store unavailable"));
        assert!(msg.contains("connection refused"));
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "resync_page_size".to_string(),
            value: "0".to_string(),
            reason: "must be positive".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("resync_page_size"));
        assert!(msg.contains("must be positive"));
    }

    #[test]
    fn test_repo_error_from_variants() {
        let store = RepoError::from(StoreError::NotFound {
            key: "42".to_string(),
        });
        assert!(matches!(store, RepoError::Store(_)));

        let config = RepoError::from(ConfigError::InvalidValue {
            field: "notification_capacity".to_string(),
            value: "0".to_string(),
            reason: "must be positive".to_string(),
        });
        assert!(matches!(config, RepoError::Config(_)));
    }

    #[test]
    fn test_store_error_passes_through_unchanged() {
        let original = StoreError::unavailable("disk full");
        let wrapped: RepoError = original.clone().into();
        assert_eq!(wrapped, RepoError::Store(original));
    }
}
