//! Configuration types

use crate::error::ConfigError;
use crate::pagination::DEFAULT_PAGE_SIZE;
use serde::{Deserialize, Serialize};

/// Default buffer for change notification channels.
pub const DEFAULT_NOTIFICATION_CAPACITY: usize = 1024;

/// Configuration for cache decorators and in-memory stores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Page size used when a full resynchronization walks the backing store.
    pub resync_page_size: u64,
    /// How many change notifications a subscriber may fall behind before it
    /// starts losing them.
    pub notification_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            resync_page_size: DEFAULT_PAGE_SIZE,
            notification_capacity: DEFAULT_NOTIFICATION_CAPACITY,
        }
    }
}

impl CacheConfig {
    /// Create a new cache config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the resynchronization page size.
    pub fn with_resync_page_size(mut self, size: u64) -> Self {
        self.resync_page_size = size;
        self
    }

    /// Set the notification channel capacity.
    pub fn with_notification_capacity(mut self, capacity: usize) -> Self {
        self.notification_capacity = capacity;
        self
    }

    /// Check that every value is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.resync_page_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "resync_page_size".to_string(),
                value: self.resync_page_size.to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.notification_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "notification_capacity".to_string(),
                value: self.notification_capacity.to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_config_builder() {
        let config = CacheConfig::new()
            .with_resync_page_size(250)
            .with_notification_capacity(16);

        assert_eq!(config.resync_page_size, 250);
        assert_eq!(config.notification_capacity, 16);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(CacheConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_page_size_rejected() {
        let err = CacheConfig::new()
            .with_resync_page_size(0)
            .validate()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "resync_page_size"));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let err = CacheConfig::new()
            .with_notification_capacity(0)
            .validate()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "notification_capacity"));
    }

    #[test]
    fn test_config_deserializes_with_missing_fields() {
        let config: CacheConfig = serde_json::from_str(r#"{"resync_page_size": 10}"#).unwrap();
        assert_eq!(config.resync_page_size, 10);
        assert_eq!(config.notification_capacity, DEFAULT_NOTIFICATION_CAPACITY);
    }
}
