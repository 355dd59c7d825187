//! Storage facade configuration.
//!
//! [`StorageConfig`] can be built in code with a validated builder or loaded
//! from any serde format:
//!
//! ```
//! use actor_storage::StorageConfig;
//!
//! let config = StorageConfig::builder().max_keys_per_batch(64).alarm_handler(true).build().unwrap();
//! assert_eq!(config.max_keys_per_batch(), 64);
//!
//! let parsed: StorageConfig = serde_json::from_str(r#"{"direct_io": true}"#).unwrap();
//! assert!(parsed.direct_io());
//! assert_eq!(parsed.max_keys_per_batch(), 128);
//! ```

use serde::{Deserialize, Serialize};

use crate::{
    error::ConfigError,
    size_limits::{DEFAULT_MAX_KEYS, SizeLimits},
};

/// Configuration for one actor's storage facade.
///
/// # Validation
///
/// - `max_keys_per_batch` must be `>= 1`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawStorageConfig", into = "RawStorageConfig")]
pub struct StorageConfig {
    max_keys_per_batch: usize,
    size_limits: SizeLimits,
    alarm_handler: bool,
    direct_io: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            max_keys_per_batch: DEFAULT_MAX_KEYS,
            size_limits: SizeLimits::default(),
            alarm_handler: false,
            direct_io: false,
        }
    }
}

#[bon::bon]
impl StorageConfig {
    /// Creates a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `max_keys_per_batch` is zero.
    #[builder]
    pub fn new(
        #[builder(default = DEFAULT_MAX_KEYS)] max_keys_per_batch: usize,
        #[builder(default)] size_limits: SizeLimits,
        #[builder(default)] alarm_handler: bool,
        #[builder(default)] direct_io: bool,
    ) -> Result<Self, ConfigError> {
        if max_keys_per_batch == 0 {
            return Err(ConfigError::BelowMinimum {
                field: "max_keys_per_batch",
                min: "1".into(),
                value: "0".into(),
            });
        }
        Ok(Self { max_keys_per_batch, size_limits, alarm_handler, direct_io })
    }

    /// Maximum number of keys in one `get`, `put` or `delete` call, and in
    /// the cumulative mutations of one transaction.
    #[must_use]
    pub fn max_keys_per_batch(&self) -> usize {
        self.max_keys_per_batch
    }

    /// Key and value size limits.
    #[must_use]
    pub fn size_limits(&self) -> &SizeLimits {
        &self.size_limits
    }

    /// Whether the actor has an alarm-capable handler.
    #[must_use]
    pub fn alarm_handler(&self) -> bool {
        self.alarm_handler
    }

    /// Whether the direct I/O override is applied to every call.
    #[must_use]
    pub fn direct_io(&self) -> bool {
        self.direct_io
    }

    /// Returns a copy with direct I/O enabled.
    #[must_use]
    pub fn with_direct_io(&self) -> Self {
        Self { direct_io: true, ..self.clone() }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawStorageConfig {
    #[serde(default = "default_max_keys_per_batch")]
    max_keys_per_batch: usize,
    #[serde(default)]
    size_limits: SizeLimits,
    #[serde(default)]
    alarm_handler: bool,
    #[serde(default)]
    direct_io: bool,
}

fn default_max_keys_per_batch() -> usize {
    DEFAULT_MAX_KEYS
}

impl TryFrom<RawStorageConfig> for StorageConfig {
    type Error = ConfigError;

    fn try_from(raw: RawStorageConfig) -> Result<Self, Self::Error> {
        Self::builder()
            .max_keys_per_batch(raw.max_keys_per_batch)
            .size_limits(raw.size_limits)
            .alarm_handler(raw.alarm_handler)
            .direct_io(raw.direct_io)
            .build()
    }
}

impl From<StorageConfig> for RawStorageConfig {
    fn from(config: StorageConfig) -> Self {
        Self {
            max_keys_per_batch: config.max_keys_per_batch,
            size_limits: config.size_limits,
            alarm_handler: config.alarm_handler,
            direct_io: config.direct_io,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::size_limits::{ENFORCED_MAX_VALUE_SIZE, MAX_KEY_SIZE};

    #[test]
    fn test_defaults() {
        let config = StorageConfig::default();
        assert_eq!(config.max_keys_per_batch(), 128);
        assert_eq!(config.size_limits().max_key_size(), MAX_KEY_SIZE);
        assert_eq!(config.size_limits().max_value_size(), ENFORCED_MAX_VALUE_SIZE);
        assert!(!config.alarm_handler());
        assert!(!config.direct_io());
        assert_eq!(StorageConfig::builder().build().unwrap(), config);
    }

    #[test]
    fn test_zero_batch_rejected() {
        let err = StorageConfig::builder().max_keys_per_batch(0).build().unwrap_err();
        assert!(matches!(err, ConfigError::BelowMinimum { field: "max_keys_per_batch", .. }));
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let config: StorageConfig =
            serde_json::from_str(r#"{"alarm_handler": true, "size_limits": {"max_key_size": 16}}"#)
                .unwrap();
        assert!(config.alarm_handler());
        assert_eq!(config.size_limits().max_key_size(), 16);
        assert_eq!(config.size_limits().max_value_size(), ENFORCED_MAX_VALUE_SIZE);
    }

    #[test]
    fn test_deserialize_rejects_unknown_and_invalid() {
        assert!(serde_json::from_str::<StorageConfig>(r#"{"max_keys": 5}"#).is_err());
        assert!(serde_json::from_str::<StorageConfig>(r#"{"max_keys_per_batch": 0}"#).is_err());
    }

    #[test]
    fn test_round_trips_through_serde() {
        let config = StorageConfig::builder().max_keys_per_batch(7).direct_io(true).build().unwrap();
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(serde_json::from_str::<StorageConfig>(&json).unwrap(), config);
    }

    #[test]
    fn test_with_direct_io_keeps_other_fields() {
        let config = StorageConfig::builder().max_keys_per_batch(3).build().unwrap();
        let direct = config.with_direct_io();
        assert!(direct.direct_io());
        assert_eq!(direct.max_keys_per_batch(), 3);
    }
}
