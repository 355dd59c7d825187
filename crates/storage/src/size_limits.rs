//! Key, value and batch size validation.
//!
//! Every write path validates each entry with [`validate_sizes`], and every
//! keyed read or delete validates with [`validate_key_size`], before the cache
//! engine is consulted. Batch calls additionally go through
//! [`validate_batch_len`].
//!
//! # Limits
//!
//! | Limit | Value |
//! |-------|-------|
//! | key size | 1 ..= 2048 bytes |
//! | advertised value size | 131 072 bytes (128 KiB) |
//! | enforced value size | 131 106 bytes (128 KiB + 34) |
//! | keys per batch call | 128 (configurable) |
//!
//! The enforced value limit is larger than the advertised one so that a value
//! sitting exactly at 128 KiB still fits once the codec has added its framing.

use crate::{ConfigError, StorageError};

/// Maximum key size in bytes.
pub const MAX_KEY_SIZE: usize = 2048;

/// Value size callers are told they may store.
pub const ADVERTISED_MAX_VALUE_SIZE: usize = 128 * 1024;

/// Codec framing overhead absorbed on top of [`ADVERTISED_MAX_VALUE_SIZE`].
pub const VALUE_FRAMING_ALLOWANCE: usize = 34;

/// Value size actually enforced on encoded values.
pub const ENFORCED_MAX_VALUE_SIZE: usize = ADVERTISED_MAX_VALUE_SIZE + VALUE_FRAMING_ALLOWANCE;

/// Default maximum number of keys accepted by one `get`/`put`/`delete` call.
pub const DEFAULT_MAX_KEYS: usize = 128;

/// Configurable size limits for keys and encoded values.
///
/// # Example
///
/// ```
/// use actor_storage::SizeLimits;
///
/// let limits = SizeLimits::new(256, 1024).unwrap();
/// assert_eq!(limits.max_key_size(), 256);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "RawSizeLimits", into = "RawSizeLimits")]
pub struct SizeLimits {
    max_key_size: usize,
    max_value_size: usize,
}

impl SizeLimits {
    /// Creates size limits with the given bounds.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::BelowMinimum`] if either limit is zero.
    pub fn new(max_key_size: usize, max_value_size: usize) -> Result<Self, ConfigError> {
        if max_key_size == 0 {
            return Err(ConfigError::BelowMinimum {
                field: "max_key_size",
                min: "1".into(),
                value: "0".into(),
            });
        }
        if max_value_size == 0 {
            return Err(ConfigError::BelowMinimum {
                field: "max_value_size",
                min: "1".into(),
                value: "0".into(),
            });
        }
        Ok(Self { max_key_size, max_value_size })
    }

    /// Returns the maximum allowed key size in bytes.
    #[must_use]
    pub fn max_key_size(&self) -> usize {
        self.max_key_size
    }

    /// Returns the maximum allowed encoded value size in bytes.
    #[must_use]
    pub fn max_value_size(&self) -> usize {
        self.max_value_size
    }
}

impl Default for SizeLimits {
    fn default() -> Self {
        Self { max_key_size: MAX_KEY_SIZE, max_value_size: ENFORCED_MAX_VALUE_SIZE }
    }
}

#[derive(serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSizeLimits {
    #[serde(default = "default_max_key_size")]
    max_key_size: usize,
    #[serde(default = "default_max_value_size")]
    max_value_size: usize,
}

fn default_max_key_size() -> usize {
    MAX_KEY_SIZE
}

fn default_max_value_size() -> usize {
    ENFORCED_MAX_VALUE_SIZE
}

impl TryFrom<RawSizeLimits> for SizeLimits {
    type Error = ConfigError;

    fn try_from(raw: RawSizeLimits) -> Result<Self, Self::Error> {
        Self::new(raw.max_key_size, raw.max_value_size)
    }
}

impl From<SizeLimits> for RawSizeLimits {
    fn from(limits: SizeLimits) -> Self {
        Self { max_key_size: limits.max_key_size, max_value_size: limits.max_value_size }
    }
}

/// Validates key and encoded value sizes against the given limits.
pub fn validate_sizes(key: &[u8], value: &[u8], limits: &SizeLimits) -> Result<(), StorageError> {
    validate_key_size(key, limits)?;
    if value.len() > limits.max_value_size {
        return Err(StorageError::size_limit_exceeded("value", value.len(), limits.max_value_size));
    }
    Ok(())
}

/// Validates key size only (reads and deletes).
pub fn validate_key_size(key: &[u8], limits: &SizeLimits) -> Result<(), StorageError> {
    if key.is_empty() {
        return Err(StorageError::invalid_argument("Keys must be at least one byte long."));
    }
    if key.len() > limits.max_key_size {
        return Err(StorageError::size_limit_exceeded("key", key.len(), limits.max_key_size));
    }
    Ok(())
}

/// Validates the number of keys supplied to a batch call.
pub fn validate_batch_len(op: &'static str, count: usize, max_keys: usize) -> Result<(), StorageError> {
    if count > max_keys {
        return Err(StorageError::too_many_keys(op, count, max_keys));
    }
    Ok(())
}
