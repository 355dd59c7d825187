//! Storage error types and result alias.
//!
//! Errors fall into three families:
//!
//! - **Usage errors** - the caller broke a documented contract (oversized key, too many keys in
//!   one batch, conflicting list bounds, an operation on a finished transaction). These are raised
//!   before the cache engine is consulted and are always fixable by correcting the input.
//!   [`StorageError::is_usage`] identifies them.
//! - **Engine failures** - [`Conflict`](StorageError::Conflict),
//!   [`Connection`](StorageError::Connection), [`Timeout`](StorageError::Timeout) and
//!   [`Internal`](StorageError::Internal) errors produced by the cache engine. The facade passes
//!   them through unchanged.
//! - **Decode failures** - a stored value could not be deserialized. These are reported as
//!   [`Internal`](StorageError::Internal) with the codec error attached as the source.
//!
//! # Example
//!
//! ```
//! use actor_storage::{StorageError, StorageResult};
//!
//! fn check_limit(limit: i64) -> StorageResult<()> {
//!     if limit <= 0 {
//!         return Err(StorageError::invalid_argument("List limit must be positive."));
//!     }
//!     Ok(())
//! }
//!
//! assert!(check_limit(0).unwrap_err().is_usage());
//! ```

use std::sync::Arc;

use thiserror::Error;

/// A boxed error type for source chain tracking.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
///
/// # Non-exhaustive
///
/// New variants may be added in minor releases. Downstream match expressions
/// must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    /// An argument violated the operation's contract.
    #[error("{message}")]
    InvalidArgument {
        /// Description of the violated contract.
        message: String,
    },

    /// A key or value exceeded its configured size limit.
    #[error("{kind} size {actual} exceeds limit of {limit} bytes")]
    SizeLimitExceeded {
        /// Which payload was too large (`"key"` or `"value"`).
        kind: &'static str,
        /// Actual size in bytes.
        actual: usize,
        /// Configured limit in bytes.
        limit: usize,
    },

    /// A batch call named more keys than the engine accepts at once.
    #[error("{op} was called with {count} keys, but the maximum is {limit}")]
    TooManyKeys {
        /// The operation that was rejected, e.g. `"put()"`.
        op: &'static str,
        /// Number of keys supplied (cumulative, for transactions).
        count: usize,
        /// Configured batch limit.
        limit: usize,
    },

    /// An operation was attempted on a transaction that already committed or rolled back.
    #[error("Cannot call {op} on a transaction that has already {state}")]
    TransactionFinished {
        /// The operation that was rejected.
        op: &'static str,
        /// `"committed"` or `"rolled back"`.
        state: &'static str,
    },

    /// The operation is not available in this context.
    #[error("Cannot call {op}: {reason}")]
    Unsupported {
        /// The operation that was rejected.
        op: &'static str,
        /// Why it is unavailable.
        reason: &'static str,
    },

    /// The engine rejected a write due to a concurrent modification.
    #[error("Transaction conflict")]
    Conflict,

    /// The engine could not reach its backing store.
    #[error("Connection error: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
        /// The underlying error that caused this connection failure.
        #[source]
        source: Option<BoxError>,
    },

    /// Internal engine error, or a stored value that failed to decode.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
        /// The underlying error that caused this internal failure.
        #[source]
        source: Option<BoxError>,
    },

    /// Operation timed out.
    #[error("Operation timeout")]
    Timeout,
}

impl StorageError {
    /// Creates a new `InvalidArgument` error.
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument { message: message.into() }
    }

    /// Creates a new `SizeLimitExceeded` error.
    #[must_use]
    pub fn size_limit_exceeded(kind: &'static str, actual: usize, limit: usize) -> Self {
        Self::SizeLimitExceeded { kind, actual, limit }
    }

    /// Creates a new `TooManyKeys` error.
    #[must_use]
    pub fn too_many_keys(op: &'static str, count: usize, limit: usize) -> Self {
        Self::TooManyKeys { op, count, limit }
    }

    /// Creates a new `Conflict` error.
    #[must_use]
    pub fn conflict() -> Self {
        Self::Conflict
    }

    /// Creates a new `Connection` error with the given message.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection { message: message.into(), source: None }
    }

    /// Creates a new `Internal` error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into(), source: None }
    }

    /// Creates a new `Internal` error with a message and source error.
    #[must_use]
    pub fn internal_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Internal { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Timeout` error.
    #[must_use]
    pub fn timeout() -> Self {
        Self::Timeout
    }

    /// Returns `true` if the caller violated a documented contract.
    ///
    /// Usage errors are raised before any cache engine call.
    #[must_use]
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            Self::InvalidArgument { .. }
                | Self::SizeLimitExceeded { .. }
                | Self::TooManyKeys { .. }
                | Self::TransactionFinished { .. }
                | Self::Unsupported { .. }
        )
    }
}

/// Errors raised while validating configuration values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// A field was below its permitted minimum.
    #[error("{field} must be at least {min}, got {value}")]
    BelowMinimum {
        /// Field name.
        field: &'static str,
        /// Minimum permitted value.
        min: String,
        /// Value supplied.
        value: String,
    },

    /// A field was above its permitted maximum.
    #[error("{field} must be at most {max}, got {value}")]
    AboveMaximum {
        /// Field name.
        field: &'static str,
        /// Maximum permitted value.
        max: String,
        /// Value supplied.
        value: String,
    },
}
