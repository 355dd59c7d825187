//! Shared test utilities for storage facade testing.
//!
//! Helpers for building a [`Storage`] over a [`MemoryEngine`], controlling
//! time, generating test data and asserting on [`StorageResult`] values.
//! Feature-gated behind `testutil` to keep them out of production builds.
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! actor-storage = { path = "../storage", features = ["testutil"] }
//! ```
//!
//! ```no_run
//! // Requires the `testutil` feature to be enabled.
//! use actor_storage::testutil::{TestActor, make_key};
//! ```

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde_json::Value;

use crate::{
    config::StorageConfig,
    context::{ActorContext, Clock},
    error::{StorageError, StorageResult},
    memory::MemoryEngine,
    metrics::ActorMetrics,
    storage::Storage,
};

/// A [`Clock`] that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    /// Creates a clock stopped at `now`.
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now: Arc::new(Mutex::new(now)) }
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }

    /// Sets the clock.
    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// A storage handle wired to inspectable collaborators.
#[derive(Debug, Clone)]
pub struct TestActor {
    /// The facade under test.
    pub storage: Storage,
    /// The engine behind it.
    pub engine: MemoryEngine,
    /// The meter it bills to.
    pub metrics: ActorMetrics,
    /// The clock its context reads.
    pub clock: ManualClock,
}

impl TestActor {
    /// Builds an actor with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(StorageConfig::default())
    }

    /// Builds an actor with `config`.
    #[must_use]
    pub fn with_config(config: StorageConfig) -> Self {
        let engine = MemoryEngine::new();
        let metrics = ActorMetrics::new();
        let clock = ManualClock::new(fixed_now());
        let context = ActorContext::builder()
            .meter(Arc::new(metrics.clone()))
            .clock(Arc::new(clock.clone()))
            .build();
        let storage =
            Storage::builder().engine(Arc::new(engine.clone())).context(context).config(config).build();
        Self { storage, engine, metrics, clock }
    }

    /// Waits for deferred billing and rollback acknowledgements.
    pub async fn settle(&self) {
        self.storage.context().drain_tasks().await;
    }
}

impl Default for TestActor {
    fn default() -> Self {
        Self::new()
    }
}

/// The instant [`TestActor`] clocks start at: 2024-01-01T00:00:00Z.
#[must_use]
pub fn fixed_now() -> DateTime<Utc> {
    DateTime::from_timestamp(1_704_067_200, 0).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Create a deterministic test key from a prefix and index.
///
/// Produces keys like `"prefix:000042"`. The zero-padding keeps
/// lexicographic order equal to numeric order, which range tests rely on.
#[must_use]
pub fn make_key(prefix: &str, idx: usize) -> Vec<u8> {
    format!("{prefix}:{idx:06}").into_bytes()
}

/// Create a string value whose JSON encoding is exactly `encoded_len` bytes
/// with [`JsonCodec`](crate::JsonCodec) framing (two header bytes and two quotes).
///
/// # Panics
///
/// Panics if `encoded_len < 4`.
#[must_use]
pub fn make_value(encoded_len: usize) -> Value {
    assert!(encoded_len >= 4, "encoded value needs room for header and quotes");
    Value::String("a".repeat(encoded_len - 4))
}

/// Assert that a [`StorageResult`] is a usage error.
///
/// # Examples
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use actor_storage::assert_usage_error;
/// use actor_storage::{StorageError, StorageResult};
///
/// let result: StorageResult<()> = Err(StorageError::invalid_argument("bad"));
/// assert_usage_error!(result);
/// ```
#[macro_export]
macro_rules! assert_usage_error {
    ($result:expr) => {
        match &$result {
            Err(e) => assert!(e.is_usage(), "expected a usage error, got: {e:?}"),
            Ok(_) => panic!("expected a usage error, got Ok"),
        }
    };
    ($result:expr, $msg:expr) => {
        match &$result {
            Err(e) => assert!(e.is_usage(), "{}: expected a usage error, got: {e:?}", $msg),
            Ok(_) => panic!("{}: expected a usage error, got Ok", $msg),
        }
    };
}

/// Assert that a [`StorageResult`] is `Ok`.
///
/// Returns the inner value on success, panics with a descriptive message
/// on failure.
#[macro_export]
macro_rules! assert_storage_ok {
    ($result:expr) => {
        match $result {
            Ok(val) => val,
            Err(e) => panic!("expected Ok, got StorageError: {e:?}"),
        }
    };
    ($result:expr, $msg:expr) => {
        match $result {
            Ok(val) => val,
            Err(e) => panic!("{}: expected Ok, got StorageError: {e:?}", $msg),
        }
    };
}

/// Helper to verify that a result is a [`StorageError::TransactionFinished`] error.
pub fn is_transaction_finished<T>(result: &StorageResult<T>) -> bool {
    matches!(result, Err(StorageError::TransactionFinished { .. }))
}
