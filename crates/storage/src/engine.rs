//! Cache engine contract.
//!
//! The cache engine executes reads and writes against the actor's cache and
//! its durable backing store, and reports for every returned entry whether it
//! was served from cache. The storage facade never talks to a backing store
//! directly: it decides *what* to issue and *how to account for it*.
//!
//! Two handles implement the shared [`CacheOps`] surface:
//!
//! - [`CacheEngine`], the root handle owned by [`Storage`](crate::Storage), which adds the
//!   operations that only make sense outside a transaction;
//! - [`EngineTransaction`], one per `transaction()` call, which buffers writes until `commit`.
//!
//! Every call takes effect at the moment it is made: writes are applied and
//! reads observe the engine's contents before the method returns. What comes
//! back is a future for the *result*, which the facade may deliver later,
//! behind the actor's input gate, without the operation moving in the order
//! of engine calls. A write's optional [`PendingWrite`] is a backpressure
//! signal: the caller should not consider the write settled until it resolves.
//!
//! See [`MemoryEngine`](crate::MemoryEngine) for a reference implementation.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;

use crate::{
    error::StorageResult,
    options::{ReadOptions, WriteOptions},
    types::CachedEntry,
};

/// Result of an engine read, captured when the read was issued.
pub type PendingRead<T> = BoxFuture<'static, StorageResult<T>>;

/// Backpressure or durability signal returned by an engine write.
pub type PendingWrite = BoxFuture<'static, StorageResult<()>>;

/// Fire-and-forget acknowledgement, e.g. of a rollback or a flush.
pub type PendingAck = BoxFuture<'static, StorageResult<()>>;

/// Result of an engine `delete` or `delete_all`.
pub struct DeleteOutcome {
    /// Resolves to the number of keys that existed and were removed.
    pub count: PendingRead<u32>,
    /// Backpressure to await before the delete is settled.
    pub backpressure: Option<PendingWrite>,
}

impl std::fmt::Debug for DeleteOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeleteOutcome")
            .field("backpressure", &self.backpressure.is_some())
            .finish_non_exhaustive()
    }
}

/// Operations shared by the root engine handle and engine transactions.
pub trait CacheOps: Send + Sync {
    /// Reads the given keys. Missing keys are omitted from the result.
    fn get(&self, keys: &[Bytes], options: ReadOptions) -> PendingRead<Vec<CachedEntry>>;

    /// Reads the scheduled alarm time, if any.
    fn get_alarm(&self, options: ReadOptions) -> PendingRead<Option<DateTime<Utc>>>;

    /// Lists entries in `[start, end)` in ascending key order.
    fn list(
        &self,
        start: &[u8],
        end: Option<&[u8]>,
        limit: Option<usize>,
        options: ReadOptions,
    ) -> PendingRead<Vec<CachedEntry>>;

    /// Lists entries in `[start, end)` in descending key order.
    fn list_reverse(
        &self,
        start: &[u8],
        end: Option<&[u8]>,
        limit: Option<usize>,
        options: ReadOptions,
    ) -> PendingRead<Vec<CachedEntry>>;

    /// Writes entries. The write is visible to subsequent reads immediately.
    ///
    /// # Errors
    ///
    /// Returns an engine failure if the write cannot be accepted.
    fn put(
        &self,
        entries: Vec<(Bytes, Bytes)>,
        options: WriteOptions,
    ) -> StorageResult<Option<PendingWrite>>;

    /// Deletes keys. The delete is visible to subsequent reads immediately.
    ///
    /// # Errors
    ///
    /// Returns an engine failure if the delete cannot be accepted.
    fn delete(&self, keys: Vec<Bytes>, options: WriteOptions) -> StorageResult<DeleteOutcome>;

    /// Schedules the alarm, or clears it when `time` is `None`.
    ///
    /// # Errors
    ///
    /// Returns an engine failure if the write cannot be accepted.
    fn set_alarm(
        &self,
        time: Option<DateTime<Utc>>,
        options: WriteOptions,
    ) -> StorageResult<Option<PendingWrite>>;
}

/// The root engine handle.
pub trait CacheEngine: CacheOps {
    /// Removes every key. The alarm is left in place.
    ///
    /// # Errors
    ///
    /// Returns an engine failure if the request cannot be accepted.
    fn delete_all(&self, options: WriteOptions) -> StorageResult<DeleteOutcome>;

    /// Starts a new transaction over this engine.
    fn begin_transaction(&self) -> Box<dyn EngineTransaction>;

    /// Resolves once every write issued so far has been flushed, or `None` if
    /// nothing is pending.
    fn on_no_pending_flush(&self) -> Option<PendingAck>;
}

/// A transaction handle issued by [`CacheEngine::begin_transaction`].
///
/// Reads see the transaction's own buffered writes. Nothing is visible
/// outside the transaction until [`commit`](EngineTransaction::commit).
pub trait EngineTransaction: CacheOps {
    /// Applies every buffered write atomically.
    ///
    /// # Errors
    ///
    /// Returns [`Conflict`](crate::StorageError::Conflict) or another engine
    /// failure if the writes cannot be applied. Nothing is applied on error.
    fn commit(&self) -> StorageResult<Option<PendingWrite>>;

    /// Discards every buffered write.
    fn rollback(&self) -> PendingAck;
}
