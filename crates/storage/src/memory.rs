//! In-memory cache engine.
//!
//! [`MemoryEngine`] implements [`CacheEngine`] over a [`BTreeMap`] and is the
//! engine used in tests and local development. It models just enough of a
//! real cache to exercise the facade:
//!
//! - **Residency**: every key the engine knows about is either resident (read or written without
//!   `no_cache`) or not. Reads of resident keys report [`CacheStatus::Cached`]; all others report
//!   [`CacheStatus::Uncached`] and become resident unless the read bypassed the cache.
//! - **Transactions**: buffered writes with read-your-writes over point reads and ranges, applied
//!   atomically on commit.
//! - **Test hooks**: a call counter, one-shot fault injection and a flush hold that makes every
//!   write return backpressure until released.
//!
//! # Example
//!
//! ```
//! use actor_storage::{CacheStatus, MemoryEngine};
//!
//! let engine = MemoryEngine::new();
//! engine.seed(b"k".to_vec(), vec![0xff, 15, b'1']);
//! assert_eq!(engine.status_of(b"k"), Some(CacheStatus::Uncached));
//! ```
//!
//! # Limitations
//!
//! - Data is not persisted; all data is lost when the process exits
//! - Negative lookups are never cached
//! - Transactions do not detect conflicting writes; the facade serializes transaction bodies

use std::{
    collections::{BTreeMap, BTreeSet},
    ops::Bound,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{FutureExt, future};
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tracing::debug;

use crate::{
    engine::{
        CacheEngine, CacheOps, DeleteOutcome, EngineTransaction, PendingAck, PendingRead,
        PendingWrite,
    },
    error::{StorageError, StorageResult},
    options::{ReadOptions, WriteOptions},
    types::{CacheStatus, CachedEntry},
};

#[derive(Default)]
struct EngineState {
    data: BTreeMap<Vec<u8>, Bytes>,
    resident: BTreeSet<Vec<u8>>,
    alarm: Option<DateTime<Utc>>,
}

impl EngineState {
    /// Reports where `key` would be served from and updates residency.
    fn read_status(&mut self, key: &[u8], options: ReadOptions) -> CacheStatus {
        if self.resident.contains(key) {
            CacheStatus::Cached
        } else {
            if !options.no_cache {
                self.resident.insert(key.to_vec());
            }
            CacheStatus::Uncached
        }
    }

    fn write(&mut self, key: Vec<u8>, value: Bytes, no_cache: bool) {
        if no_cache {
            self.resident.remove(&key);
        } else {
            self.resident.insert(key.clone());
        }
        self.data.insert(key, value);
    }

    fn remove(&mut self, key: &[u8]) -> bool {
        self.resident.remove(key);
        self.data.remove(key).is_some()
    }

    /// Entries in `[start, end)`, ascending, tagged with their status.
    fn scan(&mut self, start: &[u8], end: Option<&[u8]>, options: ReadOptions) -> Vec<CachedEntry> {
        if end.is_some_and(|e| e <= start) {
            return Vec::new();
        }
        let upper = end.map_or(Bound::Unbounded, Bound::Excluded);
        let found: Vec<(Vec<u8>, Bytes)> = self
            .data
            .range::<[u8], _>((Bound::Included(start), upper))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        found
            .into_iter()
            .map(|(key, value)| {
                let status = self.read_status(&key, options);
                CachedEntry::new(Bytes::from(key), value, status)
            })
            .collect()
    }
}

struct EngineInner {
    state: RwLock<EngineState>,
    calls: AtomicU64,
    fault: Mutex<Option<StorageError>>,
    flush_hold: Mutex<Option<watch::Receiver<bool>>>,
}

/// In-memory [`CacheEngine`].
///
/// # Cloning
///
/// `MemoryEngine` is cheaply cloneable via [`Arc`]. All clones share the
/// same underlying data, counters and hooks.
#[derive(Clone)]
pub struct MemoryEngine {
    inner: Arc<EngineInner>,
}

impl MemoryEngine {
    /// Creates an empty engine.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(EngineInner {
                state: RwLock::new(EngineState::default()),
                calls: AtomicU64::new(0),
                fault: Mutex::new(None),
                flush_hold: Mutex::new(None),
            }),
        }
    }

    /// Stores a raw value directly in the backing store, bypassing the cache.
    ///
    /// The key is not resident afterwards, as if the actor had just restarted.
    pub fn seed(&self, key: impl Into<Vec<u8>>, value: impl Into<Bytes>) {
        let mut state = self.inner.state.write();
        state.write(key.into(), value.into(), true);
    }

    /// Returns the raw stored bytes for `key` without touching residency.
    #[must_use]
    pub fn raw_value(&self, key: &[u8]) -> Option<Bytes> {
        self.inner.state.read().data.get(key).cloned()
    }

    /// Returns where a read of `key` would currently be served from, or
    /// `None` if the key does not exist.
    #[must_use]
    pub fn status_of(&self, key: &[u8]) -> Option<CacheStatus> {
        let state = self.inner.state.read();
        state.data.contains_key(key).then(|| {
            if state.resident.contains(key) { CacheStatus::Cached } else { CacheStatus::Uncached }
        })
    }

    /// Drops every key from the cache. Stored data is kept.
    pub fn evict_all(&self) {
        self.inner.state.write().resident.clear();
    }

    /// Number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.state.read().data.len()
    }

    /// Returns `true` if no keys are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The alarm currently stored.
    #[must_use]
    pub fn alarm(&self) -> Option<DateTime<Utc>> {
        self.inner.state.read().alarm
    }

    /// Number of engine calls made so far, across the root handle and all transactions.
    #[must_use]
    pub fn call_count(&self) -> u64 {
        self.inner.calls.load(Ordering::Relaxed)
    }

    /// Makes the next engine call fail with `error`.
    pub fn fail_next(&self, error: StorageError) {
        *self.inner.fault.lock() = Some(error);
    }

    /// Makes every write return backpressure until the returned hold is
    /// released or dropped.
    #[must_use = "dropping the hold releases it immediately"]
    pub fn hold_flushes(&self) -> FlushHold {
        let (tx, rx) = watch::channel(false);
        *self.inner.flush_hold.lock() = Some(rx);
        FlushHold { tx }
    }

    /// Counts a call and fires any injected fault.
    fn enter(&self, op: &'static str) -> StorageResult<()> {
        self.inner.calls.fetch_add(1, Ordering::Relaxed);
        if let Some(error) = self.inner.fault.lock().take() {
            debug!(op, error = %error, "injected engine fault");
            return Err(error);
        }
        Ok(())
    }

    fn pending_flush(&self) -> Option<PendingWrite> {
        let mut rx = self.inner.flush_hold.lock().clone()?;
        if *rx.borrow() {
            return None;
        }
        Some(
            async move {
                rx.wait_for(|released| *released)
                    .await
                    .map(|_| ())
                    .map_err(|_| StorageError::internal("flush hold dropped"))
            }
            .boxed(),
        )
    }

    fn ranged(
        &self,
        start: &[u8],
        end: Option<&[u8]>,
        limit: Option<usize>,
        reverse: bool,
        options: ReadOptions,
    ) -> Vec<CachedEntry> {
        let mut entries = self.inner.state.write().scan(start, end, options);
        if reverse {
            entries.reverse();
        }
        entries.truncate(limit.unwrap_or(usize::MAX));
        entries
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryEngine")
            .field("keys", &self.len())
            .field("calls", &self.call_count())
            .finish_non_exhaustive()
    }
}

/// Keeps [`MemoryEngine`] writes under backpressure while alive.
#[derive(Debug)]
pub struct FlushHold {
    tx: watch::Sender<bool>,
}

impl FlushHold {
    /// Releases every write waiting on this hold.
    pub fn release(self) {}
}

impl Drop for FlushHold {
    fn drop(&mut self) {
        // Receivers may already be gone.
        let _ = self.tx.send(true);
    }
}

impl CacheOps for MemoryEngine {
    #[tracing::instrument(level = "debug", skip(self, keys), fields(count = keys.len()))]
    fn get(&self, keys: &[Bytes], options: ReadOptions) -> PendingRead<Vec<CachedEntry>> {
        if let Err(error) = self.enter("get") {
            return resolved(Err(error));
        }
        let mut state = self.inner.state.write();
        let mut entries = Vec::with_capacity(keys.len());
        for key in keys {
            let Some(value) = state.data.get(key.as_ref()).cloned() else { continue };
            let status = state.read_status(key, options);
            entries.push(CachedEntry::new(key.clone(), value, status));
        }
        resolved(Ok(entries))
    }

    #[tracing::instrument(level = "debug", skip(self))]
    fn get_alarm(&self, _options: ReadOptions) -> PendingRead<Option<DateTime<Utc>>> {
        resolved(self.enter("get_alarm").map(|()| self.alarm()))
    }

    #[tracing::instrument(level = "debug", skip(self, start, end))]
    fn list(
        &self,
        start: &[u8],
        end: Option<&[u8]>,
        limit: Option<usize>,
        options: ReadOptions,
    ) -> PendingRead<Vec<CachedEntry>> {
        resolved(self.enter("list").map(|()| self.ranged(start, end, limit, false, options)))
    }

    #[tracing::instrument(level = "debug", skip(self, start, end))]
    fn list_reverse(
        &self,
        start: &[u8],
        end: Option<&[u8]>,
        limit: Option<usize>,
        options: ReadOptions,
    ) -> PendingRead<Vec<CachedEntry>> {
        resolved(self.enter("list_reverse").map(|()| self.ranged(start, end, limit, true, options)))
    }

    fn put(
        &self,
        entries: Vec<(Bytes, Bytes)>,
        options: WriteOptions,
    ) -> StorageResult<Option<PendingWrite>> {
        self.enter("put")?;
        {
            let mut state = self.inner.state.write();
            for (key, value) in entries {
                state.write(key.to_vec(), value, options.no_cache);
            }
        }
        Ok(self.pending_flush())
    }

    #[tracing::instrument(level = "debug", skip(self, keys), fields(count = keys.len()))]
    fn delete(&self, keys: Vec<Bytes>, _options: WriteOptions) -> StorageResult<DeleteOutcome> {
        self.enter("delete")?;
        let deleted = {
            let mut state = self.inner.state.write();
            keys.iter().filter(|key| state.remove(key)).count()
        };
        Ok(DeleteOutcome {
            count: resolved(Ok(u32::try_from(deleted).unwrap_or(u32::MAX))),
            backpressure: self.pending_flush(),
        })
    }

    fn set_alarm(
        &self,
        time: Option<DateTime<Utc>>,
        _options: WriteOptions,
    ) -> StorageResult<Option<PendingWrite>> {
        self.enter("set_alarm")?;
        self.inner.state.write().alarm = time;
        Ok(self.pending_flush())
    }
}

impl CacheEngine for MemoryEngine {
    fn delete_all(&self, _options: WriteOptions) -> StorageResult<DeleteOutcome> {
        self.enter("delete_all")?;
        let removed = {
            let mut state = self.inner.state.write();
            let removed = state.data.len();
            state.data.clear();
            state.resident.clear();
            removed
        };
        Ok(DeleteOutcome {
            count: resolved(Ok(u32::try_from(removed).unwrap_or(u32::MAX))),
            backpressure: self.pending_flush(),
        })
    }

    fn begin_transaction(&self) -> Box<dyn EngineTransaction> {
        Box::new(MemoryEngineTransaction::new(self.clone()))
    }

    fn on_no_pending_flush(&self) -> Option<PendingAck> {
        self.pending_flush()
    }
}

/// A read result that is already known.
fn resolved<T: Send + 'static>(result: StorageResult<T>) -> PendingRead<T> {
    future::ready(result).boxed()
}

/// A buffered write: `Some` stores a value, `None` deletes the key.
type BufferedWrite = Option<Bytes>;

/// [`EngineTransaction`] over a [`MemoryEngine`].
///
/// Writes are buffered until commit; reads overlay the buffer on the
/// engine's current contents. The write buffer and the engine state are
/// never locked at the same time.
pub struct MemoryEngineTransaction {
    engine: MemoryEngine,
    writes: Mutex<BTreeMap<Vec<u8>, BufferedWrite>>,
    alarm: Mutex<Option<Option<DateTime<Utc>>>>,
}

impl MemoryEngineTransaction {
    fn new(engine: MemoryEngine) -> Self {
        Self { engine, writes: Mutex::new(BTreeMap::new()), alarm: Mutex::new(None) }
    }

    fn buffered(&self, key: &[u8]) -> Option<BufferedWrite> {
        self.writes.lock().get(key).cloned()
    }

    fn overlay(
        &self,
        start: &[u8],
        end: Option<&[u8]>,
        limit: Option<usize>,
        reverse: bool,
        options: ReadOptions,
    ) -> Vec<CachedEntry> {
        let base = self.engine.inner.state.write().scan(start, end, options);
        let mut merged: BTreeMap<Bytes, (Bytes, CacheStatus)> =
            base.into_iter().map(|e| (e.key, (e.value, e.status))).collect();

        let writes = self.writes.lock();
        for (key, write) in writes.iter() {
            let in_range = key.as_slice() >= start && end.is_none_or(|e| key.as_slice() < e);
            if !in_range {
                continue;
            }
            match write {
                Some(value) => {
                    merged.insert(Bytes::from(key.clone()), (value.clone(), CacheStatus::Cached));
                },
                None => {
                    merged.remove(key.as_slice());
                },
            }
        }
        drop(writes);

        let entries = merged.into_iter().map(|(key, (value, status))| {
            CachedEntry::new(key, value, status)
        });
        let limit = limit.unwrap_or(usize::MAX);
        if reverse { entries.rev().take(limit).collect() } else { entries.take(limit).collect() }
    }

    fn exists(&self, key: &[u8]) -> bool {
        match self.buffered(key) {
            Some(write) => write.is_some(),
            None => self.engine.inner.state.read().data.contains_key(key),
        }
    }
}

impl std::fmt::Debug for MemoryEngineTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryEngineTransaction")
            .field("buffered", &self.writes.lock().len())
            .finish_non_exhaustive()
    }
}

impl CacheOps for MemoryEngineTransaction {
    fn get(&self, keys: &[Bytes], options: ReadOptions) -> PendingRead<Vec<CachedEntry>> {
        if let Err(error) = self.engine.enter("txn_get") {
            return resolved(Err(error));
        }
        let buffered: Vec<Option<BufferedWrite>> =
            keys.iter().map(|key| self.buffered(key)).collect();

        let mut state = self.engine.inner.state.write();
        let mut entries = Vec::with_capacity(keys.len());
        for (key, write) in keys.iter().zip(buffered) {
            match write {
                Some(Some(value)) => {
                    entries.push(CachedEntry::new(key.clone(), value, CacheStatus::Cached));
                },
                Some(None) => {},
                None => {
                    let Some(value) = state.data.get(key.as_ref()).cloned() else { continue };
                    let status = state.read_status(key, options);
                    entries.push(CachedEntry::new(key.clone(), value, status));
                },
            }
        }
        resolved(Ok(entries))
    }

    fn get_alarm(&self, _options: ReadOptions) -> PendingRead<Option<DateTime<Utc>>> {
        if let Err(error) = self.engine.enter("txn_get_alarm") {
            return resolved(Err(error));
        }
        let buffered = *self.alarm.lock();
        resolved(Ok(buffered.unwrap_or_else(|| self.engine.alarm())))
    }

    fn list(
        &self,
        start: &[u8],
        end: Option<&[u8]>,
        limit: Option<usize>,
        options: ReadOptions,
    ) -> PendingRead<Vec<CachedEntry>> {
        resolved(
            self.engine.enter("txn_list").map(|()| self.overlay(start, end, limit, false, options)),
        )
    }

    fn list_reverse(
        &self,
        start: &[u8],
        end: Option<&[u8]>,
        limit: Option<usize>,
        options: ReadOptions,
    ) -> PendingRead<Vec<CachedEntry>> {
        resolved(
            self.engine
                .enter("txn_list_reverse")
                .map(|()| self.overlay(start, end, limit, true, options)),
        )
    }

    fn put(
        &self,
        entries: Vec<(Bytes, Bytes)>,
        _options: WriteOptions,
    ) -> StorageResult<Option<PendingWrite>> {
        self.engine.enter("txn_put")?;
        let mut writes = self.writes.lock();
        for (key, value) in entries {
            writes.insert(key.to_vec(), Some(value));
        }
        Ok(None)
    }

    fn delete(&self, keys: Vec<Bytes>, _options: WriteOptions) -> StorageResult<DeleteOutcome> {
        self.engine.enter("txn_delete")?;
        let mut deleted = 0u32;
        for key in keys {
            if self.exists(&key) {
                deleted += 1;
            }
            self.writes.lock().insert(key.to_vec(), None);
        }
        Ok(DeleteOutcome { count: resolved(Ok(deleted)), backpressure: None })
    }

    fn set_alarm(
        &self,
        time: Option<DateTime<Utc>>,
        _options: WriteOptions,
    ) -> StorageResult<Option<PendingWrite>> {
        self.engine.enter("txn_set_alarm")?;
        *self.alarm.lock() = Some(time);
        Ok(None)
    }
}

impl EngineTransaction for MemoryEngineTransaction {
    fn commit(&self) -> StorageResult<Option<PendingWrite>> {
        self.engine.enter("commit")?;
        let writes = std::mem::take(&mut *self.writes.lock());
        let alarm = self.alarm.lock().take();
        {
            let mut state = self.engine.inner.state.write();
            for (key, write) in writes {
                match write {
                    Some(value) => state.write(key, value, false),
                    None => {
                        state.remove(&key);
                    },
                }
            }
            if let Some(alarm) = alarm {
                state.alarm = alarm;
            }
        }
        Ok(self.engine.pending_flush())
    }

    fn rollback(&self) -> PendingAck {
        self.writes.lock().clear();
        self.alarm.lock().take();
        resolved(self.engine.enter("rollback"))
    }
}
