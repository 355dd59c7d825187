//! Billing meter and operation counters.
//!
//! [`StorageMeter`] is the sink the storage facade reports billing units to.
//! Hosts plug their own accounting in; [`ActorMetrics`] is the in-process
//! implementation used by default and in tests.
//!
//! # Memory Ordering
//!
//! All counters use `Ordering::Relaxed`. Each counter is independent and only
//! ever incremented, so a snapshot may observe counters at slightly different
//! points in time relative to each other. That is fine for accounting that is
//! aggregated per request.
//!
//! # Usage
//!
//! ```
//! use actor_storage::metrics::{ActorMetrics, StorageMeter};
//!
//! let metrics = ActorMetrics::new();
//! metrics.add_cached_storage_read_units(2);
//! metrics.add_storage_write_units(1);
//!
//! let snapshot = metrics.snapshot();
//! assert_eq!(snapshot.cached_read_units, 2);
//! assert_eq!(snapshot.write_units, 1);
//! ```

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use tracing::info;

/// Receives billing units from storage operations.
///
/// Implementations must be cheap and non-blocking: they are called from
/// inside storage operations, sometimes from background tasks.
pub trait StorageMeter: Send + Sync {
    /// Read units served from cache.
    fn add_cached_storage_read_units(&self, units: u32);
    /// Read units that required the backing store.
    fn add_uncached_storage_read_units(&self, units: u32);
    /// Write units for puts and alarm changes.
    fn add_storage_write_units(&self, units: u32);
    /// Number of keys deleted, or requested for deletion.
    fn add_storage_deletes(&self, count: u32);

    /// Counts one completed operation. Ignored by default.
    fn record_op(&self, _op: StorageOp) {}

    /// Counts one rolled back transaction. Ignored by default.
    fn record_rollback(&self) {}
}

/// Operation kinds counted by [`ActorMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageOp {
    /// `get` or `get_many`.
    Get,
    /// `list`.
    List,
    /// `put` or `put_many`.
    Put,
    /// `delete`, `delete_many` or `delete_all`.
    Delete,
    /// `get_alarm`, `set_alarm` or `delete_alarm`.
    Alarm,
    /// A committed `transaction`.
    Transaction,
}

/// Point-in-time copy of [`ActorMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq, bon::Builder)]
pub struct MeterSnapshot {
    /// Read units served from cache.
    #[builder(default)]
    pub cached_read_units: u64,
    /// Read units that required the backing store.
    #[builder(default)]
    pub uncached_read_units: u64,
    /// Write units.
    #[builder(default)]
    pub write_units: u64,
    /// Deletes.
    #[builder(default)]
    pub deletes: u64,

    /// Completed read operations.
    #[builder(default)]
    pub get_count: u64,
    /// Completed list operations.
    #[builder(default)]
    pub list_count: u64,
    /// Completed put operations.
    #[builder(default)]
    pub put_count: u64,
    /// Completed delete operations.
    #[builder(default)]
    pub delete_count: u64,
    /// Completed alarm operations.
    #[builder(default)]
    pub alarm_count: u64,
    /// Committed transactions.
    #[builder(default)]
    pub transaction_count: u64,
    /// Transactions rolled back, explicitly or because the body failed.
    #[builder(default)]
    pub rollback_count: u64,
}

impl MeterSnapshot {
    /// Total read units.
    #[must_use]
    pub fn read_units(&self) -> u64 {
        self.cached_read_units + self.uncached_read_units
    }

    /// Fraction of read units served from cache (0.0 - 1.0).
    #[must_use]
    pub fn cache_hit_rate(&self) -> f64 {
        let total = self.read_units();
        if total == 0 { 0.0 } else { self.cached_read_units as f64 / total as f64 }
    }

    /// Total operations counted.
    #[must_use]
    pub fn total_operations(&self) -> u64 {
        self.get_count
            + self.list_count
            + self.put_count
            + self.delete_count
            + self.alarm_count
            + self.transaction_count
    }
}

/// Atomic in-process [`StorageMeter`] with operation counters.
///
/// Clones share the same counters.
#[derive(Clone, Default)]
pub struct ActorMetrics {
    inner: Arc<ActorMetricsInner>,
}

#[derive(Default)]
struct ActorMetricsInner {
    cached_read_units: AtomicU64,
    uncached_read_units: AtomicU64,
    write_units: AtomicU64,
    deletes: AtomicU64,

    get_count: AtomicU64,
    list_count: AtomicU64,
    put_count: AtomicU64,
    delete_count: AtomicU64,
    alarm_count: AtomicU64,
    transaction_count: AtomicU64,
    rollback_count: AtomicU64,
}

impl ActorMetrics {
    /// Creates a zeroed collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one completed operation.
    pub fn record_op(&self, op: StorageOp) {
        let counter = match op {
            StorageOp::Get => &self.inner.get_count,
            StorageOp::List => &self.inner.list_count,
            StorageOp::Put => &self.inner.put_count,
            StorageOp::Delete => &self.inner.delete_count,
            StorageOp::Alarm => &self.inner.alarm_count,
            StorageOp::Transaction => &self.inner.transaction_count,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts one rolled back transaction.
    pub fn record_rollback(&self) {
        self.inner.rollback_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a snapshot of all counters.
    #[must_use]
    pub fn snapshot(&self) -> MeterSnapshot {
        let i = &self.inner;
        MeterSnapshot {
            cached_read_units: i.cached_read_units.load(Ordering::Relaxed),
            uncached_read_units: i.uncached_read_units.load(Ordering::Relaxed),
            write_units: i.write_units.load(Ordering::Relaxed),
            deletes: i.deletes.load(Ordering::Relaxed),
            get_count: i.get_count.load(Ordering::Relaxed),
            list_count: i.list_count.load(Ordering::Relaxed),
            put_count: i.put_count.load(Ordering::Relaxed),
            delete_count: i.delete_count.load(Ordering::Relaxed),
            alarm_count: i.alarm_count.load(Ordering::Relaxed),
            transaction_count: i.transaction_count.load(Ordering::Relaxed),
            rollback_count: i.rollback_count.load(Ordering::Relaxed),
        }
    }

    /// Resets all counters to zero.
    pub fn reset(&self) {
        let i = &self.inner;
        for counter in [
            &i.cached_read_units,
            &i.uncached_read_units,
            &i.write_units,
            &i.deletes,
            &i.get_count,
            &i.list_count,
            &i.put_count,
            &i.delete_count,
            &i.alarm_count,
            &i.transaction_count,
            &i.rollback_count,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    /// Logs current counters at INFO level.
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();

        if snapshot.total_operations() == 0 {
            return;
        }

        info!(
            cached_read_units = snapshot.cached_read_units,
            uncached_read_units = snapshot.uncached_read_units,
            write_units = snapshot.write_units,
            deletes = snapshot.deletes,
            get_count = snapshot.get_count,
            list_count = snapshot.list_count,
            put_count = snapshot.put_count,
            delete_count = snapshot.delete_count,
            alarm_count = snapshot.alarm_count,
            transaction_count = snapshot.transaction_count,
            rollback_count = snapshot.rollback_count,
            cache_hit_rate = snapshot.cache_hit_rate(),
            "Actor storage metrics snapshot"
        );
    }
}

impl std::fmt::Debug for ActorMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ActorMetrics").field(&self.snapshot()).finish()
    }
}

impl StorageMeter for ActorMetrics {
    fn add_cached_storage_read_units(&self, units: u32) {
        self.inner.cached_read_units.fetch_add(u64::from(units), Ordering::Relaxed);
    }

    fn add_uncached_storage_read_units(&self, units: u32) {
        self.inner.uncached_read_units.fetch_add(u64::from(units), Ordering::Relaxed);
    }

    fn add_storage_write_units(&self, units: u32) {
        self.inner.write_units.fetch_add(u64::from(units), Ordering::Relaxed);
    }

    fn add_storage_deletes(&self, count: u32) {
        self.inner.deletes.fetch_add(u64::from(count), Ordering::Relaxed);
    }

    fn record_op(&self, op: StorageOp) {
        ActorMetrics::record_op(self, op);
    }

    fn record_rollback(&self) {
        ActorMetrics::record_rollback(self);
    }
}
