//! Storage operations shared by [`Storage`](crate::Storage) and
//! [`Transaction`](crate::Transaction).
//!
//! Both handles implement [`StorageTarget`], which tells the shared code which
//! cache handle to issue calls against and how to account for mutations.
//! [`StorageOperations`] is implemented for every target and holds the
//! operations themselves: validation, range compilation, the engine call under
//! the right ordering discipline, and billing.
//!
//! Every usage error is raised before the cache engine is called. Engine
//! calls are issued as soon as an operation is validated; only the delivery
//! of their results waits behind the input gate, so the engine sees calls in
//! the order they were made.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, SubsecRound, Utc};
use serde_json::Value;
use tokio::sync::RwLockReadGuard;
use tracing::error;

use crate::{
    billing::{self, ReadUnits},
    codec::{ValueCodec, decode_stored},
    config::StorageConfig,
    context::ActorContext,
    engine::{CacheOps, PendingWrite},
    error::{StorageError, StorageResult},
    metrics::{StorageMeter, StorageOp},
    options::{GetAlarmOptions, GetOptions, ListOptions, Normalize, PutOptions, SetAlarmOptions},
    range::{self, CompiledRange},
    size_limits::{validate_batch_len, validate_key_size, validate_sizes},
    types::Entry,
};

pub(crate) const OP_GET: &str = "get()";
pub(crate) const OP_LIST: &str = "list()";
pub(crate) const OP_PUT: &str = "put()";
pub(crate) const OP_DELETE: &str = "delete()";
pub(crate) const OP_DELETE_ALL: &str = "delete_all()";
pub(crate) const OP_GET_ALARM: &str = "get_alarm()";
pub(crate) const OP_SET_ALARM: &str = "set_alarm()";
pub(crate) const OP_DELETE_ALARM: &str = "delete_alarm()";
pub(crate) const OP_ROLLBACK: &str = "rollback()";

/// A handle storage operations can run against.
pub trait StorageTarget: Send + Sync {
    /// The cache handle operations are issued to.
    type Cache: CacheOps + ?Sized + 'static;

    /// Returns the cache handle for `op`.
    ///
    /// # Errors
    ///
    /// Returns a usage error if the handle can no longer be used, e.g. a
    /// finished transaction.
    fn cache(&self, op: &'static str) -> StorageResult<Arc<Self::Cache>>;

    /// The actor's execution context.
    fn context(&self) -> &ActorContext;

    /// Facade configuration.
    fn config(&self) -> &StorageConfig;

    /// Codec for stored values.
    fn codec(&self) -> &dyn ValueCodec;

    /// Records the keys `op` is about to mutate.
    ///
    /// # Errors
    ///
    /// Returns a usage error if the mutation is not allowed.
    fn track_mutations(&self, _op: &'static str, _keys: &[&[u8]]) -> StorageResult<()> {
        Ok(())
    }

    /// Whether calls on this target already run inside the actor's critical
    /// section and must not wait for it.
    fn holds_critical_section(&self) -> bool {
        false
    }
}

/// Key-value and alarm operations available on every [`StorageTarget`].
#[async_trait]
pub trait StorageOperations: StorageTarget {
    /// Reads one key.
    ///
    /// # Errors
    ///
    /// Returns a usage error for an invalid key, or the engine's error.
    #[tracing::instrument(skip_all, fields(key_len = key.len()))]
    async fn get(&self, key: &[u8], options: GetOptions) -> StorageResult<Option<Value>> {
        let cache = self.cache(OP_GET)?;
        let _op = enter(self).await;
        let options = options.normalize(self.config().direct_io());
        validate_key_size(key, self.config().size_limits())?;

        let ctx = self.context();
        let request = cache.get(&[Bytes::copy_from_slice(key)], options.read_options());
        let entries = ctx.await_io(options.allow_concurrency(), request).await?;
        let entry = entries.into_iter().next();

        bill_reads(ctx.meter().as_ref(), billing::get_one_units(entry.as_ref()));
        ctx.meter().record_op(StorageOp::Get);
        entry.map(|entry| decode_stored(self.codec(), &entry.key, &entry.value)).transpose()
    }

    /// Reads several keys. Missing keys are omitted from the result.
    ///
    /// # Errors
    ///
    /// Returns a usage error for too many or invalid keys, or the engine's error.
    #[tracing::instrument(skip_all, fields(count = keys.len()))]
    async fn get_many(&self, keys: &[Vec<u8>], options: GetOptions) -> StorageResult<Vec<Entry>> {
        let cache = self.cache(OP_GET)?;
        let _op = enter(self).await;
        let options = options.normalize(self.config().direct_io());
        validate_batch_len(OP_GET, keys.len(), self.config().max_keys_per_batch())?;
        for key in keys {
            validate_key_size(key, self.config().size_limits())?;
        }
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<Bytes> = keys.iter().map(|key| Bytes::copy_from_slice(key)).collect();
        let ctx = self.context();
        let request = cache.get(&keys, options.read_options());
        let entries = ctx.await_io(options.allow_concurrency(), request).await?;
        if entries.len() > keys.len() {
            error!(
                requested = keys.len(),
                returned = entries.len(),
                "cache engine returned more entries than requested"
            );
        }

        bill_reads(ctx.meter().as_ref(), billing::get_many_units(&entries, keys.len()));
        ctx.meter().record_op(StorageOp::Get);
        decode_entries(self.codec(), entries)
    }

    /// Lists entries in a key range.
    ///
    /// # Errors
    ///
    /// Returns a usage error for conflicting bounds or a non-positive limit,
    /// or the engine's error.
    #[tracing::instrument(skip_all, fields(reverse = options.reverse(), limit = ?options.limit))]
    async fn list(&self, options: ListOptions) -> StorageResult<Vec<Entry>> {
        let cache = self.cache(OP_LIST)?;
        let _op = enter(self).await;
        let options = options.normalize(self.config().direct_io());
        let ctx = self.context();

        let scan = match range::compile(&options)? {
            CompiledRange::Scan(scan) => scan,
            CompiledRange::Empty => {
                ctx.meter().record_op(StorageOp::List);
                return Ok(Vec::new());
            },
        };

        let read_options = options.read_options();
        let request = if scan.reverse {
            cache.list_reverse(&scan.start, scan.end.as_deref(), scan.limit, read_options)
        } else {
            cache.list(&scan.start, scan.end.as_deref(), scan.limit, read_options)
        };
        let entries = ctx.await_io(options.allow_concurrency(), request).await?;

        bill_reads(ctx.meter().as_ref(), billing::list_units(&entries));
        ctx.meter().record_op(StorageOp::List);
        decode_entries(self.codec(), entries)
    }

    /// Writes one value.
    ///
    /// # Errors
    ///
    /// Returns a usage error if `value` is `None` or a size limit is exceeded,
    /// or the engine's error.
    #[tracing::instrument(skip_all, fields(key_len = key.len()))]
    async fn put(&self, key: &[u8], value: Option<Value>, options: PutOptions) -> StorageResult<()> {
        let cache = self.cache(OP_PUT)?;
        let _op = enter(self).await;
        let Some(value) = value else {
            return Err(StorageError::invalid_argument("put() called with undefined value."));
        };
        let options = options.normalize(self.config().direct_io());

        let encoded = encode(self.codec(), &value)?;
        validate_sizes(key, &encoded, self.config().size_limits())?;
        self.track_mutations(OP_PUT, &[key])?;

        let units = billing::write_units(key, &encoded);
        let backpressure = cache
            .put(vec![(Bytes::copy_from_slice(key), Bytes::from(encoded))], options.write_options())?;
        settle_write(self.context(), &options, backpressure, Some(units)).await?;
        self.context().meter().record_op(StorageOp::Put);
        Ok(())
    }

    /// Writes several values in one engine call.
    ///
    /// Entries whose value is `None` are skipped.
    ///
    /// # Errors
    ///
    /// Returns a usage error for too many entries or an exceeded size limit,
    /// or the engine's error. Nothing is written on a usage error.
    #[tracing::instrument(skip_all, fields(count = entries.len()))]
    async fn put_many(
        &self,
        entries: Vec<(Vec<u8>, Option<Value>)>,
        options: PutOptions,
    ) -> StorageResult<()> {
        let cache = self.cache(OP_PUT)?;
        let _op = enter(self).await;
        let options = options.normalize(self.config().direct_io());
        validate_batch_len(OP_PUT, entries.len(), self.config().max_keys_per_batch())?;

        let mut encoded = Vec::with_capacity(entries.len());
        let mut units = 0u32;
        for (key, value) in entries {
            let Some(value) = value else { continue };
            let buf = encode(self.codec(), &value)?;
            validate_sizes(&key, &buf, self.config().size_limits())?;
            units = units.saturating_add(billing::write_units(&key, &buf));
            encoded.push((key, buf));
        }
        if encoded.is_empty() {
            return Ok(());
        }
        let keys: Vec<&[u8]> = encoded.iter().map(|(key, _)| key.as_slice()).collect();
        self.track_mutations(OP_PUT, &keys)?;

        let batch = encoded.into_iter().map(|(key, buf)| (Bytes::from(key), Bytes::from(buf))).collect();
        let backpressure = cache.put(batch, options.write_options())?;
        settle_write(self.context(), &options, backpressure, Some(units)).await?;
        self.context().meter().record_op(StorageOp::Put);
        Ok(())
    }

    /// Deletes one key, returning whether it existed.
    ///
    /// # Errors
    ///
    /// Returns a usage error for an invalid key, or the engine's error.
    #[tracing::instrument(skip_all, fields(key_len = key.len()))]
    async fn delete(&self, key: &[u8], options: PutOptions) -> StorageResult<bool> {
        let cache = self.cache(OP_DELETE)?;
        let _op = enter(self).await;
        let options = options.normalize(self.config().direct_io());
        validate_key_size(key, self.config().size_limits())?;
        self.track_mutations(OP_DELETE, &[key])?;

        let ctx = self.context();
        let outcome = cache.delete(vec![Bytes::copy_from_slice(key)], options.write_options())?;
        let deleted = ctx.await_io(options.allow_concurrency(), outcome.count).await?;
        ctx.meter().add_storage_deletes(1);

        settle_write(ctx, &options, outcome.backpressure, None).await?;
        ctx.meter().record_op(StorageOp::Delete);
        Ok(deleted > 0)
    }

    /// Deletes several keys, returning how many existed.
    ///
    /// Every requested key is billed, whether or not it existed.
    ///
    /// # Errors
    ///
    /// Returns a usage error for too many or invalid keys, or the engine's error.
    #[tracing::instrument(skip_all, fields(count = keys.len()))]
    async fn delete_many(&self, keys: &[Vec<u8>], options: PutOptions) -> StorageResult<u32> {
        let cache = self.cache(OP_DELETE)?;
        let _op = enter(self).await;
        let options = options.normalize(self.config().direct_io());
        validate_batch_len(OP_DELETE, keys.len(), self.config().max_keys_per_batch())?;
        for key in keys {
            validate_key_size(key, self.config().size_limits())?;
        }
        if keys.is_empty() {
            return Ok(0);
        }
        let borrowed: Vec<&[u8]> = keys.iter().map(Vec::as_slice).collect();
        self.track_mutations(OP_DELETE, &borrowed)?;

        let ctx = self.context();
        let requested = u32::try_from(keys.len()).unwrap_or(u32::MAX);
        let keys = keys.iter().map(|key| Bytes::copy_from_slice(key)).collect();
        let outcome = cache.delete(keys, options.write_options())?;
        let deleted = ctx.await_io(options.allow_concurrency(), outcome.count).await?;
        ctx.meter().add_storage_deletes(requested);

        settle_write(ctx, &options, outcome.backpressure, None).await?;
        ctx.meter().record_op(StorageOp::Delete);
        Ok(deleted)
    }

    /// Reads the scheduled alarm time.
    ///
    /// Always `None` without an engine call when the actor has no alarm handler.
    ///
    /// # Errors
    ///
    /// Returns the engine's error.
    #[tracing::instrument(skip_all)]
    async fn get_alarm(&self, options: GetAlarmOptions) -> StorageResult<Option<DateTime<Utc>>> {
        let cache = self.cache(OP_GET_ALARM)?;
        let _op = enter(self).await;
        if !self.config().alarm_handler() {
            return Ok(None);
        }
        let options = GetOptions::from(options).normalize(self.config().direct_io());

        let ctx = self.context();
        let request = cache.get_alarm(options.read_options());
        let time = ctx.await_io(options.allow_concurrency(), request).await?;
        ctx.meter().record_op(StorageOp::Alarm);
        Ok(time)
    }

    /// Schedules the alarm.
    ///
    /// Times at or before the current time are raised to exactly the current
    /// time. Times are kept at millisecond precision.
    ///
    /// # Errors
    ///
    /// Returns a usage error if `time` is not after the Unix epoch or the
    /// actor has no alarm handler, or the engine's error.
    #[tracing::instrument(skip_all, fields(time = %time))]
    async fn set_alarm(&self, time: DateTime<Utc>, options: SetAlarmOptions) -> StorageResult<()> {
        let cache = self.cache(OP_SET_ALARM)?;
        let _op = enter(self).await;
        if time <= DateTime::<Utc>::UNIX_EPOCH {
            return Err(StorageError::invalid_argument(
                "set_alarm() cannot be called with an alarm time <= 0",
            ));
        }
        if !self.config().alarm_handler() {
            return Err(StorageError::invalid_argument(
                "set_alarm() requires the actor to have an alarm handler",
            ));
        }
        let options = PutOptions::from(options).normalize(self.config().direct_io());

        let ctx = self.context();
        let scheduled = time.trunc_subsecs(3).max(ctx.now());
        let backpressure = cache.set_alarm(Some(scheduled), options.write_options())?;
        settle_write(ctx, &options, backpressure, Some(1)).await?;
        ctx.meter().record_op(StorageOp::Alarm);
        Ok(())
    }

    /// Clears the alarm. Not billed.
    ///
    /// # Errors
    ///
    /// Returns the engine's error.
    #[tracing::instrument(skip_all)]
    async fn delete_alarm(&self, options: SetAlarmOptions) -> StorageResult<()> {
        let cache = self.cache(OP_DELETE_ALARM)?;
        let _op = enter(self).await;
        let options = PutOptions::from(options).normalize(self.config().direct_io());

        let ctx = self.context();
        let backpressure = cache.set_alarm(None, options.write_options())?;
        settle_write(ctx, &options, backpressure, None).await?;
        ctx.meter().record_op(StorageOp::Alarm);
        Ok(())
    }
}

impl<T: StorageTarget> StorageOperations for T {}

/// Waits for the critical section unless the target already holds it.
async fn enter<T: StorageTarget + ?Sized>(target: &T) -> Option<RwLockReadGuard<'_, ()>> {
    if target.holds_critical_section() {
        return None;
    }
    target.context().enter_operation().await
}

/// Holds output for a confirmed write, schedules its billing and awaits backpressure.
///
/// Write units are billed in the background once every output lock has been
/// released, regardless of `allow_concurrency`.
pub(crate) async fn settle_write(
    ctx: &ActorContext,
    options: &PutOptions,
    backpressure: Option<PendingWrite>,
    write_units: Option<u32>,
) -> StorageResult<()> {
    let _output =
        (backpressure.is_some() && !options.allow_unconfirmed()).then(|| ctx.output_lock());

    if let Some(units) = write_units {
        let task_ctx = ctx.clone();
        ctx.add_task(async move {
            task_ctx.wait_for_output_locks().await;
            task_ctx.meter().add_storage_write_units(units);
            Ok(())
        });
    }

    match backpressure {
        Some(pending) => ctx.await_io(options.allow_concurrency(), pending).await,
        None => Ok(()),
    }
}

fn bill_reads(meter: &dyn StorageMeter, units: ReadUnits) {
    if units.cached > 0 {
        meter.add_cached_storage_read_units(units.cached);
    }
    if units.uncached > 0 {
        meter.add_uncached_storage_read_units(units.uncached);
    }
}

fn encode(codec: &dyn ValueCodec, value: &Value) -> StorageResult<Vec<u8>> {
    codec
        .serialize(value)
        .map_err(|err| StorageError::internal_with_source("failed to serialize value", err))
}

fn decode_entries(
    codec: &dyn ValueCodec,
    entries: Vec<crate::types::CachedEntry>,
) -> StorageResult<Vec<Entry>> {
    entries
        .into_iter()
        .map(|entry| {
            let value = decode_stored(codec, &entry.key, &entry.value)?;
            Ok(Entry::new(entry.key, value))
        })
        .collect()
}
