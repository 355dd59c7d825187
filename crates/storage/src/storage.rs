//! The root storage handle of one actor.

use std::{future::Future, sync::Arc};

use tracing::{debug, instrument, warn};

use crate::{
    codec::{JsonCodec, ValueCodec},
    config::StorageConfig,
    context::ActorContext,
    engine::CacheEngine,
    error::{StorageError, StorageResult},
    metrics::StorageOp,
    operations::{StorageTarget, settle_write},
    options::{Normalize, PutOptions},
    transaction::{Transaction, TransactionState},
};

/// Transactional key-value storage of one actor.
///
/// Key-value and alarm operations come from
/// [`StorageOperations`](crate::StorageOperations). `Storage` adds the
/// operations that only exist outside a transaction: [`delete_all`](Self::delete_all),
/// [`sync`](Self::sync) and [`transaction`](Self::transaction).
///
/// Clones share the engine and the execution context.
#[derive(Clone)]
pub struct Storage {
    engine: Arc<dyn CacheEngine>,
    ctx: ActorContext,
    config: StorageConfig,
    codec: Arc<dyn ValueCodec>,
}

#[bon::bon]
impl Storage {
    /// Creates a storage handle over `engine`.
    ///
    /// Defaults to a fresh [`ActorContext`], the default [`StorageConfig`]
    /// and [`JsonCodec`].
    #[builder]
    pub fn new(
        engine: Arc<dyn CacheEngine>,
        #[builder(default)] context: ActorContext,
        #[builder(default)] config: StorageConfig,
        codec: Option<Arc<dyn ValueCodec>>,
    ) -> Self {
        let codec = codec.unwrap_or_else(|| Arc::new(JsonCodec));
        Self { engine, ctx: context, config, codec }
    }
}

impl Storage {
    /// Returns a view of this storage with the direct I/O override enabled.
    #[must_use]
    pub fn with_direct_io(&self) -> Self {
        Self { config: self.config.with_direct_io(), ..self.clone() }
    }

    /// Deletes every key. The alarm is kept.
    ///
    /// Deletes are billed in the background once the engine reports how many
    /// keys were removed, with a minimum of one.
    ///
    /// # Errors
    ///
    /// Returns the engine's error.
    #[instrument(skip_all)]
    pub async fn delete_all(&self, options: PutOptions) -> StorageResult<()> {
        let _op = self.ctx.enter_operation().await;
        let options = options.normalize(self.config.direct_io());

        let outcome = self.engine.delete_all(options.write_options())?;
        let meter = Arc::clone(self.ctx.meter());
        let count = outcome.count;
        self.ctx.add_task(async move {
            let deleted = count.await?;
            meter.add_storage_deletes(deleted.max(1));
            Ok(())
        });

        settle_write(&self.ctx, &options, outcome.backpressure, None).await?;
        self.ctx.meter().record_op(StorageOp::Delete);
        Ok(())
    }

    /// Resolves once every write issued so far has been flushed.
    ///
    /// # Errors
    ///
    /// Returns the engine's error.
    pub async fn sync(&self) -> StorageResult<()> {
        match self.engine.on_no_pending_flush() {
            Some(flushed) => self.ctx.await_io(true, flushed).await,
            None => Ok(()),
        }
    }

    /// Runs `body` in a transaction inside the actor's critical section.
    ///
    /// The writes made through the [`Transaction`] are committed if `body`
    /// returns `Ok`, unless it rolled the transaction back explicitly, in which
    /// case its value is still returned. If `body` returns `Err`, the
    /// transaction is rolled back and that error is returned unchanged.
    ///
    /// If the returned future is dropped before it completes, the
    /// transaction is rolled back and the engine acknowledgement is awaited
    /// in the background.
    ///
    /// # Errors
    ///
    /// Returns the body's error, or the commit error converted into `E`.
    #[instrument(skip_all)]
    pub async fn transaction<F, Fut, R, E>(&self, body: F) -> Result<R, E>
    where
        F: FnOnce(Transaction) -> Fut,
        Fut: Future<Output = Result<R, E>>,
        E: From<StorageError>,
    {
        self.ctx
            .block_concurrency_while(|| async move {
                let txn = Transaction::new(
                    self.engine.begin_transaction(),
                    self.ctx.clone(),
                    self.config.clone(),
                    Arc::clone(&self.codec),
                );
                let _cancel = AbortOnDrop(txn.clone());
                match body(txn.clone()).await {
                    Ok(value) => {
                        txn.commit().await?;
                        Ok(value)
                    },
                    Err(err) => {
                        if txn.state() == TransactionState::Active {
                            debug!("transaction body failed, rolling back");
                        }
                        txn.abort();
                        Err(err)
                    },
                }
            })
            .await
    }

    /// The execution context this storage runs in.
    #[must_use]
    pub fn context(&self) -> &ActorContext {
        &self.ctx
    }

    /// The engine behind this storage.
    #[must_use]
    pub fn engine(&self) -> &Arc<dyn CacheEngine> {
        &self.engine
    }
}

/// Rolls back a transaction whose `transaction()` future was dropped mid-body.
struct AbortOnDrop(Transaction);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        if self.0.state() == TransactionState::Active {
            warn!("transaction cancelled before completion, rolling back");
            self.0.abort();
        }
    }
}

impl StorageTarget for Storage {
    type Cache = dyn CacheEngine;

    fn cache(&self, _op: &'static str) -> StorageResult<Arc<Self::Cache>> {
        Ok(Arc::clone(&self.engine))
    }

    fn context(&self) -> &ActorContext {
        &self.ctx
    }

    fn config(&self) -> &StorageConfig {
        &self.config
    }

    fn codec(&self) -> &dyn ValueCodec {
        self.codec.as_ref()
    }
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("config", &self.config)
            .field("ctx", &self.ctx)
            .finish_non_exhaustive()
    }
}
