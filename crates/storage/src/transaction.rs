//! Transactions over the actor's storage.
//!
//! A [`Transaction`] is handed to the body passed to
//! [`Storage::transaction`](crate::Storage::transaction). It exposes the same
//! [`StorageOperations`](crate::StorageOperations) as the root handle, issued
//! against one engine transaction whose writes become visible only on commit.
//!
//! # Lifecycle
//!
//! ```text
//! Active ──commit──▶ Committed
//!    │
//!    └──rollback / body error──▶ RolledBack
//! ```
//!
//! Both terminal states are final: every operation on a finished transaction
//! fails with [`StorageError::TransactionFinished`] before reaching the engine.
//!
//! # Example
//!
//! ```
//! use actor_storage::{MemoryEngine, PutOptions, Storage, StorageError, StorageOperations};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let storage = Storage::builder().engine(Arc::new(MemoryEngine::new())).build();
//!
//! storage
//!     .transaction(|txn| async move {
//!         txn.put(b"alice", Some(json!(80)), PutOptions::default()).await?;
//!         txn.put(b"bob", Some(json!(70)), PutOptions::default()).await?;
//!         Ok::<_, StorageError>(())
//!     })
//!     .await
//!     .unwrap();
//!
//! let bob = storage.get(b"bob", Default::default()).await.unwrap();
//! assert_eq!(bob, Some(json!(70)));
//! # });
//! ```

use std::{collections::HashSet, sync::Arc};

use parking_lot::Mutex;
use tracing::debug;

use crate::{
    codec::ValueCodec,
    config::StorageConfig,
    context::ActorContext,
    engine::EngineTransaction,
    error::{StorageError, StorageResult},
    metrics::StorageOp,
    operations::{OP_DELETE_ALL, OP_ROLLBACK, StorageTarget},
    options::PutOptions,
};

/// Observable state of a [`Transaction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Operations are accepted.
    Active,
    /// The body succeeded and the writes were applied.
    Committed,
    /// The writes were discarded.
    RolledBack,
}

impl TransactionState {
    fn describe(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Committed => "committed",
            Self::RolledBack => "rolled back",
        }
    }
}

enum TxnState {
    Active(Arc<dyn EngineTransaction>),
    Committed,
    RolledBack,
}

impl TxnState {
    fn public(&self) -> TransactionState {
        match self {
            Self::Active(_) => TransactionState::Active,
            Self::Committed => TransactionState::Committed,
            Self::RolledBack => TransactionState::RolledBack,
        }
    }
}

struct TransactionInner {
    state: Mutex<TxnState>,
    mutated: Mutex<HashSet<Vec<u8>>>,
    ctx: ActorContext,
    config: StorageConfig,
    codec: Arc<dyn ValueCodec>,
}

/// Handle to an in-progress transaction.
///
/// Clones share the same state.
#[derive(Clone)]
pub struct Transaction {
    inner: Arc<TransactionInner>,
}

impl Transaction {
    pub(crate) fn new(
        handle: Box<dyn EngineTransaction>,
        ctx: ActorContext,
        config: StorageConfig,
        codec: Arc<dyn ValueCodec>,
    ) -> Self {
        Self {
            inner: Arc::new(TransactionInner {
                state: Mutex::new(TxnState::Active(Arc::from(handle))),
                mutated: Mutex::new(HashSet::new()),
                ctx,
                config,
                codec,
            }),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.inner.state.lock().public()
    }

    /// Number of distinct keys mutated so far.
    #[must_use]
    pub fn mutated_keys(&self) -> usize {
        self.inner.mutated.lock().len()
    }

    /// Discards every write made through this transaction.
    ///
    /// Idempotent once rolled back. The engine handle is released
    /// immediately; the engine's acknowledgement is awaited in the background.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::TransactionFinished`] if the transaction
    /// already committed.
    pub fn rollback(&self) -> StorageResult<()> {
        match self.take_for_rollback() {
            Ok(handle) => {
                self.send_rollback(handle);
                Ok(())
            },
            Err(TransactionState::Committed) => Err(StorageError::TransactionFinished {
                op: OP_ROLLBACK,
                state: TransactionState::Committed.describe(),
            }),
            Err(_) => Ok(()),
        }
    }

    /// Rolls back if still active. Used on body failure and cancellation.
    pub(crate) fn abort(&self) {
        if let Ok(handle) = self.take_for_rollback() {
            self.send_rollback(handle);
        }
    }

    /// Moves an active transaction to `RolledBack` and returns its handle,
    /// or returns the state it had already reached.
    fn take_for_rollback(&self) -> Result<Arc<dyn EngineTransaction>, TransactionState> {
        let mut state = self.inner.state.lock();
        match std::mem::replace(&mut *state, TxnState::RolledBack) {
            TxnState::Active(handle) => Ok(handle),
            finished => {
                let reached = finished.public();
                *state = finished;
                Err(reached)
            },
        }
    }

    fn send_rollback(&self, handle: Arc<dyn EngineTransaction>) {
        debug!("rolling back transaction");
        self.inner.ctx.meter().record_rollback();
        self.inner.ctx.add_task(handle.rollback());
    }

    /// `delete_all` is not available inside a transaction.
    ///
    /// # Errors
    ///
    /// Always returns [`StorageError::Unsupported`].
    pub async fn delete_all(&self, _options: PutOptions) -> StorageResult<()> {
        Err(StorageError::Unsupported {
            op: OP_DELETE_ALL,
            reason: "not supported within a transaction",
        })
    }

    /// Commits the engine transaction unless it was rolled back.
    pub(crate) async fn commit(&self) -> StorageResult<()> {
        let handle = {
            let mut state = self.inner.state.lock();
            match std::mem::replace(&mut *state, TxnState::Committed) {
                TxnState::Active(handle) => handle,
                finished => {
                    *state = finished;
                    return Ok(());
                },
            }
        };

        let committed = match handle.commit() {
            Ok(Some(pending)) => self.inner.ctx.await_io(false, pending).await,
            Ok(None) => Ok(()),
            Err(err) => Err(err),
        };
        match committed {
            Ok(()) => {
                self.inner.ctx.meter().record_op(StorageOp::Transaction);
                Ok(())
            },
            Err(err) => {
                *self.inner.state.lock() = TxnState::RolledBack;
                self.inner.ctx.meter().record_rollback();
                Err(err)
            },
        }
    }
}

impl StorageTarget for Transaction {
    type Cache = dyn EngineTransaction;

    fn cache(&self, op: &'static str) -> StorageResult<Arc<Self::Cache>> {
        match &*self.inner.state.lock() {
            TxnState::Active(handle) => Ok(Arc::clone(handle)),
            finished => {
                Err(StorageError::TransactionFinished { op, state: finished.public().describe() })
            },
        }
    }

    fn context(&self) -> &ActorContext {
        &self.inner.ctx
    }

    fn config(&self) -> &StorageConfig {
        &self.inner.config
    }

    fn codec(&self) -> &dyn ValueCodec {
        self.inner.codec.as_ref()
    }

    fn track_mutations(&self, op: &'static str, keys: &[&[u8]]) -> StorageResult<()> {
        let limit = self.inner.config.max_keys_per_batch();
        let mut mutated = self.inner.mutated.lock();
        let added = keys
            .iter()
            .filter(|key| !mutated.contains(**key))
            .map(|key| key.to_vec())
            .collect::<HashSet<_>>();
        let total = mutated.len() + added.len();
        if total > limit {
            return Err(StorageError::too_many_keys(op, total, limit));
        }
        mutated.extend(added);
        Ok(())
    }

    fn holds_critical_section(&self) -> bool {
        true
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("state", &self.state())
            .field("mutated_keys", &self.mutated_keys())
            .finish_non_exhaustive()
    }
}
