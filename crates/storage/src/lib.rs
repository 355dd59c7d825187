//! Transactional key-value storage for durable actors.
//!
//! This crate is the storage facade an actor's code talks to. It sits between
//! application calls (`get`, `put`, `delete`, `list`, alarms, transactions) and
//! a cache engine that owns the actual cache and backing store. The facade
//! validates and normalizes requests, compiles exact key ranges, enforces size
//! and batch limits, bills reads and writes into 4 KiB units split by cache
//! status, orders operations against the actor's input and output gates, and
//! runs transactions all-or-nothing.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Actor code                             │
//! ├──────────────────────────────┬──────────────────────────────┤
//! │           Storage            │         Transaction          │
//! │  delete_all, sync, txn body  │   rollback, mutation cap     │
//! ├──────────────────────────────┴──────────────────────────────┤
//! │        StorageOperations (shared get/put/delete/list)       │
//! │   options · range compiler · size limits · billing · codec  │
//! ├─────────────────────────────────────────────────────────────┤
//! │   ActorContext: input gate, critical section, output gate,  │
//! │             background tasks, clock, StorageMeter           │
//! ├─────────────────────────────────────────────────────────────┤
//! │     CacheEngine / EngineTransaction  (MemoryEngine, ...)    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//!
//! use actor_storage::{
//!     GetOptions, ListOptions, MemoryEngine, PutOptions, Storage, StorageOperations,
//! };
//! use serde_json::json;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let storage = Storage::builder().engine(Arc::new(MemoryEngine::new())).build();
//!
//!     storage.put(b"user:1", Some(json!({"name": "Alice"})), PutOptions::default()).await?;
//!     storage.put(b"user:2", Some(json!({"name": "Bob"})), PutOptions::default()).await?;
//!
//!     let alice = storage.get(b"user:1", GetOptions::default()).await?;
//!     assert_eq!(alice, Some(json!({"name": "Alice"})));
//!
//!     let users = storage.list(ListOptions::builder().prefix(b"user:".to_vec()).build()).await?;
//!     assert_eq!(users.len(), 2);
//!     Ok(())
//! }
//! ```
//!
//! # Implementing an Engine
//!
//! 1. Implement [`CacheOps`] and [`CacheEngine`] for the root handle
//! 2. Implement [`CacheOps`] and [`EngineTransaction`] for the transaction handle
//! 3. Apply every call when it is made and return a [`PendingRead`] or [`PendingWrite`] for its
//!    result; the facade awaits these later, in its own order
//! 4. Map engine-specific errors to [`StorageError`]
//!
//! See the [`memory`] module source for a reference implementation.
//!
//! # Error Handling
//!
//! All operations return [`StorageResult<T>`]. Usage errors
//! ([`StorageError::is_usage`]) are raised before the engine is called;
//! engine errors pass through unchanged.
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` module with shared test helpers (a manual clock, a
//!   wired-up test actor, data generators, assertion macros).

#![deny(unsafe_code)]

pub mod billing;
pub mod codec;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod memory;
pub mod metrics;
pub mod operations;
pub mod options;
pub mod range;
pub mod size_limits;
mod storage;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used)]
pub mod testutil;
pub mod transaction;
pub mod types;

// Re-export primary types at crate root for convenience
pub use codec::{JsonCodec, ValueCodec};
pub use config::StorageConfig;
pub use context::{ActorContext, Clock, SystemClock};
pub use engine::{
    CacheEngine, CacheOps, DeleteOutcome, EngineTransaction, PendingAck, PendingRead, PendingWrite,
};
pub use error::{BoxError, ConfigError, StorageError, StorageResult};
pub use memory::MemoryEngine;
pub use metrics::{ActorMetrics, MeterSnapshot, StorageMeter};
pub use operations::{StorageOperations, StorageTarget};
pub use options::{
    GetAlarmOptions, GetOptions, ListOptions, PutOptions, ReadOptions, SetAlarmOptions,
    WriteOptions,
};
pub use size_limits::{
    ADVERTISED_MAX_VALUE_SIZE, ENFORCED_MAX_VALUE_SIZE, MAX_KEY_SIZE, SizeLimits,
};
pub use storage::Storage;
pub use transaction::{Transaction, TransactionState};
pub use types::{CacheStatus, CachedEntry, Entry};
