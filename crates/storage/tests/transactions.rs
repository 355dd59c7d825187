//! Transaction atomicity, terminality, rollback and isolation tests.

#![allow(clippy::expect_used, clippy::panic)]

use std::time::Duration;

use actor_storage::{
    GetOptions, ListOptions, PutOptions, StorageError, StorageOperations, TransactionState,
    assert_usage_error,
    testutil::{TestActor, is_transaction_finished, make_key},
};
use serde_json::json;
use tokio::sync::oneshot;

/// Application error type a transaction body might return.
#[derive(Debug, PartialEq)]
enum AppError {
    Validation(&'static str),
    Storage(String),
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        Self::Storage(err.to_string())
    }
}

// ============================================================================
// Atomicity
// ============================================================================

#[tokio::test]
async fn test_body_error_discards_writes_and_is_returned_unchanged() {
    let actor = TestActor::new();
    actor.storage.put(b"balance", Some(json!(100)), PutOptions::default()).await.expect("seed");

    let result = actor
        .storage
        .transaction(|txn| async move {
            txn.put(b"balance", Some(json!(0)), PutOptions::default()).await?;
            txn.put(b"audit", Some(json!("drained")), PutOptions::default()).await?;
            Err::<(), _>(AppError::Validation("insufficient funds"))
        })
        .await;

    assert_eq!(result, Err(AppError::Validation("insufficient funds")));
    let balance = actor.storage.get(b"balance", GetOptions::default()).await.expect("get");
    assert_eq!(balance, Some(json!(100)));
    assert_eq!(actor.storage.get(b"audit", GetOptions::default()).await.expect("get"), None);

    actor.settle().await;
    assert_eq!(actor.metrics.snapshot().rollback_count, 1);
}

#[tokio::test]
async fn test_commit_applies_every_write() {
    let actor = TestActor::new();
    actor.storage.put(b"gone", Some(json!(1)), PutOptions::default()).await.expect("seed");

    actor
        .storage
        .transaction(|txn| async move {
            txn.put_many(
                vec![(b"a".to_vec(), Some(json!(1))), (b"b".to_vec(), Some(json!(2)))],
                PutOptions::default(),
            )
            .await?;
            txn.delete(b"gone", PutOptions::default()).await?;
            Ok::<_, StorageError>(())
        })
        .await
        .expect("transaction");

    let entries = actor.storage.list(ListOptions::default()).await.expect("list");
    let keys: Vec<_> = entries.iter().map(|entry| entry.key.to_vec()).collect();
    assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec()]);
    assert_eq!(actor.metrics.snapshot().transaction_count, 1);
}

#[tokio::test]
async fn test_reads_see_own_writes() {
    let actor = TestActor::new();
    actor.storage.put(b"k1", Some(json!("old")), PutOptions::default()).await.expect("seed");
    actor.storage.put(b"k3", Some(json!("old")), PutOptions::default()).await.expect("seed");

    actor
        .storage
        .transaction(|txn| async move {
            txn.put(b"k1", Some(json!("new")), PutOptions::default()).await?;
            txn.put(b"k2", Some(json!("new")), PutOptions::default()).await?;
            txn.delete(b"k3", PutOptions::default()).await?;

            assert_eq!(txn.get(b"k1", GetOptions::default()).await?, Some(json!("new")));
            let listed = txn.list(ListOptions::default()).await?;
            let keys: Vec<_> = listed.iter().map(|entry| entry.key.to_vec()).collect();
            assert_eq!(keys, vec![b"k1".to_vec(), b"k2".to_vec()]);
            Ok::<_, StorageError>(())
        })
        .await
        .expect("transaction");
}

#[tokio::test]
async fn test_commit_failure_surfaces_and_applies_nothing() {
    let actor = TestActor::new();
    let engine = actor.engine.clone();

    let result = actor
        .storage
        .transaction(|txn| async move {
            txn.put(b"a", Some(json!(1)), PutOptions::default()).await?;
            engine.fail_next(StorageError::conflict());
            Ok::<_, StorageError>(())
        })
        .await;

    assert!(matches!(result, Err(StorageError::Conflict)));
    assert!(actor.engine.is_empty());
}

// ============================================================================
// Terminal states
// ============================================================================

#[tokio::test]
async fn test_operations_after_commit_fail_without_engine_call() {
    let actor = TestActor::new();
    let txn = actor
        .storage
        .transaction(|txn| async move { Ok::<_, StorageError>(txn) })
        .await
        .expect("transaction");
    assert_eq!(txn.state(), TransactionState::Committed);

    let calls = actor.engine.call_count();
    let get = txn.get(b"k", GetOptions::default()).await;
    assert!(is_transaction_finished(&get));
    assert_usage_error!(txn.put(b"k", Some(json!(1)), PutOptions::default()).await);
    assert_usage_error!(txn.list(ListOptions::default()).await);
    assert_eq!(actor.engine.call_count(), calls);

    match get {
        Err(err) => assert_eq!(
            err.to_string(),
            "Cannot call get() on a transaction that has already committed"
        ),
        Ok(_) => panic!("expected an error"),
    }
}

#[tokio::test]
async fn test_explicit_rollback_mid_body() {
    let actor = TestActor::new();

    let outcome = actor
        .storage
        .transaction(|txn| async move {
            txn.put(b"a", Some(json!(1)), PutOptions::default()).await?;
            txn.rollback()?;
            txn.rollback()?;
            let after = txn.put(b"b", Some(json!(2)), PutOptions::default()).await;
            Ok::<_, StorageError>((txn.state(), after.is_err()))
        })
        .await
        .expect("transaction");

    assert_eq!(outcome, (TransactionState::RolledBack, true));
    assert!(actor.engine.is_empty());

    actor.settle().await;
    let snapshot = actor.metrics.snapshot();
    assert_eq!(snapshot.rollback_count, 1);
    assert_eq!(snapshot.transaction_count, 0);
}

#[tokio::test]
async fn test_rollback_after_commit_is_a_usage_error() {
    let actor = TestActor::new();
    let txn = actor
        .storage
        .transaction(|txn| async move {
            txn.put(b"a", Some(json!(1)), PutOptions::default()).await?;
            Ok::<_, StorageError>(txn)
        })
        .await
        .expect("transaction");

    let rollback = txn.rollback();
    assert!(is_transaction_finished(&rollback));
    assert_usage_error!(rollback);
    assert_eq!(txn.state(), TransactionState::Committed);
    assert_eq!(actor.engine.len(), 1);

    actor.settle().await;
    let snapshot = actor.metrics.snapshot();
    assert_eq!(snapshot.rollback_count, 0);
    assert_eq!(snapshot.transaction_count, 1);
}

#[tokio::test]
async fn test_cancelled_transaction_rolls_back() {
    let actor = TestActor::new();

    let cancelled = tokio::time::timeout(
        Duration::from_millis(50),
        actor.storage.transaction(|txn| async move {
            txn.put(b"a", Some(json!(1)), PutOptions::default()).await?;
            std::future::pending::<()>().await;
            Ok::<_, StorageError>(())
        }),
    )
    .await;
    assert!(cancelled.is_err(), "body should still be pending at the deadline");

    actor.settle().await;
    assert!(actor.engine.is_empty());
    let snapshot = actor.metrics.snapshot();
    assert_eq!(snapshot.rollback_count, 1);
    assert_eq!(snapshot.transaction_count, 0);

    // The critical section is released with the dropped body.
    let after = tokio::time::timeout(
        Duration::from_secs(1),
        actor.storage.put(b"b", Some(json!(2)), PutOptions::default()),
    )
    .await
    .expect("storage usable after cancellation");
    after.expect("put");
    assert_eq!(actor.engine.len(), 1);
}

#[tokio::test]
async fn test_delete_all_is_unsupported_in_transaction() {
    let actor = TestActor::new();
    actor.storage.put(b"keep", Some(json!(1)), PutOptions::default()).await.expect("seed");

    let result = actor
        .storage
        .transaction(|txn| async move { txn.delete_all(PutOptions::default()).await })
        .await;
    assert!(matches!(result, Err(StorageError::Unsupported { op: "delete_all()", .. })));
    assert_eq!(actor.engine.len(), 1);
}

// ============================================================================
// Mutation cap
// ============================================================================

#[tokio::test]
async fn test_mutation_cap_spans_calls() {
    let actor = TestActor::new();

    let result = actor
        .storage
        .transaction(|txn| async move {
            let first: Vec<_> = (0..100).map(|i| (make_key("k", i), Some(json!(i)))).collect();
            txn.put_many(first, PutOptions::default()).await?;

            let keys: Vec<_> = (0..128).map(|i| make_key("read", i)).collect();
            txn.get_many(&keys, GetOptions::default()).await?;

            let second: Vec<_> = (100..129).map(|i| (make_key("k", i), Some(json!(i)))).collect();
            txn.put_many(second, PutOptions::default()).await
        })
        .await;

    assert!(matches!(
        result,
        Err(StorageError::TooManyKeys { op: "put()", count: 129, limit: 128 })
    ));
    assert!(actor.engine.is_empty());
}

// ============================================================================
// Isolation
// ============================================================================

#[tokio::test]
async fn test_body_excludes_other_operations() {
    let actor = TestActor::new();
    let (entered_tx, entered_rx) = oneshot::channel();
    let (release_tx, release_rx) = oneshot::channel::<()>();

    let txn_actor = actor.clone();
    let running = tokio::spawn(async move {
        txn_actor
            .storage
            .transaction(|txn| async move {
                txn.put(b"a", Some(json!("inside")), PutOptions::default()).await?;
                entered_tx.send(()).expect("signal");
                release_rx.await.expect("release");
                Ok::<_, StorageError>(())
            })
            .await
    });
    entered_rx.await.expect("body started");

    let blocked =
        tokio::time::timeout(Duration::from_millis(50), actor.storage.get(b"a", GetOptions::default()))
            .await;
    assert!(blocked.is_err(), "read ran while a transaction body was active");

    release_tx.send(()).expect("release");
    running.await.expect("join").expect("transaction");
    let value = actor.storage.get(b"a", GetOptions::default()).await.expect("get");
    assert_eq!(value, Some(json!("inside")));
}

#[tokio::test]
async fn test_nested_transaction_does_not_deadlock() {
    let actor = TestActor::new();
    let outer = actor.storage.clone();

    let result = tokio::time::timeout(
        Duration::from_secs(1),
        actor.storage.transaction(|txn| async move {
            txn.put(b"outer", Some(json!(1)), PutOptions::default()).await?;
            outer
                .transaction(|inner| async move {
                    inner.put(b"inner", Some(json!(2)), PutOptions::default()).await
                })
                .await?;
            Ok::<_, StorageError>(())
        }),
    )
    .await
    .expect("nested transaction completes");

    result.expect("transaction");
    assert_eq!(actor.engine.len(), 2);
}
