//! Alarm scheduling: handler requirement, epoch check, clamping to the
//! current time, millisecond precision and billing.

#![allow(clippy::expect_used, clippy::panic)]

use actor_storage::{
    GetAlarmOptions, SetAlarmOptions, StorageConfig, StorageError, StorageOperations,
    assert_usage_error,
    testutil::{TestActor, fixed_now},
};
use chrono::{DateTime, Duration, Utc};

fn actor_with_handler() -> TestActor {
    TestActor::with_config(StorageConfig::builder().alarm_handler(true).build().expect("config"))
}

#[tokio::test]
async fn test_without_handler_get_returns_none_without_engine_call() {
    let actor = TestActor::new();
    let alarm = actor.storage.get_alarm(GetAlarmOptions::default()).await.expect("get_alarm");
    assert_eq!(alarm, None);
    assert_eq!(actor.engine.call_count(), 0);
}

#[tokio::test]
async fn test_without_handler_set_is_usage_error() {
    let actor = TestActor::new();
    let at = fixed_now() + Duration::minutes(5);
    assert_usage_error!(actor.storage.set_alarm(at, SetAlarmOptions::default()).await);
    assert_eq!(actor.engine.call_count(), 0);
    assert_eq!(actor.engine.alarm(), None);
}

#[tokio::test]
async fn test_epoch_is_rejected() {
    let actor = actor_with_handler();
    let result = actor.storage.set_alarm(DateTime::<Utc>::UNIX_EPOCH, SetAlarmOptions::default()).await;
    assert!(matches!(result, Err(StorageError::InvalidArgument { .. })));

    let before_epoch = DateTime::<Utc>::UNIX_EPOCH - Duration::seconds(1);
    assert_usage_error!(actor.storage.set_alarm(before_epoch, SetAlarmOptions::default()).await);
    assert_eq!(actor.engine.call_count(), 0);
}

#[tokio::test]
async fn test_future_time_is_kept() {
    let actor = actor_with_handler();
    let at = fixed_now() + Duration::hours(1);
    actor.storage.set_alarm(at, SetAlarmOptions::default()).await.expect("set_alarm");

    assert_eq!(actor.engine.alarm(), Some(at));
    let read = actor.storage.get_alarm(GetAlarmOptions::default()).await.expect("get_alarm");
    assert_eq!(read, Some(at));
}

#[tokio::test]
async fn test_past_times_clamp_to_now() {
    let actor = actor_with_handler();

    actor
        .storage
        .set_alarm(fixed_now() - Duration::hours(1), SetAlarmOptions::default())
        .await
        .expect("set_alarm");
    let first = actor.engine.alarm();

    actor
        .storage
        .set_alarm(fixed_now() - Duration::milliseconds(3), SetAlarmOptions::default())
        .await
        .expect("set_alarm");
    let second = actor.engine.alarm();

    assert_eq!(first, Some(fixed_now()));
    assert_eq!(second, first);

    actor.storage.set_alarm(fixed_now(), SetAlarmOptions::default()).await.expect("set_alarm");
    assert_eq!(actor.engine.alarm(), Some(fixed_now()));
}

#[tokio::test]
async fn test_clamp_follows_the_clock() {
    let actor = actor_with_handler();
    actor.clock.advance(Duration::seconds(30));
    actor.storage.set_alarm(fixed_now(), SetAlarmOptions::default()).await.expect("set_alarm");
    assert_eq!(actor.engine.alarm(), Some(fixed_now() + Duration::seconds(30)));
}

#[tokio::test]
async fn test_alarm_time_is_truncated_to_millis() {
    let actor = actor_with_handler();
    let at = fixed_now() + Duration::hours(1) + Duration::nanoseconds(123_456_789);
    actor.storage.set_alarm(at, SetAlarmOptions::default()).await.expect("set_alarm");

    let stored: DateTime<Utc> = actor.engine.alarm().expect("alarm set");
    assert_eq!(stored.timestamp_subsec_nanos(), 123_000_000);
}

#[tokio::test]
async fn test_set_bills_one_write_and_delete_is_free() {
    let actor = actor_with_handler();
    actor
        .storage
        .set_alarm(fixed_now() + Duration::hours(1), SetAlarmOptions::default())
        .await
        .expect("set_alarm");
    actor.storage.delete_alarm(SetAlarmOptions::default()).await.expect("delete_alarm");
    actor.settle().await;

    assert_eq!(actor.engine.alarm(), None);
    let snapshot = actor.metrics.snapshot();
    assert_eq!(snapshot.write_units, 1);
    assert_eq!(snapshot.deletes, 0);
    assert_eq!(snapshot.alarm_count, 2);
}

#[tokio::test]
async fn test_alarm_in_transaction_applies_on_commit() {
    let actor = actor_with_handler();
    let at = fixed_now() + Duration::minutes(10);
    let engine = actor.engine.clone();

    actor
        .storage
        .transaction(|txn| async move {
            txn.set_alarm(at, SetAlarmOptions::default()).await?;
            assert_eq!(engine.alarm(), None);
            assert_eq!(txn.get_alarm(GetAlarmOptions::default()).await?, Some(at));
            Ok::<_, StorageError>(())
        })
        .await
        .expect("transaction");

    assert_eq!(actor.engine.alarm(), Some(at));
}
