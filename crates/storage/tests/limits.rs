//! Key size, value size and batch limits.
//!
//! Every limit violation is a usage error raised before the engine is called.

#![allow(clippy::expect_used, clippy::panic)]

use actor_storage::{
    ENFORCED_MAX_VALUE_SIZE, GetOptions, MAX_KEY_SIZE, PutOptions, SizeLimits, StorageConfig,
    StorageError, StorageOperations, assert_usage_error,
    testutil::{TestActor, make_key, make_value},
};
use rstest::rstest;
use serde_json::json;

#[rstest]
#[case::at_limit(MAX_KEY_SIZE, true)]
#[case::one_over(MAX_KEY_SIZE + 1, false)]
#[tokio::test]
async fn test_key_size_limit(#[case] len: usize, #[case] accepted: bool) {
    let actor = TestActor::new();
    let key = vec![b'k'; len];

    let result = actor.storage.put(&key, Some(json!(1)), PutOptions::default()).await;
    if accepted {
        result.expect("key at the limit is accepted");
    } else {
        assert!(matches!(
            result,
            Err(StorageError::SizeLimitExceeded { kind: "key", actual: 2049, limit: 2048 })
        ));
        assert_eq!(actor.engine.call_count(), 0);
    }
}

#[rstest]
#[case::at_limit(ENFORCED_MAX_VALUE_SIZE, true)]
#[case::one_over(ENFORCED_MAX_VALUE_SIZE + 1, false)]
#[tokio::test]
async fn test_value_size_limit_applies_to_encoded_bytes(
    #[case] encoded_len: usize,
    #[case] accepted: bool,
) {
    assert_eq!(ENFORCED_MAX_VALUE_SIZE, 131_072 + 34);
    let actor = TestActor::new();

    let result = actor.storage.put(b"k", Some(make_value(encoded_len)), PutOptions::default()).await;
    if accepted {
        result.expect("value at the limit is accepted");
        assert_eq!(actor.engine.raw_value(b"k").map(|v| v.len()), Some(encoded_len));
    } else {
        assert!(matches!(
            result,
            Err(StorageError::SizeLimitExceeded { kind: "value", actual: 131_107, limit: 131_106 })
        ));
        assert_eq!(actor.engine.call_count(), 0);
    }
}

#[tokio::test]
async fn test_empty_key_rejected() {
    let actor = TestActor::new();
    assert_usage_error!(actor.storage.put(b"", Some(json!(1)), PutOptions::default()).await);
    assert_usage_error!(actor.storage.get(b"", GetOptions::default()).await);
    assert_usage_error!(actor.storage.delete(b"", PutOptions::default()).await);
    assert_eq!(actor.engine.call_count(), 0);
}

#[tokio::test]
async fn test_oversized_key_rejected_on_reads_and_deletes() {
    let actor = TestActor::new();
    let key = vec![b'k'; MAX_KEY_SIZE + 1];
    assert_usage_error!(actor.storage.get(&key, GetOptions::default()).await);
    assert_usage_error!(actor.storage.get_many(&[key.clone()], GetOptions::default()).await);
    assert_usage_error!(actor.storage.delete_many(&[key], PutOptions::default()).await);
    assert_eq!(actor.engine.call_count(), 0);
}

#[tokio::test]
async fn test_batch_limit_on_every_multi_key_call() {
    let actor = TestActor::new();
    let keys: Vec<Vec<u8>> = (0..129).map(|i| make_key("k", i)).collect();
    let entries: Vec<_> = keys.iter().map(|key| (key.clone(), Some(json!(1)))).collect();

    let get = actor.storage.get_many(&keys, GetOptions::default()).await;
    assert!(matches!(get, Err(StorageError::TooManyKeys { op: "get()", count: 129, limit: 128 })));

    let put = actor.storage.put_many(entries, PutOptions::default()).await;
    assert!(matches!(put, Err(StorageError::TooManyKeys { op: "put()", .. })));

    let delete = actor.storage.delete_many(&keys, PutOptions::default()).await;
    assert!(matches!(delete, Err(StorageError::TooManyKeys { op: "delete()", .. })));

    assert_eq!(actor.engine.call_count(), 0);

    let at_limit = &keys[..128];
    actor.storage.get_many(at_limit, GetOptions::default()).await.expect("128 keys are accepted");
}

#[tokio::test]
async fn test_put_many_is_all_or_nothing_on_usage_error() {
    let actor = TestActor::new();
    let entries = vec![
        (b"ok".to_vec(), Some(json!(1))),
        (b"too-big".to_vec(), Some(make_value(ENFORCED_MAX_VALUE_SIZE + 1))),
    ];
    assert_usage_error!(actor.storage.put_many(entries, PutOptions::default()).await);
    assert!(actor.engine.is_empty());
}

#[tokio::test]
async fn test_configured_limits() {
    let limits = SizeLimits::new(4, 16).expect("valid limits");
    let config = StorageConfig::builder().size_limits(limits).max_keys_per_batch(2).build().expect("config");
    let actor = TestActor::with_config(config);

    actor.storage.put(b"four", Some(json!("0123456789")), PutOptions::default()).await.expect("fits");
    assert_usage_error!(actor.storage.put(b"fiver", Some(json!(1)), PutOptions::default()).await);
    assert_usage_error!(actor.storage.put(b"k", Some(json!("0123456789abc")), PutOptions::default()).await);

    let keys = vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()];
    assert_usage_error!(actor.storage.get_many(&keys, GetOptions::default()).await);
}
