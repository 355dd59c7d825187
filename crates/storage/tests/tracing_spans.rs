//! Integration test verifying that `#[instrument]` annotations produce
//! the expected spans on storage operations.

#![allow(clippy::expect_used)]

use std::sync::{Arc, Mutex};

use actor_storage::{
    GetOptions, ListOptions, PutOptions, StorageError, StorageOperations, testutil::TestActor,
};
use serde_json::json;
use tracing::Subscriber;
use tracing_subscriber::{layer::SubscriberExt, registry::LookupSpan};

// ---------------------------------------------------------------------------
// Collecting layer: records span names as they are created
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
struct SpanCollector {
    spans: Arc<Mutex<Vec<String>>>,
}

impl<S> tracing_subscriber::Layer<S> for SpanCollector
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(
        &self,
        _attrs: &tracing::span::Attributes<'_>,
        id: &tracing::span::Id,
        ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        if let Some(span) = ctx.span(id) {
            self.spans.lock().expect("lock poisoned").push(span.name().to_owned());
        }
    }
}

fn install() -> (Arc<Mutex<Vec<String>>>, tracing::subscriber::DefaultGuard) {
    let collector = SpanCollector::default();
    let spans = Arc::clone(&collector.spans);
    let subscriber = tracing_subscriber::registry().with(collector);
    (spans, tracing::subscriber::set_default(subscriber))
}

fn assert_span(spans: &Arc<Mutex<Vec<String>>>, name: &str) {
    let recorded = spans.lock().expect("lock poisoned");
    assert!(recorded.iter().any(|s| s == name), "expected a '{name}' span, got: {recorded:?}");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn storage_put_creates_span() {
    let (spans, _guard) = install();
    let actor = TestActor::new();
    actor.storage.put(b"key-1", Some(json!("value-1")), PutOptions::default()).await.expect("put");
    assert_span(&spans, "put");
}

#[tokio::test]
async fn storage_get_creates_span() {
    let (spans, _guard) = install();
    let actor = TestActor::new();
    let _ = actor.storage.get(b"missing", GetOptions::default()).await;
    assert_span(&spans, "get");
}

#[tokio::test]
async fn storage_get_many_creates_span() {
    let (spans, _guard) = install();
    let actor = TestActor::new();
    let _ = actor.storage.get_many(&[b"a".to_vec(), b"b".to_vec()], GetOptions::default()).await;
    assert_span(&spans, "get_many");
}

#[tokio::test]
async fn storage_list_creates_span() {
    let (spans, _guard) = install();
    let actor = TestActor::new();
    let _ = actor.storage.list(ListOptions::builder().prefix(b"a".to_vec()).build()).await;
    assert_span(&spans, "list");
}

#[tokio::test]
async fn storage_delete_creates_span() {
    let (spans, _guard) = install();
    let actor = TestActor::new();
    actor.storage.delete(b"key", PutOptions::default()).await.expect("delete");
    assert_span(&spans, "delete");
}

#[tokio::test]
async fn storage_delete_all_creates_span() {
    let (spans, _guard) = install();
    let actor = TestActor::new();
    actor.storage.delete_all(PutOptions::default()).await.expect("delete_all");
    assert_span(&spans, "delete_all");
}

#[tokio::test]
async fn storage_transaction_creates_spans() {
    let (spans, _guard) = install();
    let actor = TestActor::new();
    actor
        .storage
        .transaction(|txn| async move {
            txn.put(b"k", Some(json!(1)), PutOptions::default()).await?;
            Ok::<_, StorageError>(())
        })
        .await
        .expect("transaction");

    assert_span(&spans, "transaction");
    assert_span(&spans, "put");
}
