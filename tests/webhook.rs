//! Webhook-driven invalidation, end to end.

use herald::{
    Cache, ConnectionRegistry, DurableEventStore, EventType, Frame, MemoryObjectStore,
    MutationKind, MutationNotice, Relay, RelayConfig, RelayError, ReplayEngine, RetryPolicy,
    Timestamp, WebhookInvalidator, WebhookPayload,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    cache: Arc<Cache>,
    registry: Arc<ConnectionRegistry>,
    objects: Arc<MemoryObjectStore>,
    store: Arc<DurableEventStore>,
    invalidator: WebhookInvalidator,
}

fn harness() -> Harness {
    let cache = Arc::new(Cache::new(64, Duration::from_secs(300)));
    let registry = Arc::new(ConnectionRegistry::new());
    let objects = Arc::new(MemoryObjectStore::new());
    let store = Arc::new(DurableEventStore::new(objects.clone(), RetryPolicy::none()));
    let invalidator =
        WebhookInvalidator::new(cache.clone(), registry.clone(), store.clone());
    Harness {
        cache,
        registry,
        objects,
        store,
        invalidator,
    }
}

fn notice(event: &str, key: &str) -> MutationNotice {
    MutationNotice::try_from(WebhookPayload {
        event: event.into(),
        key: key.into(),
    })
    .unwrap()
}

// --- Invalidator ---

#[tokio::test]
async fn test_put_invalidates_and_notifies_subject() {
    let h = harness();
    let prefix = "ready_post/instagram/alice";
    h.cache.put(prefix, json!({"posts": []}));
    assert!(h.cache.should_use(prefix, Duration::from_secs(300)));

    let mut alice = h.registry.register("alice");
    let mut bob = h.registry.register("bob");

    let report = h
        .invalidator
        .process(&notice("ObjectCreated:Put", "ready_post/instagram/alice/post_1.json"))
        .await
        .unwrap();
    assert_eq!(report.prefix, prefix);
    assert_eq!(report.evicted, Some(true));
    assert!(report.persisted);

    for ttl in [Duration::ZERO, Duration::from_secs(1), Duration::from_secs(86_400)] {
        assert!(!h.cache.should_use(prefix, ttl));
    }

    match alice.try_recv().unwrap() {
        Frame::Update {
            prefix: got,
            key,
            event_kind,
            ..
        } => {
            assert_eq!(got, prefix);
            assert_eq!(key, "ready_post/instagram/alice/post_1.json");
            assert_eq!(event_kind, MutationKind::Updated);
        }
        other => panic!("expected update, got {other:?}"),
    }
    assert!(bob.try_recv().is_err());
}

#[tokio::test]
async fn test_mutation_is_replayable() {
    let h = harness();
    h.invalidator
        .process(&notice("ObjectRemoved:Delete", "ready_comment/facebook/alice/c9.json"))
        .await
        .unwrap();

    let engine = ReplayEngine::new(h.store.clone(), Duration::from_secs(900));
    let events = engine.replay("alice", Timestamp(0)).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, EventType::Comment);
    assert_eq!(events[0].payload["eventKind"], json!("deleted"));
    assert_eq!(events[0].payload["prefix"], json!("ready_comment/facebook/alice"));
}

#[tokio::test]
async fn test_malformed_key_has_no_side_effects() {
    let h = harness();
    h.cache.put("a/b/c", json!(1));
    let mut conn = h.registry.register("alice");

    for key in ["alice/post_1.json", "a/b//post.json", "a/b/c/d/e.json", ""] {
        let err = h
            .invalidator
            .process(&notice("ObjectCreated:Put", key))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::MalformedKey { .. }), "{key}");
    }

    assert!(h.cache.should_use("a/b/c", Duration::from_secs(60)));
    assert!(conn.try_recv().is_err());
    assert!(h.objects.is_empty());
}

#[tokio::test]
async fn test_own_event_records_are_ignored() {
    let h = harness();
    let err = h
        .invalidator
        .process(&notice("ObjectCreated:Put", "events/alice/x/abc.json"))
        .await
        .unwrap_err();
    assert!(matches!(err, RelayError::MalformedKey { .. }));
    assert!(h.objects.is_empty());
}

#[tokio::test]
async fn test_persist_failure_still_notifies() {
    let h = harness();
    h.objects.fail_next_puts(1);
    let mut conn = h.registry.register("alice");

    let report = h
        .invalidator
        .process(&notice("ObjectCreated:Post", "ready_post/x/alice/p.json"))
        .await
        .unwrap();
    assert!(!report.persisted);
    assert_eq!(report.broadcast.map(|b| b.delivered), Some(1));
    assert!(matches!(conn.try_recv().unwrap(), Frame::Update { .. }));
}

#[test]
fn test_unknown_event_name_is_rejected() {
    let err = MutationNotice::try_from(WebhookPayload {
        event: "ObjectAccessed:Get".into(),
        key: "ready_post/instagram/alice/post_1.json".into(),
    })
    .unwrap_err();
    assert!(matches!(err, RelayError::UnknownMutation(_)));
}

// --- Through the relay ---

#[tokio::test]
async fn test_relay_webhook_reaches_open_stream() {
    let relay = Relay::start(
        Arc::new(MemoryObjectStore::new()),
        RelayConfig {
            replay_frame_delay: Duration::ZERO,
            ..Default::default()
        },
    );
    relay
        .cache()
        .put("ready_post/instagram/alice", json!({"cached": true}));

    let mut rx = relay.open_stream("alice", None);
    let first = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(first, Frame::Connection { .. }));

    assert!(relay.submit_webhook(WebhookPayload {
        event: "ObjectCreated:Put".into(),
        key: "ready_post/instagram/alice/post_1.json".into(),
    }));

    let frame = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    match frame {
        Frame::Update { prefix, .. } => assert_eq!(prefix, "ready_post/instagram/alice"),
        other => panic!("expected update, got {other:?}"),
    }
    assert!(!relay
        .cache()
        .should_use("ready_post/instagram/alice", Duration::from_secs(300)));

    relay.shutdown().await.unwrap();
}
