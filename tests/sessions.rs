//! Connection lifecycle and fan-out behavior.

use herald::{
    CloseReason, ConnectionRegistry, DurableEventStore, Frame, MemoryObjectStore, Relay,
    RelayConfig, ReplayEngine, RetryPolicy, SessionSettings, StreamSession, Timestamp, Watermark,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn heartbeat(ts: i64) -> Frame {
    Frame::Heartbeat {
        timestamp: Timestamp(ts),
    }
}

async fn wait_for_connections(registry: &ConnectionRegistry, expected: usize) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while registry.connection_count() != expected {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("connection count never settled");
}

// --- Registry ---

#[tokio::test]
async fn test_broadcast_is_scoped_to_subject() {
    let registry = ConnectionRegistry::new();
    let mut a1 = registry.register("alice");
    let mut a2 = registry.register("alice");
    let mut b = registry.register("bob");

    let outcome = registry.broadcast("alice", heartbeat(1));
    assert_eq!(outcome.delivered, 2);

    assert_eq!(a1.try_recv().unwrap(), heartbeat(1));
    assert_eq!(a2.try_recv().unwrap(), heartbeat(1));
    assert!(b.try_recv().is_err());
}

#[tokio::test]
async fn test_unregistered_handle_gets_nothing() {
    let registry = ConnectionRegistry::new();
    let mut conn = registry.register("alice");
    assert!(registry.unregister("alice", conn.id));
    assert!(!registry.unregister("alice", conn.id));

    let outcome = registry.broadcast("alice", heartbeat(1));
    assert_eq!(outcome.attempted(), 0);
    assert!(conn.recv().await.is_none());
    assert_eq!(registry.subject_count(), 0);
}

#[tokio::test]
async fn test_slow_consumer_does_not_stall_others() {
    let registry = ConnectionRegistry::with_buffer_size(2);
    let _stalled = registry.register("alice");
    let mut reader = registry.register("alice");

    let mut dropped = 0;
    for i in 0..10 {
        let outcome = registry.broadcast("alice", heartbeat(i));
        dropped += outcome.dropped;
        assert_eq!(reader.try_recv().unwrap(), heartbeat(i));
    }
    assert_eq!(dropped, 8);
    assert_eq!(registry.connection_count(), 2);
}

#[tokio::test]
async fn test_closed_receiver_is_pruned_on_broadcast() {
    let registry = ConnectionRegistry::new();
    let gone = registry.register("alice");
    let mut kept = registry.register("alice");
    drop(gone);

    let outcome = registry.broadcast("alice", heartbeat(3));
    assert_eq!(outcome.delivered, 1);
    assert_eq!(outcome.closed, 1);
    assert_eq!(registry.connection_count(), 1);
    assert_eq!(kept.try_recv().unwrap(), heartbeat(3));
}

// --- Sessions ---

#[tokio::test]
async fn test_client_disconnect_releases_slot() {
    let relay = Relay::start(Arc::new(MemoryObjectStore::new()), RelayConfig::default());
    let mut rx = relay.open_stream("alice", None);
    assert!(matches!(rx.recv().await, Some(Frame::Connection { .. })));
    assert_eq!(relay.registry().connection_count(), 1);

    drop(rx);
    wait_for_connections(relay.registry(), 0).await;

    let outcome = relay.registry().broadcast("alice", heartbeat(9));
    assert_eq!(outcome.attempted(), 0);
    relay.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_session_summary_on_shutdown() {
    let store = Arc::new(DurableEventStore::new(
        Arc::new(MemoryObjectStore::new()),
        RetryPolicy::none(),
    ));
    let registry = Arc::new(ConnectionRegistry::new());
    let shutdown = CancellationToken::new();
    let (tx, mut rx) = mpsc::channel(16);

    let session = StreamSession::new(
        "alice",
        Watermark::parse(Some("0")),
        registry.clone(),
        ReplayEngine::new(store, Duration::from_secs(900)),
        SessionSettings {
            heartbeat_interval: Duration::from_secs(30),
            replay_frame_delay: Duration::ZERO,
        },
        tx,
        shutdown.clone(),
    );
    let task = tokio::spawn(session.run());

    // connection, reconnection, summary, end
    for _ in 0..4 {
        rx.recv().await.unwrap();
    }
    shutdown.cancel();

    let summary = task.await.unwrap();
    assert_eq!(summary.close_reason, CloseReason::Shutdown);
    assert_eq!(summary.replayed, Some(0));
    assert_eq!(summary.frames_sent, 4);
    assert!(summary.connection_id.is_some());
    assert_eq!(registry.connection_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_idle_stream_heartbeats() {
    let relay = Relay::start(
        Arc::new(MemoryObjectStore::new()),
        RelayConfig {
            heartbeat_interval: Duration::from_secs(30),
            ..Default::default()
        },
    );
    let mut rx = relay.open_stream("alice", None);
    assert!(matches!(rx.recv().await, Some(Frame::Connection { .. })));

    for _ in 0..3 {
        assert!(matches!(rx.recv().await, Some(Frame::Heartbeat { .. })));
    }
    relay.shutdown().await.unwrap();
}
