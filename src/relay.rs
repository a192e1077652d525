//! Main Relay struct tying all components together.

use crate::cache::{Cache, CacheStats};
use crate::config::RelayConfig;
use crate::error::{RelayError, Result};
use crate::events::{DurableEventStore, ReplayEngine, Watermark};
use crate::objects::ObjectStore;
use crate::registry::{BroadcastOutcome, ConnectionRegistry, Frame};
use crate::session::{SessionSettings, StreamSession};
use crate::types::{Event, EventType, Timestamp};
use crate::webhook::{MutationNotice, WebhookInvalidator, WebhookPayload, WebhookQueue};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Outcome of a direct publish.
#[derive(Clone, Debug)]
pub struct PublishOutcome {
    pub event: Event,
    pub persisted: bool,
    pub broadcast: BroadcastOutcome,
}

/// Point-in-time service counters.
#[derive(Clone, Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub connections: usize,
    pub subjects: usize,
    pub cache: CacheHealth,
}

#[derive(Clone, Debug, Serialize)]
pub struct CacheHealth {
    pub hits: u64,
    pub misses: u64,
    pub invalidations: u64,
    pub entries: usize,
}

impl From<CacheStats> for CacheHealth {
    fn from(stats: CacheStats) -> Self {
        Self {
            hits: stats.hits,
            misses: stats.misses,
            invalidations: stats.invalidations,
            entries: stats.entries,
        }
    }
}

/// The event relay.
///
/// Provides a unified interface for:
/// - Opening per-subject event streams (with replay)
/// - Accepting storage webhooks
/// - Publishing events directly
///
/// Built once per process and shared by every request handler.
pub struct Relay {
    config: RelayConfig,
    cache: Arc<Cache>,
    registry: Arc<ConnectionRegistry>,
    store: Arc<DurableEventStore>,
    replay: ReplayEngine,
    invalidator: Arc<WebhookInvalidator>,
    webhooks: WebhookQueue,
    shutdown: CancellationToken,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl Relay {
    /// Build the relay and start its background tasks.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(objects: Arc<dyn ObjectStore>, config: RelayConfig) -> Arc<Self> {
        let shutdown = CancellationToken::new();

        let cache = Arc::new(Cache::new(config.cache_capacity, config.cache_ttl));
        let registry = Arc::new(ConnectionRegistry::with_buffer_size(config.connection_buffer));
        let store = Arc::new(DurableEventStore::new(objects, config.retry.clone()));
        let replay = ReplayEngine::new(Arc::clone(&store), config.replay_window);
        let invalidator = Arc::new(WebhookInvalidator::new(
            Arc::clone(&cache),
            Arc::clone(&registry),
            Arc::clone(&store),
        ));

        let (webhooks, worker) = WebhookQueue::spawn(
            Arc::clone(&invalidator),
            config.webhook_queue,
            shutdown.child_token(),
        );
        let sweeper = Arc::clone(&cache)
            .spawn_sweeper(config.cache_sweep_interval, shutdown.child_token());

        info!(
            replay_window = ?config.replay_window,
            heartbeat = ?config.heartbeat_interval,
            "relay started"
        );

        Arc::new(Self {
            config,
            cache,
            registry,
            store,
            replay,
            invalidator,
            webhooks,
            shutdown,
            background: Mutex::new(vec![worker, sweeper]),
        })
    }

    // --- Streams ---

    /// Open an event stream for `subject` and return its frame receiver.
    ///
    /// The session runs on its own task until the receiver is dropped or the
    /// relay shuts down.
    pub fn open_stream(&self, subject: &str, since: Option<&str>) -> mpsc::Receiver<Frame> {
        let (transport, receiver) = mpsc::channel(self.config.connection_buffer.max(1));
        let session = StreamSession::new(
            subject,
            Watermark::parse(since),
            Arc::clone(&self.registry),
            self.replay.clone(),
            SessionSettings::from(&self.config),
            transport,
            self.shutdown.child_token(),
        );
        tokio::spawn(session.run());
        receiver
    }

    /// Ordered backlog for `subject`, without opening a stream.
    pub async fn missed(&self, subject: &str, since: Option<&str>) -> (Timestamp, Vec<Event>) {
        self.replay.replay_from(subject, &Watermark::parse(since)).await
    }

    // --- Mutations ---

    /// Queue a webhook notification for processing.
    ///
    /// An unknown event name is logged and dropped; so is a notification the
    /// full queue cannot take. Neither is surfaced to the webhook caller.
    pub fn submit_webhook(&self, payload: WebhookPayload) -> bool {
        match MutationNotice::try_from(payload) {
            Ok(notice) => self.webhooks.enqueue(notice),
            Err(e) => {
                warn!(error = %e, "ignoring webhook");
                false
            }
        }
    }

    /// Append an event and push it to live connections.
    pub async fn publish(
        &self,
        subject: &str,
        event_type: EventType,
        payload: serde_json::Value,
        source_key: Option<String>,
    ) -> Result<PublishOutcome> {
        DurableEventStore::validate_subject(subject)?;

        let source_key = source_key.unwrap_or_else(|| Uuid::new_v4().to_string());
        let event = Event::new(subject, event_type, payload, Timestamp::now(), source_key);

        let persisted = match self.store.append(&event).await {
            Ok(_) => true,
            Err(e) => {
                warn!(subject, source_key = %event.source_key, error = %e, "publish not persisted");
                false
            }
        };
        let broadcast = self.registry.broadcast(
            subject,
            Frame::Event {
                event: event.clone(),
            },
        );
        debug!(subject, delivered = broadcast.delivered, persisted, "event published");

        Ok(PublishOutcome {
            event,
            persisted,
            broadcast,
        })
    }

    // --- Accessors ---

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<Cache> {
        &self.cache
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<DurableEventStore> {
        &self.store
    }

    pub fn invalidator(&self) -> &Arc<WebhookInvalidator> {
        &self.invalidator
    }

    pub fn health(&self) -> HealthReport {
        HealthReport {
            status: if self.shutdown.is_cancelled() {
                "shutting_down"
            } else {
                "ok"
            },
            connections: self.registry.connection_count(),
            subjects: self.registry.subject_count(),
            cache: self.cache.stats().into(),
        }
    }

    // --- Shutdown ---

    /// Token cancelled when the relay begins shutting down.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Close every session and stop background tasks.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown.cancel();
        let tasks: Vec<_> = std::mem::take(&mut *self.background.lock());
        for task in tasks {
            task.await.map_err(RelayError::from)?;
        }
        info!("relay stopped");
        Ok(())
    }
}
