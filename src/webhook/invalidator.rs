//! Turns storage mutations into cache evictions and live updates.

use super::key::StorageKey;
use super::notice::MutationNotice;
use crate::cache::Cache;
use crate::error::Result;
use crate::events::DurableEventStore;
use crate::registry::{BroadcastOutcome, ConnectionRegistry, Frame};
use crate::types::{Event, MutationKind, Timestamp};
use futures::FutureExt;
use serde_json::json;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// What happened while processing one notification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvalidationReport {
    pub key: String,
    pub kind: MutationKind,
    pub prefix: String,
    pub subject: String,
    /// `Some(true)` if an entry was evicted, `None` if the step failed.
    pub evicted: Option<bool>,
    /// `None` if the step failed.
    pub broadcast: Option<BroadcastOutcome>,
    pub persisted: bool,
}

/// Applies mutation notifications to the cache, live connections and log.
///
/// The three steps run independently: a failure in one is logged and the
/// others still run.
pub struct WebhookInvalidator {
    cache: Arc<Cache>,
    registry: Arc<ConnectionRegistry>,
    store: Arc<DurableEventStore>,
    /// Distinguishes mutations of one key observed within the same millisecond.
    sequence: AtomicU64,
}

impl WebhookInvalidator {
    pub fn new(
        cache: Arc<Cache>,
        registry: Arc<ConnectionRegistry>,
        store: Arc<DurableEventStore>,
    ) -> Self {
        Self {
            cache,
            registry,
            store,
            sequence: AtomicU64::new(0),
        }
    }

    /// Process one notification.
    ///
    /// Only a malformed key is an error; the notification is then dropped.
    pub async fn process(&self, notice: &MutationNotice) -> Result<InvalidationReport> {
        let key = match StorageKey::parse(&notice.key) {
            Ok(key) => key,
            Err(e) => {
                warn!(key = %notice.key, error = %e, "dropping webhook with malformed key");
                return Err(e);
            }
        };

        let prefix = key.cache_prefix();
        let subject = key.subject().to_string();
        let now = Timestamp::now();
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let source_key = format!("{}#{}#{}#{}", key.raw(), notice.kind, now, seq);

        let evicted = guarded("invalidate", key.raw(), || self.cache.invalidate(&prefix));

        let frame = Frame::Update {
            prefix: prefix.clone(),
            key: key.raw().to_string(),
            event_kind: notice.kind,
            timestamp: now,
            source_key: source_key.clone(),
        };
        let broadcast = guarded("broadcast", key.raw(), || {
            self.registry.broadcast(&subject, frame)
        });

        let event = Event::new(
            subject.clone(),
            key.event_type(),
            json!({
                "prefix": prefix,
                "key": key.raw(),
                "eventKind": notice.kind,
            }),
            now,
            source_key,
        );
        let persisted = match AssertUnwindSafe(self.store.append(&event))
            .catch_unwind()
            .await
        {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                warn!(key = %key, subject = %subject, error = %e, "failed to persist mutation event");
                false
            }
            Err(_) => {
                warn!(key = %key, subject = %subject, "persist step panicked");
                false
            }
        };

        debug!(
            key = %key,
            prefix = %prefix,
            kind = %notice.kind,
            ?evicted,
            delivered = broadcast.map(|b| b.delivered),
            persisted,
            "mutation processed"
        );

        Ok(InvalidationReport {
            key: key.raw().to_string(),
            kind: notice.kind,
            prefix,
            subject,
            evicted,
            broadcast,
            persisted,
        })
    }
}

/// Run one synchronous step inside its own fault boundary.
fn guarded<T>(step: &'static str, key: &str, f: impl FnOnce() -> T) -> Option<T> {
    match std::panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(step, key, "invalidation step panicked");
            None
        }
    }
}
