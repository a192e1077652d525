//! Durable per-subject event log on top of an object store.

use super::retry::RetryPolicy;
use crate::error::{RelayError, Result};
use crate::objects::{ObjectMeta, ObjectStore};
use crate::types::{Event, Timestamp};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{debug, warn};

/// Root prefix for event records.
pub const EVENTS_ROOT: &str = "events";

/// Max record reads in flight during one listing.
const READ_CONCURRENCY: usize = 8;

/// Appends events under `events/{subject}/` and reads them back.
pub struct DurableEventStore {
    objects: Arc<dyn ObjectStore>,
    retry: RetryPolicy,
}

impl DurableEventStore {
    pub fn new(objects: Arc<dyn ObjectStore>, retry: RetryPolicy) -> Self {
        Self { objects, retry }
    }

    /// Prefix under which every record of `subject` lives.
    pub fn subject_prefix(subject: &str) -> String {
        format!("{EVENTS_ROOT}/{subject}/")
    }

    /// Record key for `event`; stable per `(subject_id, source_key)`.
    pub fn record_key(event: &Event) -> String {
        format!(
            "{}{}.json",
            Self::subject_prefix(&event.subject_id),
            event.digest()
        )
    }

    /// Reject subjects that are not a single path segment.
    pub fn validate_subject(subject: &str) -> Result<()> {
        if subject.is_empty() || subject.contains('/') || subject == "." || subject == ".." {
            return Err(RelayError::MalformedKey {
                key: subject.to_string(),
                reason: "subject must be a single non-empty path segment".into(),
            });
        }
        Ok(())
    }

    /// Persist `event`. Appending the same source key twice overwrites.
    pub async fn append(&self, event: &Event) -> Result<String> {
        Self::validate_subject(&event.subject_id)?;
        let key = Self::record_key(event);
        let blob = serde_json::to_vec(event)?;

        self.retry
            .run("append", || self.objects.put(&key, blob.clone()))
            .await?;

        debug!(subject = %event.subject_id, key = %key, "appended event");
        Ok(key)
    }

    /// Every readable event of `subject` with `occurred_at > since`, unordered.
    ///
    /// Never fails: an exhausted listing yields an empty sequence, and a
    /// record that cannot be read or decoded is skipped with a warning.
    pub async fn list_since(&self, subject: &str, since: Timestamp) -> Vec<Event> {
        if let Err(e) = Self::validate_subject(subject) {
            warn!(subject, error = %e, "refusing to list events");
            return Vec::new();
        }

        let prefix = Self::subject_prefix(subject);
        let listed = match self
            .retry
            .run("list", || self.objects.list_by_prefix(&prefix))
            .await
        {
            Ok(listed) => listed,
            Err(e) => {
                warn!(subject, error = %e, "event listing failed, treating as empty");
                return Vec::new();
            }
        };

        stream::iter(listed)
            .map(|meta| self.read_record(subject, meta))
            .buffer_unordered(READ_CONCURRENCY)
            .filter_map(|event| async move { event })
            .filter(|event| {
                let keep = event.occurred_at > since;
                async move { keep }
            })
            .collect()
            .await
    }

    /// Number of readable records for `subject`.
    pub async fn count(&self, subject: &str) -> usize {
        self.list_since(subject, Timestamp(i64::MIN)).await.len()
    }

    /// Most recent event of `subject` in replay order.
    pub async fn latest(&self, subject: &str) -> Option<Event> {
        self.list_since(subject, Timestamp(i64::MIN))
            .await
            .into_iter()
            .max_by(Event::replay_order)
    }

    async fn read_record(&self, subject: &str, meta: ObjectMeta) -> Option<Event> {
        let blob = match self.retry.run("get", || self.objects.get(&meta.key)).await {
            Ok(Some(blob)) => blob,
            Ok(None) => {
                // Listed but gone: the store is eventually consistent.
                debug!(subject, key = %meta.key, "listed record vanished before read");
                return None;
            }
            Err(e) => {
                warn!(subject, key = %meta.key, error = %e, "skipping unreadable event record");
                return None;
            }
        };

        match serde_json::from_slice::<Event>(&blob) {
            Ok(event) if event.subject_id == subject => Some(event),
            Ok(event) => {
                warn!(
                    subject,
                    key = %meta.key,
                    found = %event.subject_id,
                    "skipping event filed under the wrong subject"
                );
                None
            }
            Err(e) => {
                warn!(subject, key = %meta.key, error = %e, "skipping undecodable event record");
                None
            }
        }
    }
}
