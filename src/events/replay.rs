//! Ordered replay of missed events for reconnecting clients.

use super::store::DurableEventStore;
use crate::types::{Event, Timestamp};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Client-supplied replay boundary, as parsed from the `since` query value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Watermark {
    /// No `since` at all: a fresh connection, nothing to replay.
    Absent,
    /// A usable epoch-millis boundary.
    At(Timestamp),
    /// A `since` that could not be used; replaced by the default window.
    Invalid(String),
}

impl Watermark {
    pub fn parse(raw: Option<&str>) -> Self {
        let Some(raw) = raw.map(str::trim) else {
            return Watermark::Absent;
        };
        if raw.is_empty() {
            return Watermark::Absent;
        }
        match raw.parse::<i64>() {
            Ok(ms) if ms >= 0 => Watermark::At(Timestamp(ms)),
            _ => Watermark::Invalid(raw.to_string()),
        }
    }

    /// Whether the client asked for a replay at all.
    pub fn requested(&self) -> bool {
        !matches!(self, Watermark::Absent)
    }

    /// Concrete boundary: the client's value if usable, else `now - window`.
    pub fn resolve(&self, now: Timestamp, window: Duration) -> Timestamp {
        match self {
            Watermark::At(ts) => *ts,
            Watermark::Absent => now.minus(window),
            Watermark::Invalid(raw) => {
                warn!(since = %raw, "unusable replay watermark, using default window");
                now.minus(window)
            }
        }
    }
}

/// Reads a subject's backlog from the durable store and orders it.
#[derive(Clone)]
pub struct ReplayEngine {
    store: Arc<DurableEventStore>,
    window: Duration,
}

impl ReplayEngine {
    pub fn new(store: Arc<DurableEventStore>, window: Duration) -> Self {
        Self { store, window }
    }

    /// Default backfill window for unusable watermarks.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Events of `subject` newer than `since`, ascending by time then source key.
    ///
    /// A `since` in the future yields nothing without touching storage.
    pub async fn replay(&self, subject: &str, since: Timestamp) -> Vec<Event> {
        if since > Timestamp::now() {
            debug!(subject, %since, "replay watermark is in the future");
            return Vec::new();
        }

        let mut events = self.store.list_since(subject, since).await;
        events.sort_by(Event::replay_order);
        debug!(subject, %since, count = events.len(), "replay assembled");
        events
    }

    /// Resolve `watermark` and replay from it.
    pub async fn replay_from(&self, subject: &str, watermark: &Watermark) -> (Timestamp, Vec<Event>) {
        let since = watermark.resolve(Timestamp::now(), self.window);
        (since, self.replay(subject, since).await)
    }

    /// Run a replay on its own task so storage latency never holds up fan-out.
    pub fn spawn(&self, subject: String, since: Timestamp) -> JoinHandle<Vec<Event>> {
        let engine = self.clone();
        tokio::spawn(async move { engine.replay(&subject, since).await })
    }
}
