//! Core types shared across the relay.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Milliseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current wall-clock time.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp(duration.as_millis() as i64)
    }

    /// This timestamp moved back by `window`, clamped at the epoch.
    pub fn minus(self, window: Duration) -> Self {
        let millis = i64::try_from(window.as_millis()).unwrap_or(i64::MAX);
        Timestamp(self.0.saturating_sub(millis).max(0))
    }

    /// Milliseconds elapsed from `earlier` to `self` (zero if `earlier` is later).
    pub fn millis_since(self, earlier: Timestamp) -> u64 {
        u64::try_from(self.0.saturating_sub(earlier.0)).unwrap_or(0)
    }

    pub fn as_millis(self) -> i64 {
        self.0
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of platform event carried to clients.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Message,
    Comment,
    Connection,
    Update,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Message => "message",
            EventType::Comment => "comment",
            EventType::Connection => "connection",
            EventType::Update => "update",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of storage mutation reported by a webhook.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    Created,
    Updated,
    Deleted,
}

impl MutationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MutationKind::Created => "created",
            MutationKind::Updated => "updated",
            MutationKind::Deleted => "deleted",
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable platform event.
///
/// Identity is `(subject_id, source_key)`: appending the same pair twice
/// overwrites the stored record rather than adding a second one.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub subject_id: String,

    #[serde(rename = "type")]
    pub event_type: EventType,

    /// Opaque, producer-defined body.
    #[serde(default)]
    pub payload: serde_json::Value,

    pub occurred_at: Timestamp,

    pub source_key: String,
}

impl Event {
    pub fn new(
        subject_id: impl Into<String>,
        event_type: EventType,
        payload: serde_json::Value,
        occurred_at: Timestamp,
        source_key: impl Into<String>,
    ) -> Self {
        Self {
            subject_id: subject_id.into(),
            event_type,
            payload,
            occurred_at,
            source_key: source_key.into(),
        }
    }

    /// Replay order: ascending `occurred_at`, ties broken by `source_key`.
    pub fn replay_order(a: &Event, b: &Event) -> Ordering {
        a.occurred_at
            .cmp(&b.occurred_at)
            .then_with(|| a.source_key.cmp(&b.source_key))
    }

    /// Digest naming this event's record.
    pub fn digest(&self) -> SourceDigest {
        SourceDigest::of(&self.source_key)
    }
}

/// Truncated SHA-256 of a source key, used as the per-event record name.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceDigest(pub [u8; 16]);

impl SourceDigest {
    pub fn of(source_key: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(source_key.as_bytes());
        let full: [u8; 32] = hasher.finalize().into();
        let mut truncated = [0u8; 16];
        truncated.copy_from_slice(&full[..16]);
        SourceDigest(truncated)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for SourceDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SourceDigest({}...)", &self.to_hex()[..8])
    }
}

impl fmt::Display for SourceDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Identifier of one live streaming connection.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        ConnectionId(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionId({})", self.0)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
