//! Frame and handle types for live connections.

use crate::types::{ConnectionId, Event, MutationKind, Timestamp};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// One server-to-client message on an event stream.
///
/// Serialized as a JSON object whose `type` field names the variant, e.g.
/// `{"type":"missed_events_summary","count":2,"since":1700000000000}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Frame {
    // --- Handshake ---
    /// Sent first on every stream.
    Connection {
        connection_id: ConnectionId,
        subject_id: String,
        timestamp: Timestamp,
    },

    /// Sent after `connection` when the client supplied a replay watermark.
    Reconnection {
        connection_id: ConnectionId,
        since: Timestamp,
        timestamp: Timestamp,
    },

    // --- Replay ---
    MissedEventsSummary {
        count: usize,
        since: Timestamp,
    },

    MissedEvent {
        event: Event,
    },

    /// Always sent after a replay, even one with zero events.
    MissedEventsEnd {
        count: usize,
        timestamp: Timestamp,
    },

    // --- Live ---
    /// Storage under `prefix` changed; cached reads of it are stale.
    Update {
        prefix: String,
        key: String,
        event_kind: MutationKind,
        timestamp: Timestamp,
        /// Same identity as the persisted event, for client-side dedup.
        source_key: String,
    },

    /// A directly published event.
    Event {
        event: Event,
    },

    Heartbeat {
        timestamp: Timestamp,
    },
}

impl Frame {
    /// Wire name, identical to the `type` field.
    pub fn name(&self) -> &'static str {
        match self {
            Frame::Connection { .. } => "connection",
            Frame::Reconnection { .. } => "reconnection",
            Frame::MissedEventsSummary { .. } => "missed_events_summary",
            Frame::MissedEvent { .. } => "missed_event",
            Frame::MissedEventsEnd { .. } => "missed_events_end",
            Frame::Update { .. } => "update",
            Frame::Event { .. } => "event",
            Frame::Heartbeat { .. } => "heartbeat",
        }
    }

    /// JSON body of the frame.
    pub fn to_json(&self) -> String {
        // Every field is a string, number, enum or JSON value.
        serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::warn!(frame = self.name(), error = %e, "frame encoding failed");
            format!("{{\"type\":\"{}\"}}", self.name())
        })
    }

    /// Text-event-stream encoding: `data: <json>` followed by a blank line.
    pub fn to_sse(&self) -> String {
        format!("data: {}\n\n", self.to_json())
    }
}

/// Snapshot of one registered connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub subject_id: String,
    pub connection_id: ConnectionId,
    pub opened_at: Timestamp,
    pub last_seen_at: Timestamp,
}

/// Result of one fan-out.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BroadcastOutcome {
    /// Connections that accepted the frame.
    pub delivered: usize,
    /// Connections whose buffer was full; the frame was dropped for them.
    pub dropped: usize,
    /// Connections found closed and removed.
    pub closed: usize,
}

impl BroadcastOutcome {
    pub fn attempted(&self) -> usize {
        self.delivered + self.dropped + self.closed
    }
}

/// Receiving end of a registered connection slot.
pub struct ConnectionHandle {
    pub subject_id: String,
    pub id: ConnectionId,
    pub opened_at: Timestamp,
    /// Frames fanned out to this connection.
    pub receiver: mpsc::Receiver<Frame>,
}

impl ConnectionHandle {
    /// Wait for the next frame. `None` once the slot is unregistered.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.receiver.recv().await
    }

    /// Take a frame if one is buffered.
    pub fn try_recv(&mut self) -> Result<Frame, mpsc::error::TryRecvError> {
        self.receiver.try_recv()
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("subject_id", &self.subject_id)
            .field("id", &self.id)
            .field("opened_at", &self.opened_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EventType;
    use serde_json::json;

    #[test]
    fn test_frame_type_tags() {
        let frame = Frame::MissedEventsSummary {
            count: 2,
            since: Timestamp(100),
        };
        let value: serde_json::Value = serde_json::from_str(&frame.to_json()).unwrap();
        assert_eq!(value, json!({"type": "missed_events_summary", "count": 2, "since": 100}));
        assert_eq!(frame.name(), "missed_events_summary");
    }

    #[test]
    fn test_update_frame_fields_are_camel_case() {
        let frame = Frame::Update {
            prefix: "ready_post/instagram/alice".into(),
            key: "ready_post/instagram/alice/post_1.json".into(),
            event_kind: MutationKind::Updated,
            timestamp: Timestamp(5),
            source_key: "k#updated#5".into(),
        };
        let value: serde_json::Value = serde_json::from_str(&frame.to_json()).unwrap();
        assert_eq!(value["type"], "update");
        assert_eq!(value["eventKind"], "updated");
        assert_eq!(value["prefix"], "ready_post/instagram/alice");
        assert_eq!(value["sourceKey"], "k#updated#5");
    }

    #[test]
    fn test_sse_encoding() {
        let frame = Frame::Heartbeat {
            timestamp: Timestamp(9),
        };
        assert_eq!(frame.to_sse(), "data: {\"type\":\"heartbeat\",\"timestamp\":9}\n\n");
    }

    #[test]
    fn test_missed_event_round_trip() {
        let event = Event::new("alice", EventType::Message, json!({"t": "hi"}), Timestamp(1), "m1");
        let frame = Frame::MissedEvent { event };
        let parsed: Frame = serde_json::from_str(&frame.to_json()).unwrap();
        assert_eq!(parsed, frame);
    }
}
