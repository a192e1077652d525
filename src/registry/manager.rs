//! Connection registry for fanning frames out to live streams.

use crate::types::{ConnectionId, Timestamp};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use super::types::{BroadcastOutcome, ConnectionHandle, ConnectionInfo, Frame};

/// Default frames buffered per connection.
const DEFAULT_BUFFER_SIZE: usize = 256;

/// Internal connection slot state.
struct Slot {
    sender: mpsc::Sender<Frame>,
    opened_at: Timestamp,
    last_seen_at: AtomicI64,
}

impl Slot {
    fn info(&self, subject: &str, id: ConnectionId) -> ConnectionInfo {
        ConnectionInfo {
            subject_id: subject.to_string(),
            connection_id: id,
            opened_at: self.opened_at,
            last_seen_at: Timestamp(self.last_seen_at.load(Ordering::Relaxed)),
        }
    }
}

/// Tracks live connections per subject.
///
/// Fan-out never waits on a connection: a full buffer means the frame is
/// dropped for that connection only (the client recovers it on its next
/// replay), and a closed buffer removes the slot.
pub struct ConnectionRegistry {
    /// Slots by subject, then connection.
    subjects: RwLock<HashMap<String, HashMap<ConnectionId, Slot>>>,
    /// Frames buffered per connection.
    buffer_size: usize,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::with_buffer_size(DEFAULT_BUFFER_SIZE)
    }

    pub fn with_buffer_size(buffer_size: usize) -> Self {
        Self {
            subjects: RwLock::new(HashMap::new()),
            buffer_size: buffer_size.max(1),
        }
    }

    /// Open a new connection slot for `subject`.
    pub fn register(&self, subject: &str) -> ConnectionHandle {
        let id = ConnectionId::new();
        let now = Timestamp::now();
        let (sender, receiver) = mpsc::channel(self.buffer_size);

        let slot = Slot {
            sender,
            opened_at: now,
            last_seen_at: AtomicI64::new(now.0),
        };

        self.subjects
            .write()
            .entry(subject.to_string())
            .or_default()
            .insert(id, slot);

        debug!(subject, connection_id = %id, "connection registered");

        ConnectionHandle {
            subject_id: subject.to_string(),
            id,
            opened_at: now,
            receiver,
        }
    }

    /// Remove a slot. Unknown or already-removed slots are a no-op.
    ///
    /// Returns whether a slot was removed.
    pub fn unregister(&self, subject: &str, id: ConnectionId) -> bool {
        let mut subjects = self.subjects.write();
        let Some(slots) = subjects.get_mut(subject) else {
            return false;
        };
        let removed = slots.remove(&id).is_some();
        if slots.is_empty() {
            subjects.remove(subject);
        }
        if removed {
            debug!(subject, connection_id = %id, "connection unregistered");
        }
        removed
    }

    /// Push `frame` to every connection of `subject`.
    pub fn broadcast(&self, subject: &str, frame: Frame) -> BroadcastOutcome {
        let mut outcome = BroadcastOutcome::default();
        let mut to_remove = Vec::new();

        {
            let subjects = self.subjects.read();
            let Some(slots) = subjects.get(subject) else {
                debug!(
                    subject,
                    frame = frame.name(),
                    "no active listeners, event will be replay-recoverable"
                );
                return outcome;
            };

            for (id, slot) in slots.iter() {
                match slot.sender.try_send(frame.clone()) {
                    Ok(()) => outcome.delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        outcome.dropped += 1;
                        warn!(
                            subject,
                            connection_id = %id,
                            frame = frame.name(),
                            "connection buffer full, dropping frame"
                        );
                    }
                    Err(TrySendError::Closed(_)) => {
                        outcome.closed += 1;
                        to_remove.push(*id);
                    }
                }
            }
        }

        // Remove slots whose receiver is gone
        if !to_remove.is_empty() {
            let mut subjects = self.subjects.write();
            if let Some(slots) = subjects.get_mut(subject) {
                for id in &to_remove {
                    slots.remove(id);
                }
                if slots.is_empty() {
                    subjects.remove(subject);
                }
            }
            debug!(subject, removed = to_remove.len(), "pruned closed connections");
        }

        outcome
    }

    /// Record activity on a connection.
    pub fn touch(&self, subject: &str, id: ConnectionId) -> bool {
        let subjects = self.subjects.read();
        match subjects.get(subject).and_then(|slots| slots.get(&id)) {
            Some(slot) => {
                slot.last_seen_at
                    .store(Timestamp::now().0, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Whether a slot is still registered.
    pub fn contains(&self, subject: &str, id: ConnectionId) -> bool {
        self.subjects
            .read()
            .get(subject)
            .is_some_and(|slots| slots.contains_key(&id))
    }

    /// Total registered connections.
    pub fn connection_count(&self) -> usize {
        self.subjects.read().values().map(HashMap::len).sum()
    }

    /// Subjects with at least one connection.
    pub fn subject_count(&self) -> usize {
        self.subjects.read().len()
    }

    /// Connections of one subject.
    pub fn connections(&self, subject: &str) -> Vec<ConnectionInfo> {
        self.subjects
            .read()
            .get(subject)
            .map(|slots| {
                slots
                    .iter()
                    .map(|(id, slot)| slot.info(subject, *id))
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heartbeat(ts: i64) -> Frame {
        Frame::Heartbeat {
            timestamp: Timestamp(ts),
        }
    }

    #[test]
    fn test_register_unregister() {
        let registry = ConnectionRegistry::new();

        let handle = registry.register("alice");
        assert_eq!(registry.connection_count(), 1);
        assert_eq!(registry.subject_count(), 1);

        assert!(registry.unregister("alice", handle.id));
        assert_eq!(registry.connection_count(), 0);
        // Last slot gone removes the subject entry too.
        assert_eq!(registry.subject_count(), 0);
    }

    #[test]
    fn test_broadcast_fans_out_per_subject() {
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

    #[test]
    fn test_broadcast_without_listeners_is_noop() {
        let registry = ConnectionRegistry::new();
        let outcome = registry.broadcast("nobody", heartbeat(1));
        assert_eq!(outcome, BroadcastOutcome::default());
    }

    #[test]
    fn test_unregistered_handle_gets_nothing() {
        let registry = ConnectionRegistry::new();
        let mut gone = registry.register("alice");
        let mut stays = registry.register("alice");

        registry.unregister("alice", gone.id);
        registry.broadcast("alice", heartbeat(2));

        assert!(gone.try_recv().is_err());
        assert_eq!(stays.try_recv().unwrap(), heartbeat(2));
    }

    #[test]
    fn test_double_and_unknown_unregister() {
        let registry = ConnectionRegistry::new();
        let handle = registry.register("alice");
        let other = registry.register("alice");

        assert!(registry.unregister("alice", handle.id));
        assert!(!registry.unregister("alice", handle.id));
        assert!(!registry.unregister("carol", ConnectionId::new()));
        assert!(registry.contains("alice", other.id));
    }

    #[test]
    fn test_full_buffer_drops_frame_not_connection() {
        let registry = ConnectionRegistry::with_buffer_size(2);
        let mut slow = registry.register("alice");

        for i in 0..5 {
            registry.broadcast("alice", heartbeat(i));
        }

        assert!(registry.contains("alice", slow.id));
        assert_eq!(slow.try_recv().unwrap(), heartbeat(0));
        assert_eq!(slow.try_recv().unwrap(), heartbeat(1));
        assert!(slow.try_recv().is_err());

        let outcome = registry.broadcast("alice", heartbeat(9));
        assert_eq!(outcome.delivered, 1);
    }

    #[test]
    fn test_closed_receiver_is_pruned() {
        let registry = ConnectionRegistry::new();
        let handle = registry.register("alice");
        drop(handle);

        let outcome = registry.broadcast("alice", heartbeat(1));
        assert_eq!(outcome.closed, 1);
        assert_eq!(registry.subject_count(), 0);
    }

    #[test]
    fn test_touch_and_connections() {
        let registry = ConnectionRegistry::new();
        let handle = registry.register("alice");

        assert!(registry.touch("alice", handle.id));
        assert!(!registry.touch("alice", ConnectionId::new()));

        let infos = registry.connections("alice");
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].connection_id, handle.id);
        assert!(infos[0].last_seen_at >= infos[0].opened_at);
        assert!(registry.connections("bob").is_empty());
    }
}
