//! Live connection tracking and fan-out.
//!
//! Each streaming connection owns a bounded frame buffer registered here
//! under its subject. Storage mutations and direct publishes are fanned out
//! to every buffer of the affected subject; the session task drains its
//! buffer onto the client transport.
//!
//! # Example
//!
//! ```ignore
//! let registry = ConnectionRegistry::new();
//! let mut handle = registry.register("alice");
//!
//! registry.broadcast("alice", Frame::Heartbeat { timestamp: Timestamp::now() });
//! let frame = handle.recv().await;
//!
//! registry.unregister("alice", handle.id);
//! ```

mod manager;
mod types;

pub use manager::ConnectionRegistry;
pub use types::{BroadcastOutcome, ConnectionHandle, ConnectionInfo, Frame};
