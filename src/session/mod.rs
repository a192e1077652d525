//! Per-connection streaming state machine.
//!
//! ```text
//! Connecting -> Streaming -> (Replaying) -> Live -> Closed
//! ```
//!
//! A session registers with the [`ConnectionRegistry`](crate::registry::ConnectionRegistry)
//! before it replays anything, so frames broadcast while the backlog is
//! being read queue up in its buffer and reach the client strictly after the
//! replayed events.

mod stream;

pub use stream::{CloseReason, SessionSettings, SessionState, SessionSummary, StreamSession};
