//! Durable event log and replay.
//!
//! Every event observed for a subject is written once under
//! `events/{subject}/{digest}.json`. When a client reconnects it supplies a
//! watermark, and the [`ReplayEngine`] returns everything newer than it in
//! temporal order so the client can catch up before live delivery resumes.

mod replay;
mod retry;
mod store;

pub use replay::{ReplayEngine, Watermark};
pub use retry::RetryPolicy;
pub use store::{DurableEventStore, EVENTS_ROOT};
