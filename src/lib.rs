//! # Herald
//!
//! Per-subject event streams with durable replay and webhook-driven cache
//! invalidation.
//!
//! ## Core Concepts
//!
//! - **Events**: Immutable per-subject records persisted to an object store
//! - **Streams**: Long-lived SSE connections that replay what a client missed
//! - **Invalidation**: Storage webhooks evict cached reads and notify clients
//! - **Registry**: In-memory fan-out of frames to every open connection
//!
//! ## Example
//!
//! ```ignore
//! use herald::{MemoryObjectStore, Relay, RelayConfig};
//!
//! let relay = Relay::start(Arc::new(MemoryObjectStore::new()), RelayConfig::default());
//!
//! // Reconnect with a watermark and receive the backlog first
//! let mut frames = relay.open_stream("alice", Some("1700000000000"));
//! while let Some(frame) = frames.recv().await {
//!     println!("{}", frame.to_json());
//! }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod http;
pub mod objects;
pub mod registry;
pub mod relay;
pub mod session;
pub mod types;
pub mod webhook;

// Re-exports
pub use cache::{Cache, CacheStats, FillTicket};
pub use config::RelayConfig;
pub use error::{RelayError, Result};
pub use events::{DurableEventStore, ReplayEngine, RetryPolicy, Watermark};
pub use objects::{FsObjectStore, MemoryObjectStore, ObjectMeta, ObjectStore};
pub use registry::{BroadcastOutcome, ConnectionHandle, ConnectionInfo, ConnectionRegistry, Frame};
pub use relay::{HealthReport, PublishOutcome, Relay};
pub use session::{CloseReason, SessionSettings, SessionState, SessionSummary, StreamSession};
pub use types::*;
pub use webhook::{
    InvalidationReport, MutationNotice, StorageKey, WebhookInvalidator, WebhookPayload,
    WebhookQueue,
};
