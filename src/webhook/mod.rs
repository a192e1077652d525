//! Webhook-driven cache invalidation.
//!
//! The storage backend posts a notification for every object it writes or
//! removes. Each notification is parsed against the key schema, the matching
//! cache prefix is evicted, connections of the owning subject receive an
//! `update` frame, and the change is appended to the subject's event log so
//! a disconnected client sees it on replay.

mod invalidator;
mod key;
mod notice;
mod queue;

pub use invalidator::{InvalidationReport, WebhookInvalidator};
pub use key::{StorageKey, KEY_SCHEMA_VERSION};
pub use notice::{parse_storage_event, MutationNotice, WebhookPayload};
pub use queue::WebhookQueue;
