//! Key-value object storage the relay persists events into.
//!
//! The relay only needs four operations from its backing store: put a blob
//! under a key, get it back, list keys under a prefix, and delete. Two
//! backends are provided:
//! - [`MemoryObjectStore`]: in-process, with fault injection for tests
//! - [`FsObjectStore`]: one checksummed file per key under a root directory
//!
//! Backends are assumed eventually consistent: a key that was just written
//! may be missing from an immediately following listing.

mod fs;
mod memory;

pub use fs::FsObjectStore;
pub use memory::MemoryObjectStore;

use crate::error::Result;
use crate::types::Timestamp;
use async_trait::async_trait;

/// Listing entry for one stored object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectMeta {
    pub key: String,
    pub last_modified: Timestamp,
    pub size: u64,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `blob` under `key`, replacing any previous value.
    async fn put(&self, key: &str, blob: Vec<u8>) -> Result<()>;

    /// Fetch the blob stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// List every object whose key starts with `prefix`, in key order.
    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<ObjectMeta>>;

    /// Remove `key`. Returns false if it was not present.
    async fn delete(&self, key: &str) -> Result<bool>;
}
