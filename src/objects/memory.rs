//! In-process object store.

use super::{ObjectMeta, ObjectStore};
use crate::error::{RelayError, Result};
use crate::types::Timestamp;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Clone)]
struct StoredObject {
    blob: Vec<u8>,
    last_modified: Timestamp,
}

/// Object store backed by an ordered in-memory map.
///
/// Failures can be injected to exercise retry and partial-failure paths:
/// the next N `get`/`list_by_prefix`/`put` calls fail with a transient error.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: RwLock<BTreeMap<String, StoredObject>>,
    failing_gets: AtomicUsize,
    failing_lists: AtomicUsize,
    failing_puts: AtomicUsize,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` reads with a transient error.
    pub fn fail_next_gets(&self, n: usize) {
        self.failing_gets.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` listings with a transient error.
    pub fn fail_next_lists(&self, n: usize) {
        self.failing_lists.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` writes with a transient error.
    pub fn fail_next_puts(&self, n: usize) {
        self.failing_puts.store(n, Ordering::SeqCst);
    }

    /// Overwrite a stored blob with raw bytes, bypassing any encoding.
    pub fn insert_raw(&self, key: &str, blob: Vec<u8>) {
        self.objects.write().insert(
            key.to_string(),
            StoredObject {
                blob,
                last_modified: Timestamp::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, blob: Vec<u8>) -> Result<()> {
        if Self::take_failure(&self.failing_puts) {
            return Err(RelayError::Transient(format!("injected put failure for {key}")));
        }
        self.insert_raw(key, blob);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        if Self::take_failure(&self.failing_gets) {
            return Err(RelayError::Transient(format!("injected get failure for {key}")));
        }
        Ok(self.objects.read().get(key).map(|o| o.blob.clone()))
    }

    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        if Self::take_failure(&self.failing_lists) {
            return Err(RelayError::Transient(format!("injected list failure for {prefix}")));
        }
        let objects = self.objects.read();
        Ok(objects
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, object)| ObjectMeta {
                key: key.clone(),
                last_modified: object.last_modified,
                size: object.blob.len() as u64,
            })
            .collect())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.objects.write().remove(key).is_some())
    }
}
