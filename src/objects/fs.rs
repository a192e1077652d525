//! Filesystem object store.
//!
//! Each key is one file under `<root>/objects/`, with `/` in the key mapping
//! to directories. Files carry a small header and a CRC32 trailer so a torn
//! or bit-rotted object surfaces as an error instead of bad JSON:
//!
//! ```text
//! [magic "HRO\0"][version u8][len u64 LE][content][crc32 u32 LE]
//! ```

use super::{ObjectMeta, ObjectStore};
use crate::error::{RelayError, Result};
use crate::types::Timestamp;
use async_trait::async_trait;
use fs2::FileExt;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use uuid::Uuid;

/// Magic bytes for object files.
const OBJECT_MAGIC: &[u8; 4] = b"HRO\0";

/// Current object format version.
const OBJECT_VERSION: u8 = 1;

/// Prefix for in-flight writes; never listed.
const TMP_PREFIX: &str = ".tmp-";

struct FsInner {
    objects_dir: PathBuf,
    /// Held for the lifetime of the store.
    _lock_file: File,
}

/// Object store rooted at a local directory.
#[derive(Clone)]
pub struct FsObjectStore {
    inner: Arc<FsInner>,
}

impl FsObjectStore {
    /// Open (creating if needed) a store at `root`.
    ///
    /// Takes an exclusive lock on the directory; a second process opening the
    /// same root gets `RelayError::Locked`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let objects_dir = root.join("objects");
        fs::create_dir_all(&objects_dir)?;

        let lock_file = File::create(root.join("LOCK"))?;
        lock_file
            .try_lock_exclusive()
            .map_err(|_| RelayError::Locked)?;

        Ok(Self {
            inner: Arc::new(FsInner {
                objects_dir,
                _lock_file: lock_file,
            }),
        })
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&FsInner) -> Result<T> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || f(&inner)).await?
    }
}

impl FsInner {
    fn object_path(&self, key: &str) -> Result<PathBuf> {
        let mut path = self.objects_dir.clone();
        for segment in key.split('/') {
            if segment.is_empty()
                || segment == "."
                || segment == ".."
                || segment.starts_with(TMP_PREFIX)
                || segment.contains('\\')
            {
                return Err(RelayError::MalformedKey {
                    key: key.to_string(),
                    reason: format!("unusable path segment {segment:?}"),
                });
            }
            path.push(segment);
        }
        Ok(path)
    }

    fn write(&self, key: &str, content: &[u8]) -> Result<()> {
        let path = self.object_path(key)?;
        let dir = path
            .parent()
            .ok_or_else(|| RelayError::InvalidFormat(format!("key has no parent: {key}")))?;
        fs::create_dir_all(dir)?;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        // Unique per write: concurrent puts of one key must not share a temp file.
        let tmp_path = dir.join(format!("{TMP_PREFIX}{file_name}.{}", Uuid::new_v4()));

        let written = Self::write_object_file(&tmp_path, content)
            .and_then(|()| fs::rename(&tmp_path, &path).map_err(RelayError::from));
        if written.is_err() {
            let _ = fs::remove_file(&tmp_path);
        }
        written
    }

    fn write_object_file(tmp_path: &Path, content: &[u8]) -> Result<()> {
        let mut file = File::create(tmp_path)?;

        file.write_all(OBJECT_MAGIC)?;
        file.write_all(&[OBJECT_VERSION])?;

        let content_len = content.len() as u64;
        file.write_all(&content_len.to_le_bytes())?;
        file.write_all(content)?;

        let checksum = crc32fast::hash(content);
        file.write_all(&checksum.to_le_bytes())?;

        file.sync_all()?;
        Ok(())
    }

    fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.object_path(key)?;
        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != OBJECT_MAGIC {
            return Err(RelayError::InvalidFormat(format!("invalid object magic: {key}")));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != OBJECT_VERSION {
            return Err(RelayError::InvalidFormat(format!(
                "unsupported object version {} for {key}",
                version[0]
            )));
        }

        let mut len_bytes = [0u8; 8];
        file.read_exact(&mut len_bytes)?;
        let content_len = u64::from_le_bytes(len_bytes);
        let file_len = file.metadata()?.len();
        // Header (13) + content + trailer (4)
        if content_len.saturating_add(17) != file_len {
            return Err(RelayError::Corruption(format!(
                "object {key} declares {content_len} bytes but file is {file_len}"
            )));
        }

        let mut content = vec![0u8; content_len as usize];
        file.read_exact(&mut content)?;

        let mut checksum_bytes = [0u8; 4];
        file.read_exact(&mut checksum_bytes)?;
        let stored = u32::from_le_bytes(checksum_bytes);
        let computed = crc32fast::hash(&content);
        if stored != computed {
            return Err(RelayError::ChecksumMismatch {
                expected: stored,
                got: computed,
            });
        }

        Ok(Some(content))
    }

    fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        // Start the walk at the deepest directory the prefix fully names.
        let dir_part = match prefix.rfind('/') {
            Some(idx) => &prefix[..idx],
            None => "",
        };
        let mut start = self.objects_dir.clone();
        for segment in dir_part.split('/').filter(|s| !s.is_empty()) {
            start.push(segment);
        }

        let mut found = Vec::new();
        if start.is_dir() {
            self.walk(&start, prefix, &mut found)?;
        }
        found.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(found)
    }

    fn walk(&self, dir: &Path, prefix: &str, out: &mut Vec<ObjectMeta>) -> Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name();
            if name.to_string_lossy().starts_with(TMP_PREFIX) {
                continue;
            }

            let path = entry.path();
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                self.walk(&path, prefix, out)?;
                continue;
            }

            let Some(key) = self.key_for(&path) else {
                continue;
            };
            if !key.starts_with(prefix) {
                continue;
            }

            let metadata = entry.metadata()?;
            let last_modified = metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| Timestamp(d.as_millis() as i64))
                .unwrap_or_default();

            out.push(ObjectMeta {
                key,
                last_modified,
                size: metadata.len().saturating_sub(17),
            });
        }
        Ok(())
    }

    fn key_for(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.objects_dir).ok()?;
        let segments: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(segments.join("/"))
    }

    fn remove(&self, key: &str) -> Result<bool> {
        let path = self.object_path(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, key: &str, blob: Vec<u8>) -> Result<()> {
        let key = key.to_string();
        self.blocking(move |inner| inner.write(&key, &blob)).await
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let key = key.to_string();
        self.blocking(move |inner| inner.read(&key)).await
    }

    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        let prefix = prefix.to_string();
        self.blocking(move |inner| inner.list(&prefix)).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let key = key.to_string();
        self.blocking(move |inner| inner.remove(&key)).await
    }
}
