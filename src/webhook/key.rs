//! Storage key schema for webhook notifications.
//!
//! Version 1 keys have exactly four `/`-separated, non-empty segments:
//!
//! ```text
//! module/platform/subject/file
//! ready_post/instagram/alice/post_1.json
//! ```
//!
//! The first three segments form the cache prefix; the third is the subject
//! whose connections are told about the change.

use crate::error::{RelayError, Result};
use crate::events::EVENTS_ROOT;
use crate::types::EventType;
use std::fmt;

/// Schema version understood by [`StorageKey::parse`].
pub const KEY_SCHEMA_VERSION: u8 = 1;

const SEGMENTS: usize = 4;

/// A storage key parsed against the v1 schema.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StorageKey {
    raw: String,
    module: String,
    platform: String,
    subject: String,
    file: String,
}

impl StorageKey {
    pub fn parse(key: &str) -> Result<Self> {
        let malformed = |reason: String| RelayError::MalformedKey {
            key: key.to_string(),
            reason,
        };

        let segments: Vec<&str> = key.split('/').collect();
        if segments.len() != SEGMENTS {
            return Err(malformed(format!(
                "expected {SEGMENTS} segments, found {}",
                segments.len()
            )));
        }
        if let Some(pos) = segments.iter().position(|s| s.trim().is_empty()) {
            return Err(malformed(format!("segment {pos} is empty")));
        }
        if segments[0] == EVENTS_ROOT {
            return Err(malformed("event records are not cacheable resources".into()));
        }

        Ok(Self {
            raw: key.to_string(),
            module: segments[0].to_string(),
            platform: segments[1].to_string(),
            subject: segments[2].to_string(),
            file: segments[3].to_string(),
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn platform(&self) -> &str {
        &self.platform
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn file(&self) -> &str {
        &self.file
    }

    /// `module/platform/subject`
    pub fn cache_prefix(&self) -> String {
        format!("{}/{}/{}", self.module, self.platform, self.subject)
    }

    /// Event type a client sees for a change under this key.
    pub fn event_type(&self) -> EventType {
        let module = self.module.to_ascii_lowercase();
        if module.contains("message") {
            EventType::Message
        } else if module.contains("comment") {
            EventType::Comment
        } else {
            EventType::Update
        }
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
