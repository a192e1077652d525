//! Inbound storage mutation notifications.

use crate::error::{RelayError, Result};
use crate::types::MutationKind;
use serde::{Deserialize, Serialize};

/// Webhook body as posted by the storage backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookPayload {
    /// Backend event name, e.g. `ObjectCreated:Put`.
    pub event: String,
    pub key: String,
}

/// A mutation the invalidator can act on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MutationNotice {
    pub kind: MutationKind,
    pub key: String,
}

impl MutationNotice {
    pub fn new(kind: MutationKind, key: impl Into<String>) -> Self {
        Self {
            kind,
            key: key.into(),
        }
    }
}

impl TryFrom<WebhookPayload> for MutationNotice {
    type Error = RelayError;

    fn try_from(payload: WebhookPayload) -> Result<Self> {
        Ok(Self {
            kind: parse_storage_event(&payload.event)?,
            key: payload.key,
        })
    }
}

/// Map a backend event name onto a mutation kind.
pub fn parse_storage_event(event: &str) -> Result<MutationKind> {
    match event {
        "ObjectCreated:Put" => Ok(MutationKind::Updated),
        "ObjectCreated:Post" | "ObjectCreated:Copy" | "ObjectCreated:CompleteMultipartUpload" => {
            Ok(MutationKind::Created)
        }
        e if e.starts_with("ObjectRemoved:") => Ok(MutationKind::Deleted),
        other => Err(RelayError::UnknownMutation(other.to_string())),
    }
}
