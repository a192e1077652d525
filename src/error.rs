//! Error types for the relay.

use thiserror::Error;

/// Main error type for relay operations.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    #[error("Transient storage failure: {0}")]
    Transient(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Invalid object format: {0}")]
    InvalidFormat(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("Object store is locked by another process")]
    Locked,

    #[error("Malformed storage key {key:?}: {reason}")]
    MalformedKey { key: String, reason: String },

    #[error("Unknown mutation kind: {0}")]
    UnknownMutation(String),

    #[error("Invalid watermark: {0}")]
    InvalidWatermark(String),

    #[error("Transport closed")]
    TransportClosed,

    #[error("Background task failed: {0}")]
    Task(String),
}

impl RelayError {
    /// Whether a retry has a reasonable chance of succeeding.
    pub fn is_transient(&self) -> bool {
        match self {
            RelayError::Transient(_) => true,
            RelayError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(e: serde_json::Error) -> Self {
        if e.is_data() || e.is_syntax() || e.is_eof() {
            RelayError::Deserialization(e.to_string())
        } else {
            RelayError::Serialization(e.to_string())
        }
    }
}

impl From<tokio::task::JoinError> for RelayError {
    fn from(e: tokio::task::JoinError) -> Self {
        RelayError::Task(e.to_string())
    }
}

/// Result type for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(RelayError::Transient("throttled".into()).is_transient());
        assert!(RelayError::Io(std::io::Error::from(std::io::ErrorKind::TimedOut)).is_transient());
        assert!(!RelayError::Io(std::io::Error::from(std::io::ErrorKind::NotFound)).is_transient());
        assert!(!RelayError::Corruption("bad".into()).is_transient());
        assert!(!RelayError::ChecksumMismatch { expected: 1, got: 2 }.is_transient());
    }

    #[test]
    fn test_json_errors_map_to_deserialization() {
        let err: RelayError = serde_json::from_str::<serde_json::Value>("{not json")
            .unwrap_err()
            .into();
        assert!(matches!(err, RelayError::Deserialization(_)));
    }
}
