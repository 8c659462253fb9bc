// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the blob replicator.
//!
//! Errors are categorized by their source (remote transport, upstream log
//! retention, local state) and include context to help with debugging.
//!
//! # Error Categories
//!
//! | Error Type | Retryable | Description |
//! |------------|-----------|-------------|
//! | `Transport` | Yes | Network errors, timeouts, 5xx/429 responses |
//! | `BlobMissing` | Yes | Blob 404 on remote (read-after-write lag) |
//! | `BucketExpired` | No | Bucket garbage-collected upstream (watermark reset) |
//! | `NeedsSnapshot` | No | Incremental history insufficient, snapshot required |
//! | `NamespaceUnknown` | No | Remote namespace missing (retried next pass) |
//! | `Config` | No | Configuration invalid |
//! | `Store` | No | Local blob store failure (needs operator attention) |
//! | `InvalidState` | No | Replicator state machine violation |
//! | `Shutdown` | No | Replicator is shutting down |
//! | `Internal` | No | Unexpected internal error |
//!
//! # Retry Behavior
//!
//! Use [`ReplicationError::is_retryable()`] to decide whether an operation
//! should be retried. `BlobMissing` is retryable with a short delay because
//! the remote store may lag its own replication log; `BucketExpired` is not
//! an error to retry, it is a signal to reset the watermark.

use crate::log::SnapshotInfo;
use thiserror::Error;

/// Result type alias for replication operations.
pub type Result<T> = std::result::Result<T, ReplicationError>;

/// Errors that can occur during blob replication.
///
/// Each variant includes context about where the error occurred.
/// Use [`is_retryable()`](Self::is_retryable) to check if the operation
/// should be retried.
#[derive(Error, Debug)]
pub enum ReplicationError {
    /// HTTP transport failure talking to the remote store or log.
    ///
    /// Covers connection errors, timeouts, 429s and 5xx responses.
    /// Retryable within the per-call retry budget.
    #[error("Transport error ({operation}): {message}")]
    Transport {
        operation: String,
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    /// The requested time bucket has been garbage-collected upstream.
    ///
    /// Recovery: reset the watermark to the backfill horizon and persist it.
    /// This is an accepted consistency gap, logged as a warning.
    #[error("Time bucket expired upstream: {bucket}")]
    BucketExpired { bucket: String },

    /// Incremental history is insufficient; a full snapshot is required.
    ///
    /// Carries the snapshot pointer advertised by the remote. Snapshot
    /// ingestion is an extension point; the error is surfaced to the caller
    /// rather than handled inside the pass.
    #[error("Snapshot required for namespace {}: blob {}", snapshot.namespace, snapshot.blob_id)]
    NeedsSnapshot { snapshot: SnapshotInfo },

    /// The namespace does not exist on the remote.
    ///
    /// Fatal for the current pass; retried on the next scheduled trigger.
    #[error("Namespace unknown on remote: {namespace}")]
    NamespaceUnknown { namespace: String },

    /// A blob referenced by a mutation event is missing on the remote.
    ///
    /// Retryable with a short delay (the remote may still be converging).
    /// After the retry budget is exhausted, only the single event is skipped.
    #[error("Blob not found on remote: {blob_id}")]
    BlobMissing { blob_id: String },

    /// Invalid or missing configuration.
    ///
    /// Not retryable - fix the configuration and restart.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Local blob store failure.
    ///
    /// Not retryable - indicates local storage issues that need attention.
    #[error("Blob store error: {0}")]
    Store(String),

    /// Replicator state machine violation.
    ///
    /// Occurs when an operation is attempted in the wrong state
    /// (e.g., triggering a pass on a stopped replicator).
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// Shutdown in progress.
    ///
    /// Returned when cancellation is observed mid-operation.
    #[error("Shutdown in progress")]
    Shutdown,

    /// Unexpected internal error.
    ///
    /// Catch-all for errors that shouldn't happen.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ReplicationError {
    /// Create a transport error from a reqwest::Error.
    pub fn transport(operation: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Transport {
            operation: operation.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Create a transport error without source.
    pub fn transport_msg(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            operation: operation.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::BlobMissing { .. } => true, // Remote read-after-write lag
            Self::BucketExpired { .. } => false, // Handled by watermark reset
            Self::NeedsSnapshot { .. } => false,
            Self::NamespaceUnknown { .. } => false,
            Self::Config(_) => false,
            Self::Store(_) => false,
            Self::InvalidState { .. } => false,
            Self::Shutdown => false,
            Self::Internal(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_is_retryable_transport() {
        let err = ReplicationError::transport_msg("list_events", "connection reset");
        assert!(err.is_retryable());
        assert!(err.to_string().contains("list_events"));
    }

    #[test]
    fn test_is_retryable_blob_missing() {
        let err = ReplicationError::BlobMissing {
            blob_id: "abc123".to_string(),
        };
        assert!(err.is_retryable());
        assert!(err.to_string().contains("abc123"));
    }

    #[test]
    fn test_not_retryable_bucket_expired() {
        let err = ReplicationError::BucketExpired {
            bucket: "2026-08-01-10-05".to_string(),
        };
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("2026-08-01-10-05"));
    }

    #[test]
    fn test_not_retryable_needs_snapshot() {
        let err = ReplicationError::NeedsSnapshot {
            snapshot: SnapshotInfo {
                blob_id: "snap-1".to_string(),
                namespace: "ns".to_string(),
                timestamp: Utc::now(),
            },
        };
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("snap-1"));
    }

    #[test]
    fn test_not_retryable_namespace_unknown() {
        let err = ReplicationError::NamespaceUnknown {
            namespace: "missing-ns".to_string(),
        };
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("missing-ns"));
    }

    #[test]
    fn test_not_retryable_config() {
        let err = ReplicationError::Config("empty replicator name".to_string());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_not_retryable_invalid_state() {
        let err = ReplicationError::InvalidState {
            expected: "Idle".to_string(),
            actual: "Stopped".to_string(),
        };
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("Idle"));
        assert!(err.to_string().contains("Stopped"));
    }

    #[test]
    fn test_not_retryable_shutdown() {
        let err = ReplicationError::Shutdown;
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_not_retryable_internal() {
        let err = ReplicationError::Internal("unexpected".to_string());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_transport_error_formatting() {
        let err = ReplicationError::Transport {
            operation: "fetch_blob".to_string(),
            message: "timeout".to_string(),
            source: None,
        };
        let msg = err.to_string();
        assert!(msg.contains("Transport error"));
        assert!(msg.contains("fetch_blob"));
        assert!(msg.contains("timeout"));
    }
}
