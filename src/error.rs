//! Error types for siderite
//!
//! Structural failures abort an operation and surface as [`StorageError`].
//! Per-row write conflicts are data, not errors: they are collected into the
//! bulk-write result as [`WriteConflict`] values and never abort the bulk.

use std::io;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::document::DocumentData;

/// Main error type for storage operations
#[derive(Error, Debug)]
pub enum StorageError {
    /// `bulk_write` was called with zero rows
    #[error("write batch must not be empty")]
    EmptyWriteBatch,

    /// Operation attempted on a closed instance
    #[error("storage instance is closed: {0}")]
    Closed(String),

    /// Document is structurally invalid (missing or mistyped fields)
    #[error("invalid document: {0}")]
    InvalidDocument(String),

    /// Revision string does not match the `height-hash` shape
    #[error("invalid revision: {0}")]
    InvalidRevision(String),

    /// Attachment data was supplied or requested
    #[error("attachments are not supported by this storage")]
    AttachmentsUnsupported,

    /// Categorizer fell through without producing a change
    #[error("invariant violated, this should not happen: {0}")]
    ShouldNotHappen(String),

    /// Failure reported by the key-value substrate
    #[error("substrate error: {0}")]
    Substrate(String),

    /// Underlying I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result type alias for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

/// A per-row revision conflict (HTTP-style status 409)
///
/// Reported in the `error` map of a bulk-write result, keyed by document id.
/// Carries the document currently stored so the caller can rebase and retry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WriteConflict {
    /// Id of the conflicting document
    pub document_id: String,
    /// Always 409
    pub status: u16,
    /// The document currently stored under this id
    pub document_in_db: DocumentData,
}

impl WriteConflict {
    /// Create a conflict for the given id and stored document
    pub fn new(document_id: impl Into<String>, document_in_db: DocumentData) -> Self {
        Self {
            document_id: document_id.into(),
            status: 409,
            document_in_db,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_status() {
        let conflict = WriteConflict::new("doc1", DocumentData::new());
        assert_eq!(conflict.status, 409);
        assert_eq!(conflict.document_id, "doc1");
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            StorageError::EmptyWriteBatch.to_string(),
            "write batch must not be empty"
        );
        assert!(StorageError::Closed("db/users".into())
            .to_string()
            .contains("db/users"));
    }
}
