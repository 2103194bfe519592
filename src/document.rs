//! Document representation and engine-field helpers
//!
//! Documents are schemaless JSON objects. The engine reserves a handful of
//! fields: `_rev` (revision string), `_deleted` (tombstone flag),
//! `_attachments` (always empty here) and `$lastWriteAt`, an engine-private
//! write timestamp that doubles as the secondary index for cleanup and is
//! stripped from everything handed back to callers.

use serde_json::Value;

use crate::error::{Result, StorageError};

/// A document body: a JSON object keyed by field name
pub type DocumentData = serde_json::Map<String, Value>;

/// Field holding the revision string
pub const REV_FIELD: &str = "_rev";
/// Field holding the tombstone flag
pub const DELETED_FIELD: &str = "_deleted";
/// Field holding attachment metadata (always empty)
pub const ATTACHMENTS_FIELD: &str = "_attachments";
/// Field holding caller-side metadata, excluded from revision hashing
pub const META_FIELD: &str = "_meta";
/// Engine-private write timestamp in epoch milliseconds
pub const LAST_WRITE_FIELD: &str = "$lastWriteAt";

/// Current wall-clock time in epoch milliseconds
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Look up a (possibly nested) field by dot-separated path
pub fn get_field<'a>(doc: &'a DocumentData, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = doc.get(parts.next()?)?;
    for part in parts {
        match current {
            Value::Object(map) => current = map.get(part)?,
            Value::Array(arr) => {
                let index: usize = part.parse().ok()?;
                current = arr.get(index)?;
            }
            _ => return None,
        }
    }
    Some(current)
}

/// Extract the primary key value at `path` as a string
pub fn primary_key_of(doc: &DocumentData, path: &str) -> Result<String> {
    match get_field(doc, path) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(StorageError::InvalidDocument(format!(
            "primary key at '{path}' must be a string, got {other}"
        ))),
        None => Err(StorageError::InvalidDocument(format!(
            "document is missing its primary key at '{path}'"
        ))),
    }
}

/// Tombstone flag of a document; a missing `_deleted` field reads as false
pub fn is_deleted(doc: &DocumentData) -> bool {
    matches!(doc.get(DELETED_FIELD), Some(Value::Bool(true)))
}

/// Revision string of a document, if present
pub fn revision_of(doc: &DocumentData) -> Option<&str> {
    doc.get(REV_FIELD).and_then(Value::as_str)
}

/// Overwrite the revision field
pub fn set_revision(doc: &mut DocumentData, rev: &str) {
    doc.insert(REV_FIELD.to_string(), Value::String(rev.to_string()));
}

/// Stamp the engine-private write timestamp
pub fn set_last_write_at(doc: &mut DocumentData, at_ms: u64) {
    doc.insert(LAST_WRITE_FIELD.to_string(), Value::from(at_ms));
}

/// Engine-private write timestamp, if stamped
pub fn last_write_at(doc: &DocumentData) -> Option<u64> {
    doc.get(LAST_WRITE_FIELD).and_then(Value::as_u64)
}

/// Normalize the engine fields of an accepted document: explicit `_deleted`,
/// an (empty) `_attachments` map. Rejects non-empty attachment metadata.
pub fn normalize_engine_fields(doc: &mut DocumentData, deleted: bool) -> Result<()> {
    if let Some(Value::Object(attachments)) = doc.get(ATTACHMENTS_FIELD) {
        if !attachments.is_empty() {
            return Err(StorageError::AttachmentsUnsupported);
        }
    }
    doc.insert(DELETED_FIELD.to_string(), Value::Bool(deleted));
    doc.insert(
        ATTACHMENTS_FIELD.to_string(),
        Value::Object(DocumentData::new()),
    );
    Ok(())
}

/// Remove engine-private fields before a document leaves the engine
pub fn strip_engine_fields(mut doc: DocumentData) -> DocumentData {
    doc.remove(LAST_WRITE_FIELD);
    doc
}
