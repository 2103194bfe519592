//! Write categorization
//!
//! The pure heart of the bulk write engine: given the current state of a
//! collection and a batch of write rows, decide per row whether it is an
//! insert, an update, a deletion or a conflict, and derive the table
//! mutations and change events the transaction must apply. No I/O happens
//! here; the engine feeds state in and executes the plan that comes out.
//!
//! Two rule sets exist. Client writes ([`categorize_bulk_write`]) enforce
//! optimistic concurrency: a row must present the currently stored revision
//! as its `previous` or it conflicts. Remote-revision writes
//! ([`categorize_revision_writes`]) instead apply whichever revision orders
//! higher and silently drop the losers.

use std::collections::HashMap;

use crate::document::{
    is_deleted, normalize_engine_fields, primary_key_of, revision_of, set_last_write_at,
    set_revision, strip_engine_fields, DocumentData,
};
use crate::error::{Result, StorageError, WriteConflict};
use crate::event::{ChangeEvent, ChangeOperation};
use crate::revision::{first_revision, next_revision, parse_revision};

/// One client write request: the new document state, plus the revision the
/// caller believes is currently stored (absent for fresh inserts)
#[derive(Clone, Debug)]
pub struct WriteRow {
    /// Desired new state of the document
    pub document: DocumentData,
    /// The stored state this write is based on, if any
    pub previous: Option<DocumentData>,
}

impl WriteRow {
    /// A write without an assumed previous state
    pub fn insert(document: DocumentData) -> Self {
        Self {
            document,
            previous: None,
        }
    }

    /// A write on top of a known stored state
    pub fn update(document: DocumentData, previous: DocumentData) -> Self {
        Self {
            document,
            previous: Some(previous),
        }
    }
}

/// The mutation plan derived from one write batch
#[derive(Debug, Default)]
pub struct CategorizedBulk {
    /// Documents to upsert into the live table
    pub put_live: Vec<DocumentData>,
    /// Ids to drop from the live table
    pub remove_live: Vec<String>,
    /// Documents to upsert into the deleted table
    pub put_deleted: Vec<DocumentData>,
    /// Ids to drop from the deleted table
    pub remove_deleted: Vec<String>,
    /// Ids of accepted writes, in input order; one changes row each
    pub change_ids: Vec<String>,
    /// Change events in input order
    pub events: Vec<ChangeEvent>,
    /// Per-id conflicts; these rows were rejected, the bulk continues
    pub errors: HashMap<String, WriteConflict>,
    /// Accepted documents keyed by id, engine-private fields stripped
    pub success: HashMap<String, DocumentData>,
}

/// Categorize a batch of client writes against the current state
///
/// `current` maps id to the stored document (from live or deleted);
/// `start_time` is stamped as `$lastWriteAt` and `event.start_time`.
pub fn categorize_bulk_write(
    primary_path: &str,
    current: &HashMap<String, DocumentData>,
    rows: Vec<WriteRow>,
    start_time: u64,
) -> Result<CategorizedBulk> {
    let mut bulk = CategorizedBulk::default();

    for row in rows {
        let id = primary_key_of(&row.document, primary_path)?;
        let new_deleted = is_deleted(&row.document);

        let Some(existing) = current.get(&id) else {
            // Fresh id: height-1 revision, no conflict possible.
            let mut doc = row.document;
            normalize_engine_fields(&mut doc, new_deleted)?;
            let rev = first_revision(&doc);
            set_revision(&mut doc, &rev);
            set_last_write_at(&mut doc, start_time);

            let stripped = strip_engine_fields(doc.clone());
            if new_deleted {
                // Insert of an already-deleted document (replication writes
                // tombstones for ids we never saw). Accepted, but invisible
                // to event consumers.
                bulk.put_deleted.push(doc);
            } else {
                bulk.put_live.push(doc);
                bulk.events.push(ChangeEvent::new(
                    id.clone(),
                    ChangeOperation::Insert,
                    None,
                    Some(stripped.clone()),
                    start_time,
                ));
            }
            bulk.change_ids.push(id.clone());
            bulk.success.insert(id, stripped);
            continue;
        };

        let existing_deleted = is_deleted(existing);
        let existing_rev = revision_of(existing).ok_or_else(|| {
            StorageError::InvalidDocument(format!("stored document '{id}' has no revision"))
        })?;

        let previous = match row.previous {
            Some(prev) => {
                if revision_of(&prev) == Some(existing_rev) {
                    prev
                } else {
                    bulk.errors
                        .insert(id.clone(), WriteConflict::new(id, existing.clone()));
                    continue;
                }
            }
            // A missing previous against a tombstone is the resurrect path:
            // the caller intends a fresh insert over a deleted id.
            None if existing_deleted => existing.clone(),
            None => {
                bulk.errors
                    .insert(id.clone(), WriteConflict::new(id, existing.clone()));
                continue;
            }
        };

        let previous_deleted = is_deleted(&previous);
        let mut doc = row.document;
        normalize_engine_fields(&mut doc, new_deleted)?;
        let new_rev = next_revision(existing_rev, &doc)?;
        set_revision(&mut doc, &new_rev);
        set_last_write_at(&mut doc, start_time);
        let stripped = strip_engine_fields(doc.clone());

        if previous_deleted && !new_deleted {
            bulk.put_live.push(doc);
            bulk.remove_deleted.push(id.clone());
            bulk.events.push(ChangeEvent::new(
                id.clone(),
                ChangeOperation::Insert,
                None,
                Some(stripped.clone()),
                start_time,
            ));
        } else if !previous_deleted && !new_deleted {
            bulk.put_live.push(doc);
            bulk.events.push(ChangeEvent::new(
                id.clone(),
                ChangeOperation::Update,
                Some(strip_engine_fields(previous)),
                Some(stripped.clone()),
                start_time,
            ));
        } else if !previous_deleted && new_deleted {
            bulk.put_deleted.push(doc);
            bulk.remove_live.push(id.clone());
            // Replication consumers resolve deletions by revision, so the
            // event's previous carries the tombstone revision, not the one
            // the caller based the write on.
            let mut rewritten = previous;
            set_revision(&mut rewritten, &new_rev);
            bulk.events.push(ChangeEvent::new(
                id.clone(),
                ChangeOperation::Delete,
                Some(strip_engine_fields(rewritten)),
                None,
                start_time,
            ));
        } else {
            return Err(StorageError::ShouldNotHappen(format!(
                "write of '{id}' produced no insert, update or delete"
            )));
        }

        bulk.change_ids.push(id.clone());
        bulk.success.insert(id, stripped);
    }

    Ok(bulk)
}

/// Categorize remote-revision writes against the current state
///
/// Incoming documents carry their own `_rev`. A document is applied iff its
/// revision strictly dominates the stored one by (height, hash) ordering;
/// losers are dropped without error. Tombstone payloads landing on stored
/// tombstones are updated in place with no event and no changes row.
pub fn categorize_revision_writes(
    primary_path: &str,
    current: &HashMap<String, DocumentData>,
    docs: Vec<DocumentData>,
    start_time: u64,
) -> Result<CategorizedBulk> {
    let mut bulk = CategorizedBulk::default();

    for incoming in docs {
        let id = primary_key_of(&incoming, primary_path)?;
        let incoming_rev = revision_of(&incoming)
            .ok_or_else(|| {
                StorageError::InvalidDocument(format!(
                    "revision write for '{id}' carries no revision"
                ))
            })?
            .to_string();
        parse_revision(&incoming_rev)?;
        let new_deleted = is_deleted(&incoming);

        let mut doc = incoming;
        normalize_engine_fields(&mut doc, new_deleted)?;
        set_last_write_at(&mut doc, start_time);
        let stripped = strip_engine_fields(doc.clone());

        let Some(existing) = current.get(&id) else {
            if new_deleted {
                bulk.put_deleted.push(doc);
            } else {
                bulk.put_live.push(doc);
            }
            bulk.events.push(ChangeEvent::new(
                id.clone(),
                ChangeOperation::Insert,
                None,
                Some(stripped.clone()),
                start_time,
            ));
            bulk.change_ids.push(id.clone());
            bulk.success.insert(id, stripped);
            continue;
        };

        let existing_rev = revision_of(existing).ok_or_else(|| {
            StorageError::InvalidDocument(format!("stored document '{id}' has no revision"))
        })?;
        if !parse_revision(&incoming_rev)?.dominates(&parse_revision(existing_rev)?) {
            continue;
        }

        let existing_deleted = is_deleted(existing);
        match (existing_deleted, new_deleted) {
            (false, false) => {
                bulk.put_live.push(doc);
                bulk.events.push(ChangeEvent::new(
                    id.clone(),
                    ChangeOperation::Update,
                    Some(strip_engine_fields(existing.clone())),
                    Some(stripped.clone()),
                    start_time,
                ));
            }
            (false, true) => {
                bulk.put_deleted.push(doc);
                bulk.remove_live.push(id.clone());
                let mut rewritten = existing.clone();
                set_revision(&mut rewritten, &incoming_rev);
                bulk.events.push(ChangeEvent::new(
                    id.clone(),
                    ChangeOperation::Delete,
                    Some(strip_engine_fields(rewritten)),
                    None,
                    start_time,
                ));
            }
            (true, false) => {
                bulk.put_live.push(doc);
                bulk.remove_deleted.push(id.clone());
                bulk.events.push(ChangeEvent::new(
                    id.clone(),
                    ChangeOperation::Insert,
                    None,
                    Some(stripped.clone()),
                    start_time,
                ));
            }
            (true, true) => {
                // Tombstone payload over tombstone: keep the newer revision
                // but stay silent, nothing observable changed.
                bulk.put_deleted.push(doc);
                bulk.success.insert(id, stripped);
                continue;
            }
        }

        bulk.change_ids.push(id.clone());
        bulk.success.insert(id, stripped);
    }

    Ok(bulk)
}
