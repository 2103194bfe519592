//! Storage instance façade
//!
//! A [`StorageInstance`] binds a named (database, collection) pair to a
//! substrate and a change-feed publisher, and exposes the public operations:
//! bulk writes, remote-revision application, id lookups, queries, the
//! changes log, cleanup and lifecycle.
//!
//! The write path is a read-modify-write transaction: read the current
//! state of every touched id, categorize the batch against it, fan the
//! table mutations and changes-log rows out concurrently and join them,
//! commit, then publish the event bulk on the change stream. A publish
//! gate spans commit and publication, so bulks reach subscribers in
//! transaction-commit order even when a substrate commit suspends.
//! Conflicting rows are reported in the result without aborting the bulk.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info};

use crate::categorize::{
    categorize_bulk_write, categorize_revision_writes, CategorizedBulk, WriteRow,
};
use crate::document::{
    last_write_at, now_ms, primary_key_of, strip_engine_fields, DocumentData,
};
use crate::error::{Result, StorageError, WriteConflict};
use crate::event::EventBulk;
use crate::query::{PreparedQuery, QueryResult};
use crate::schema::InstanceSettings;
use crate::stream::ChangePublisher;
use crate::substrate::{ChangeLogEntry, DocTable, MemorySubstrate, Substrate, WriteTransaction};

/// Outcome of a bulk write, keyed by document id
#[derive(Debug, Default)]
pub struct BulkWriteResult {
    /// Accepted documents as stored, engine-private fields stripped
    pub success: HashMap<String, DocumentData>,
    /// Rejected rows; conflicts never abort the rest of the bulk
    pub error: HashMap<String, WriteConflict>,
}

/// Traversal direction through the changes log
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeDirection {
    /// Sequences greater than the cursor, ascending
    After,
    /// Sequences smaller than the cursor, descending
    Before,
}

/// A resumable read of the changes log
#[derive(Clone, Debug)]
pub struct ChangedDocumentsRequest {
    /// Cursor sequence; excluded from the result
    pub since_sequence: u64,
    /// Which side of the cursor to read
    pub direction: ChangeDirection,
    /// Maximum entries to return
    pub limit: Option<usize>,
}

/// Changes-log rows plus the cursor for the next read
#[derive(Clone, Debug)]
pub struct ChangedDocumentsResult {
    /// Log entries in traversal order
    pub changed_documents: Vec<ChangeLogEntry>,
    /// Sequence of the last entry in traversal direction, or the request
    /// cursor when the result is empty
    pub last_sequence: u64,
}

/// A per-collection storage instance
pub struct StorageInstance {
    settings: InstanceSettings,
    primary_path: String,
    substrate: Arc<dyn Substrate>,
    publisher: ChangePublisher,
    /// Held across commit and publication so bulks reach the stream in
    /// transaction-commit order even when a substrate commit suspends.
    publish_gate: Mutex<()>,
    closed: AtomicBool,
}

impl StorageInstance {
    /// Open an instance over an existing substrate
    pub fn open(settings: InstanceSettings, substrate: Arc<dyn Substrate>) -> Self {
        let primary_path = settings.schema.primary_key.field_path().to_string();
        let label = format!("{}/{}", settings.database_name, settings.collection_name);
        info!(
            database = %settings.database_name,
            collection = %settings.collection_name,
            "opening storage instance"
        );
        Self {
            primary_path,
            substrate,
            publisher: ChangePublisher::new(label),
            publish_gate: Mutex::new(()),
            settings,
            closed: AtomicBool::new(false),
        }
    }

    /// Open an instance backed by fresh in-memory tables
    pub fn open_in_memory(settings: InstanceSettings) -> Self {
        let substrate = Arc::new(MemorySubstrate::new(
            settings.schema.primary_key.field_path(),
        ));
        Self::open(settings, substrate)
    }

    /// Database name this instance belongs to
    pub fn database_name(&self) -> &str {
        &self.settings.database_name
    }

    /// Collection name this instance serves
    pub fn collection_name(&self) -> &str {
        &self.settings.collection_name
    }

    /// Settings the instance was opened with
    pub fn settings(&self) -> &InstanceSettings {
        &self.settings
    }

    /// Whether [`close`](Self::close) has completed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(StorageError::Closed(format!(
                "{}/{}",
                self.settings.database_name, self.settings.collection_name
            )));
        }
        Ok(())
    }

    /// Write a batch of client rows atomically
    ///
    /// Returns accepted documents and per-row conflicts. The whole batch
    /// commits in one substrate transaction; the resulting event bulk is
    /// published after commit, events in row input order.
    pub async fn bulk_write(&self, rows: Vec<WriteRow>) -> Result<BulkWriteResult> {
        self.ensure_open()?;
        if rows.is_empty() {
            return Err(StorageError::EmptyWriteBatch);
        }

        let mut ids = Vec::with_capacity(rows.len());
        for row in &rows {
            ids.push(primary_key_of(&row.document, &self.primary_path)?);
        }

        let txn = self.substrate.begin_write().await?;
        let current = read_current(txn.as_ref(), &ids).await?;
        let start_time = now_ms();
        let mut bulk = categorize_bulk_write(&self.primary_path, &current, rows, start_time)?;

        let change_ids = std::mem::take(&mut bulk.change_ids);
        stage_bulk(txn.as_ref(), &mut bulk, change_ids).await?;

        let ordering = self.publish_gate.lock().await;
        txn.commit().await?;
        debug!(
            collection = %self.settings.collection_name,
            accepted = bulk.success.len(),
            conflicts = bulk.errors.len(),
            "bulk write committed"
        );
        self.publish_events(&mut bulk);
        drop(ordering);

        Ok(BulkWriteResult {
            success: bulk.success,
            error: bulk.errors,
        })
    }

    /// Apply remote revisions
    ///
    /// Documents carry their own `_rev`; a revision is applied iff it
    /// strictly dominates the stored one, losers are dropped silently and
    /// no conflicts are ever reported.
    pub async fn bulk_add_revisions(&self, docs: Vec<DocumentData>) -> Result<()> {
        self.ensure_open()?;
        if docs.is_empty() {
            return Ok(());
        }

        let mut ids = Vec::with_capacity(docs.len());
        for doc in &docs {
            ids.push(primary_key_of(doc, &self.primary_path)?);
        }

        let txn = self.substrate.begin_write().await?;
        let current = read_current(txn.as_ref(), &ids).await?;
        let start_time = now_ms();
        let mut bulk = categorize_revision_writes(&self.primary_path, &current, docs, start_time)?;

        // The changes append follows the events here: tombstone-over-tombstone
        // no-ops leave no trace in the log.
        let change_ids = if bulk.events.is_empty() {
            Vec::new()
        } else {
            std::mem::take(&mut bulk.change_ids)
        };
        stage_bulk(txn.as_ref(), &mut bulk, change_ids).await?;

        let ordering = self.publish_gate.lock().await;
        txn.commit().await?;
        debug!(
            collection = %self.settings.collection_name,
            applied = bulk.success.len(),
            events = bulk.events.len(),
            "revision bulk committed"
        );
        self.publish_events(&mut bulk);
        drop(ordering);
        Ok(())
    }

    fn publish_events(&self, bulk: &mut CategorizedBulk) {
        let mut events = std::mem::take(&mut bulk.events);
        if events.is_empty() {
            return;
        }
        let end_time = now_ms();
        for event in &mut events {
            event.end_time = end_time;
        }
        self.publisher.publish(EventBulk::new(events));
    }

    /// Fetch documents by id
    ///
    /// Looks in the live table, and additionally in the deleted table when
    /// `with_deleted` is set. Missing ids are absent from the result.
    pub async fn find_documents_by_id(
        &self,
        ids: &[String],
        with_deleted: bool,
    ) -> Result<HashMap<String, DocumentData>> {
        self.ensure_open()?;

        let in_live = self.substrate.bulk_get(DocTable::Live, ids).await?;
        let mut found = HashMap::with_capacity(ids.len());
        let mut missing = Vec::new();
        for (id, doc) in ids.iter().zip(in_live) {
            match doc {
                Some(doc) => {
                    found.insert(id.clone(), strip_engine_fields(doc));
                }
                None => missing.push(id.clone()),
            }
        }

        if with_deleted && !missing.is_empty() {
            let in_deleted = self.substrate.bulk_get(DocTable::Deleted, &missing).await?;
            for (id, doc) in missing.into_iter().zip(in_deleted) {
                if let Some(doc) = doc {
                    found.insert(id, strip_engine_fields(doc));
                }
            }
        }

        Ok(found)
    }

    /// Run a prepared query over the live table
    ///
    /// Full scan through the opaque matcher, sorted by the opaque
    /// comparator, then skip/limit. Correct, not fast.
    pub async fn query(&self, prepared: &PreparedQuery) -> Result<QueryResult> {
        self.ensure_open()?;
        let scanned = self.substrate.scan(DocTable::Live).await?;
        let documents = prepared
            .execute(scanned)
            .into_iter()
            .map(strip_engine_fields)
            .collect();
        Ok(QueryResult { documents })
    }

    /// Count live documents matching a prepared query, skipping the sort
    pub async fn count(&self, prepared: &PreparedQuery) -> Result<usize> {
        self.ensure_open()?;
        let scanned = self.substrate.scan(DocTable::Live).await?;
        Ok(scanned.iter().filter(|doc| (prepared.matcher)(doc)).count())
    }

    /// Read the changes log from a cursor
    pub async fn get_changed_documents(
        &self,
        request: &ChangedDocumentsRequest,
    ) -> Result<ChangedDocumentsResult> {
        self.ensure_open()?;
        let changed_documents = match request.direction {
            ChangeDirection::After => {
                self.substrate
                    .changes_range(Some(request.since_sequence), None, false, request.limit)
                    .await?
            }
            ChangeDirection::Before => {
                self.substrate
                    .changes_range(None, Some(request.since_sequence), true, request.limit)
                    .await?
            }
        };
        let last_sequence = changed_documents
            .last()
            .map(|entry| entry.sequence)
            .unwrap_or(request.since_sequence);
        Ok(ChangedDocumentsResult {
            changed_documents,
            last_sequence,
        })
    }

    /// Subscribe to event bulks published from now on
    pub fn change_stream(&self) -> Result<broadcast::Receiver<EventBulk>> {
        self.ensure_open()?;
        self.publisher.subscribe()
    }

    /// Purge tombstones older than `min_deleted_age_ms`
    ///
    /// Driven by an external cleanup policy; emits no events and leaves the
    /// changes log untouched. Returns `true` once no eligible tombstones
    /// remain.
    pub async fn cleanup(&self, min_deleted_age_ms: u64) -> Result<bool> {
        self.ensure_open()?;
        let cutoff = now_ms().saturating_sub(min_deleted_age_ms);
        let tombstones = self.substrate.scan(DocTable::Deleted).await?;
        let mut purge = Vec::new();
        for doc in &tombstones {
            if last_write_at(doc).map_or(true, |at| at <= cutoff) {
                purge.push(primary_key_of(doc, &self.primary_path)?);
            }
        }
        if purge.is_empty() {
            return Ok(true);
        }

        let purged = purge.len();
        let txn = self.substrate.begin_write().await?;
        txn.bulk_delete(DocTable::Deleted, purge).await?;
        txn.commit().await?;
        debug!(
            collection = %self.settings.collection_name,
            purged,
            "tombstone cleanup pass"
        );
        Ok(true)
    }

    /// Delete the collection's data and close the instance
    ///
    /// Clears the live table and the changes log; the deleted table is
    /// dropped by the substrate when the collection goes away.
    pub async fn remove(&self) -> Result<()> {
        self.ensure_open()?;
        self.substrate.clear(DocTable::Live).await?;
        self.substrate.clear_changes().await?;
        info!(
            database = %self.settings.database_name,
            collection = %self.settings.collection_name,
            "storage instance removed"
        );
        self.close();
        Ok(())
    }

    /// Close the instance and complete the change stream. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.publisher.close();
        info!(
            database = %self.settings.database_name,
            collection = %self.settings.collection_name,
            "storage instance closed"
        );
    }

    /// Attachments are not supported by this storage
    pub async fn get_attachment_data(
        &self,
        _document_id: &str,
        _attachment_name: &str,
    ) -> Result<Vec<u8>> {
        Err(StorageError::AttachmentsUnsupported)
    }
}

/// Read the stored state of every id, live table first, tombstones second
async fn read_current(
    txn: &(dyn WriteTransaction + '_),
    ids: &[String],
) -> Result<HashMap<String, DocumentData>> {
    let in_live = txn.bulk_get(DocTable::Live, ids).await?;
    let mut current = HashMap::with_capacity(ids.len());
    let mut missing = Vec::new();
    for (id, doc) in ids.iter().zip(in_live) {
        match doc {
            Some(doc) => {
                current.insert(id.clone(), doc);
            }
            None => missing.push(id.clone()),
        }
    }
    if !missing.is_empty() {
        let in_deleted = txn.bulk_get(DocTable::Deleted, &missing).await?;
        for (id, doc) in missing.into_iter().zip(in_deleted) {
            if let Some(doc) = doc {
                current.insert(id, doc);
            }
        }
    }
    Ok(current)
}

/// Fan the four table mutations and the changes append out concurrently,
/// joined before the caller commits
async fn stage_bulk(
    txn: &(dyn WriteTransaction + '_),
    bulk: &mut CategorizedBulk,
    change_ids: Vec<String>,
) -> Result<()> {
    let put_live = std::mem::take(&mut bulk.put_live);
    let remove_live = std::mem::take(&mut bulk.remove_live);
    let put_deleted = std::mem::take(&mut bulk.put_deleted);
    let remove_deleted = std::mem::take(&mut bulk.remove_deleted);
    tokio::try_join!(
        stage_put(txn, DocTable::Live, put_live),
        stage_delete(txn, DocTable::Live, remove_live),
        stage_put(txn, DocTable::Deleted, put_deleted),
        stage_delete(txn, DocTable::Deleted, remove_deleted),
        stage_changes(txn, change_ids),
    )?;
    Ok(())
}

async fn stage_put(
    txn: &(dyn WriteTransaction + '_),
    table: DocTable,
    docs: Vec<DocumentData>,
) -> Result<()> {
    if docs.is_empty() {
        return Ok(());
    }
    txn.bulk_put(table, docs).await
}

async fn stage_delete(
    txn: &(dyn WriteTransaction + '_),
    table: DocTable,
    ids: Vec<String>,
) -> Result<()> {
    if ids.is_empty() {
        return Ok(());
    }
    txn.bulk_delete(table, ids).await
}

async fn stage_changes(txn: &(dyn WriteTransaction + '_), ids: Vec<String>) -> Result<()> {
    if ids.is_empty() {
        return Ok(());
    }
    txn.append_changes(ids).await
}
