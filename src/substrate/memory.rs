//! In-memory substrate
//!
//! `BTreeMap` tables behind a `parking_lot` lock. Write transactions are
//! serialized by a `tokio` mutex whose guard lives inside the transaction;
//! staged mutations apply under a single write lock at commit, so readers
//! observe whole bulks or nothing. Reads outside a transaction snapshot the
//! committed state per call.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::{Mutex, MutexGuard};

use crate::document::{primary_key_of, DocumentData};
use crate::error::Result;

use super::{ChangeLogEntry, DocTable, Substrate, WriteTransaction};

#[derive(Default)]
struct TableState {
    live: BTreeMap<String, DocumentData>,
    deleted: BTreeMap<String, DocumentData>,
    changes: BTreeMap<u64, String>,
    next_sequence: u64,
}

impl TableState {
    fn table(&self, table: DocTable) -> &BTreeMap<String, DocumentData> {
        match table {
            DocTable::Live => &self.live,
            DocTable::Deleted => &self.deleted,
        }
    }

    fn table_mut(&mut self, table: DocTable) -> &mut BTreeMap<String, DocumentData> {
        match table {
            DocTable::Live => &mut self.live,
            DocTable::Deleted => &mut self.deleted,
        }
    }
}

enum StagedOp {
    Put(DocTable, Vec<DocumentData>),
    Delete(DocTable, Vec<String>),
    AppendChanges(Vec<String>),
}

/// In-process substrate holding one collection's three tables
///
/// The tables are keyed by the value at `primary_path`, mirroring a store
/// whose tables are opened with a declared key path.
pub struct MemorySubstrate {
    primary_path: String,
    write_gate: Mutex<()>,
    state: RwLock<TableState>,
}

impl MemorySubstrate {
    /// Create empty tables keyed by `primary_path`
    pub fn new(primary_path: impl Into<String>) -> Self {
        Self {
            primary_path: primary_path.into(),
            write_gate: Mutex::new(()),
            state: RwLock::new(TableState {
                next_sequence: 1,
                ..TableState::default()
            }),
        }
    }

    /// Number of documents currently in a table
    pub fn len(&self, table: DocTable) -> usize {
        self.state.read().table(table).len()
    }

    /// Whether a table is empty
    pub fn is_empty(&self, table: DocTable) -> bool {
        self.len(table) == 0
    }
}

#[async_trait]
impl Substrate for MemorySubstrate {
    async fn begin_write(&self) -> Result<Box<dyn WriteTransaction + '_>> {
        let gate = self.write_gate.lock().await;
        Ok(Box::new(MemoryTransaction {
            _gate: gate,
            substrate: self,
            staged: parking_lot::Mutex::new(Vec::new()),
        }))
    }

    async fn bulk_get(&self, table: DocTable, ids: &[String]) -> Result<Vec<Option<DocumentData>>> {
        let state = self.state.read();
        let rows = state.table(table);
        Ok(ids.iter().map(|id| rows.get(id).cloned()).collect())
    }

    async fn scan(&self, table: DocTable) -> Result<Vec<DocumentData>> {
        let state = self.state.read();
        Ok(state.table(table).values().cloned().collect())
    }

    async fn changes_range(
        &self,
        above: Option<u64>,
        below: Option<u64>,
        reverse: bool,
        limit: Option<usize>,
    ) -> Result<Vec<ChangeLogEntry>> {
        let state = self.state.read();
        let lower = above.map(|seq| seq.saturating_add(1)).unwrap_or(u64::MIN);
        let upper = below.unwrap_or(u64::MAX);
        if lower >= upper {
            return Ok(Vec::new());
        }
        let range = state
            .changes
            .range(lower..upper)
            .map(|(sequence, document_id)| ChangeLogEntry {
                sequence: *sequence,
                document_id: document_id.clone(),
            });

        let limit = limit.unwrap_or(usize::MAX);
        let entries: Vec<ChangeLogEntry> = if reverse {
            range.rev().take(limit).collect()
        } else {
            range.take(limit).collect()
        };
        Ok(entries)
    }

    async fn clear(&self, table: DocTable) -> Result<()> {
        self.state.write().table_mut(table).clear();
        Ok(())
    }

    async fn clear_changes(&self) -> Result<()> {
        self.state.write().changes.clear();
        Ok(())
    }
}

struct MemoryTransaction<'a> {
    _gate: MutexGuard<'a, ()>,
    substrate: &'a MemorySubstrate,
    staged: parking_lot::Mutex<Vec<StagedOp>>,
}

#[async_trait]
impl WriteTransaction for MemoryTransaction<'_> {
    async fn bulk_get(
        &self,
        table: DocTable,
        ids: &[String],
    ) -> Result<Vec<Option<DocumentData>>> {
        let state = self.substrate.state.read();
        let rows = state.table(table);
        Ok(ids.iter().map(|id| rows.get(id).cloned()).collect())
    }

    async fn bulk_put(&self, table: DocTable, docs: Vec<DocumentData>) -> Result<()> {
        self.staged.lock().push(StagedOp::Put(table, docs));
        Ok(())
    }

    async fn bulk_delete(&self, table: DocTable, ids: Vec<String>) -> Result<()> {
        self.staged.lock().push(StagedOp::Delete(table, ids));
        Ok(())
    }

    async fn append_changes(&self, ids: Vec<String>) -> Result<()> {
        self.staged.lock().push(StagedOp::AppendChanges(ids));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let staged = self.staged.into_inner();
        let mut state = self.substrate.state.write();
        for op in staged {
            match op {
                StagedOp::Put(table, docs) => {
                    for doc in docs {
                        let id = primary_key_of(&doc, &self.substrate.primary_path)?;
                        state.table_mut(table).insert(id, doc);
                    }
                }
                StagedOp::Delete(table, ids) => {
                    for id in ids {
                        state.table_mut(table).remove(&id);
                    }
                }
                StagedOp::AppendChanges(ids) => {
                    for id in ids {
                        let sequence = state.next_sequence;
                        state.next_sequence += 1;
                        state.changes.insert(sequence, id);
                    }
                }
            }
        }
        Ok(())
    }
}
