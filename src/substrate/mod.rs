//! Storage substrate seam
//!
//! The physical key-value store is an external collaborator. Per collection
//! it exposes three tables (live documents, deleted documents, and the
//! append-only changes log) plus a read-write transaction primitive that
//! serializes concurrent writers. The engine talks to it exclusively through
//! the object-safe traits in this module.
//!
//! [`memory::MemorySubstrate`] is the bundled in-process implementation.

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::document::DocumentData;
use crate::error::Result;

pub use memory::MemorySubstrate;

/// The two document tables of a collection
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DocTable {
    /// Documents with `_deleted = false`
    Live,
    /// Tombstones, kept so deletions replicate
    Deleted,
}

impl DocTable {
    /// Table name for logs and errors
    pub fn name(&self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Deleted => "deleted",
        }
    }
}

/// One row of the append-only changes log
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeLogEntry {
    /// Auto-assigned, gap-free, strictly increasing in commit order
    pub sequence: u64,
    /// Id of the changed document; repeats across entries
    pub document_id: String,
}

/// A collection's slice of the key-value substrate
#[async_trait]
pub trait Substrate: Send + Sync {
    /// Begin a read-write transaction over the three tables
    ///
    /// The substrate serializes write transactions; a second call waits for
    /// the first transaction to commit or drop.
    async fn begin_write(&self) -> Result<Box<dyn WriteTransaction + '_>>;

    /// Fetch documents by id, preserving input order; misses yield `None`
    async fn bulk_get(&self, table: DocTable, ids: &[String]) -> Result<Vec<Option<DocumentData>>>;

    /// All documents of a table, in primary-key order
    async fn scan(&self, table: DocTable) -> Result<Vec<DocumentData>>;

    /// Range over the changes log by sequence
    ///
    /// `above`/`below` bound the range exclusively; `reverse` flips the
    /// traversal to descending; `limit` caps the row count.
    async fn changes_range(
        &self,
        above: Option<u64>,
        below: Option<u64>,
        reverse: bool,
        limit: Option<usize>,
    ) -> Result<Vec<ChangeLogEntry>>;

    /// Drop every row of a document table
    async fn clear(&self, table: DocTable) -> Result<()>;

    /// Drop the changes log (the sequence counter keeps counting)
    async fn clear_changes(&self) -> Result<()>;
}

/// A read-write transaction over a collection's three tables
///
/// Mutations are staged and become visible atomically at [`commit`].
/// Staging takes `&self` and must be internally synchronized: the engine
/// fans the table mutations and the changes append out concurrently and
/// joins them before committing. Operations against distinct tables never
/// overlap on an id, so staging order across calls carries no meaning.
/// Dropping an uncommitted transaction aborts it.
///
/// [`commit`]: WriteTransaction::commit
#[async_trait]
pub trait WriteTransaction: Send + Sync {
    /// Fetch documents by id within the transaction, preserving input order
    async fn bulk_get(&self, table: DocTable, ids: &[String])
        -> Result<Vec<Option<DocumentData>>>;

    /// Stage upserts into a document table
    async fn bulk_put(&self, table: DocTable, docs: Vec<DocumentData>) -> Result<()>;

    /// Stage deletions from a document table
    async fn bulk_delete(&self, table: DocTable, ids: Vec<String>) -> Result<()>;

    /// Stage changes-log rows, one per id; sequences are assigned at commit
    async fn append_changes(&self, ids: Vec<String>) -> Result<()>;

    /// Atomically apply everything staged
    async fn commit(self: Box<Self>) -> Result<()>;
}
