//! Change events and event bulks
//!
//! Every committed write transaction yields one [`EventBulk`]: an ordered
//! set of [`ChangeEvent`]s carrying INSERT/UPDATE/DELETE semantics that a
//! downstream replicator can replay to converge another replica.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::document::DocumentData;

/// Kind of change applied to a document
///
/// Serializes as `INSERT`/`UPDATE`/`DELETE`, the casing replicators consume.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeOperation {
    /// Document became visible in the live table
    Insert,
    /// Live document was replaced by a newer revision
    Update,
    /// Live document was tombstoned
    Delete,
}

impl ChangeOperation {
    /// Operation name as replicators spell it
    pub fn name(&self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }
}

/// A single document change
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Id of the changed document
    pub document_id: String,
    /// What happened
    pub operation: ChangeOperation,
    /// State before the change; `None` for inserts
    pub previous: Option<DocumentData>,
    /// State after the change; `None` for deletes
    pub document: Option<DocumentData>,
    /// When the owning write began, epoch ms
    pub start_time: u64,
    /// When the owning write finished, epoch ms; stamped at publication
    pub end_time: u64,
}

impl ChangeEvent {
    /// Create an event; `end_time` is stamped once the transaction commits
    pub fn new(
        document_id: impl Into<String>,
        operation: ChangeOperation,
        previous: Option<DocumentData>,
        document: Option<DocumentData>,
        start_time: u64,
    ) -> Self {
        Self {
            document_id: document_id.into(),
            operation,
            previous,
            document,
            start_time,
            end_time: 0,
        }
    }
}

/// The events of one committed write transaction
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventBulk {
    /// Random token identifying the bulk; replicators deduplicate on it
    pub id: String,
    /// Events in write-row input order
    pub events: Vec<ChangeEvent>,
}

impl EventBulk {
    /// Wrap events into a bulk with a fresh dedup token
    pub fn new(events: Vec<ChangeEvent>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            events,
        }
    }

    /// Number of events in the bulk
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether the bulk carries no events
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
