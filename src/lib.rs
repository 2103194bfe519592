#![forbid(unsafe_code)]
#![warn(missing_docs)]
//! # siderite
//!
//! Client-side document storage engine: a revision-tracked, conflict-aware
//! document model over an indexed key-value substrate, publishing a change
//! feed suitable for replication.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    StorageInstance                       │
//! │  bulk_write · bulk_add_revisions · query · change_stream │
//! ├───────────────────────────┬──────────────────────────────┤
//! │     write categorizer     │     change-feed publisher    │
//! │  (pure: rows → mutations) │   (broadcast of EventBulk)   │
//! ├───────────────────────────┴──────────────────────────────┤
//! │                     Substrate seam                       │
//! │     live table   ·   deleted table   ·   changes log     │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Every id lives in at most one of the live/deleted tables, matching its
//! `_deleted` flag. Client writes must present the currently stored
//! revision or they conflict (status 409); remote-revision writes apply
//! whichever revision orders higher. Every committed bulk appends to a
//! gap-free change sequence and is published on the change stream.
//!
//! # Example
//!
//! ```rust,ignore
//! use siderite::{CollectionSchema, InstanceSettings, StorageInstance, WriteRow};
//! use serde_json::json;
//!
//! let store = StorageInstance::open_in_memory(InstanceSettings::new(
//!     "app",
//!     "tasks",
//!     CollectionSchema::with_primary_key(1, "id"),
//! ));
//!
//! let mut feed = store.change_stream()?;
//! let result = store
//!     .bulk_write(vec![WriteRow::insert(
//!         json!({ "id": "t1", "title": "ship it" }).as_object().unwrap().clone(),
//!     )])
//!     .await?;
//! assert!(result.error.is_empty());
//! let bulk = feed.recv().await?;
//! ```

pub mod categorize;
pub mod document;
pub mod error;
pub mod event;
pub mod instance;
pub mod query;
pub mod revision;
pub mod schema;
pub mod stream;
pub mod substrate;

pub use categorize::{CategorizedBulk, WriteRow};
pub use document::DocumentData;
pub use error::{Result, StorageError, WriteConflict};
pub use event::{ChangeEvent, ChangeOperation, EventBulk};
pub use instance::{
    BulkWriteResult, ChangeDirection, ChangedDocumentsRequest, ChangedDocumentsResult,
    StorageInstance,
};
pub use query::{PreparedQuery, QueryResult};
pub use revision::Revision;
pub use schema::{CollectionSchema, InstanceSettings, PrimaryKey};
pub use substrate::{ChangeLogEntry, DocTable, MemorySubstrate, Substrate, WriteTransaction};
