//! Collection schema and primary-key discovery
//!
//! The engine only reads one thing out of a schema: where the primary key
//! lives. A primary key is either a plain field path or a compound
//! descriptor whose composed value is stored under a top-level key field.

use serde::{Deserialize, Serialize};

/// Primary-key descriptor of a collection schema
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrimaryKey {
    /// The primary key is the value at this field path
    Simple(String),
    /// Compound key: the values at `fields`, joined by `separator`, are
    /// stored under the top-level field `key`
    Composite {
        /// Top-level field holding the composed key value
        key: String,
        /// Source field paths, in composition order
        fields: Vec<String>,
        /// Separator between composed values
        separator: String,
    },
}

impl PrimaryKey {
    /// The field path at which a document carries its id
    pub fn field_path(&self) -> &str {
        match self {
            Self::Simple(path) => path,
            Self::Composite { key, .. } => key,
        }
    }
}

/// Schema of a collection, as far as the storage engine cares
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSchema {
    /// Schema version
    pub version: u32,
    /// Primary-key descriptor
    pub primary_key: PrimaryKey,
}

impl CollectionSchema {
    /// Create a schema with a simple primary key
    pub fn with_primary_key(version: u32, path: impl Into<String>) -> Self {
        Self {
            version,
            primary_key: PrimaryKey::Simple(path.into()),
        }
    }
}

/// Names the (database, collection) pair a storage instance binds to
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceSettings {
    /// Database name
    pub database_name: String,
    /// Collection name
    pub collection_name: String,
    /// Collection schema
    pub schema: CollectionSchema,
}

impl InstanceSettings {
    /// Create settings for a named collection
    pub fn new(
        database_name: impl Into<String>,
        collection_name: impl Into<String>,
        schema: CollectionSchema,
    ) -> Self {
        Self {
            database_name: database_name.into(),
            collection_name: collection_name.into(),
            schema,
        }
    }
}
