//! Revision codec
//!
//! Revisions are strings shaped `"<height>-<hash>"`: a positive integer
//! height and a content-derived hash token. Heights grow by one per accepted
//! update; the hash is a truncated SHA-256 over the document body with
//! fields sorted, excluding `_rev`, `_meta` and engine-private fields.
//! Only stability matters here, not collision resistance.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use sha2::{Digest, Sha256};

use crate::document::{DocumentData, LAST_WRITE_FIELD, META_FIELD, REV_FIELD};
use crate::error::{Result, StorageError};

/// Hex characters kept from the content hash
const HASH_LEN: usize = 16;

/// A parsed revision: monotonic height plus content hash
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Revision {
    /// Causal chain height, starts at 1
    pub height: u64,
    /// Content-derived hash token
    pub hash: String,
}

impl Revision {
    /// Create a revision from its parts
    pub fn new(height: u64, hash: impl Into<String>) -> Self {
        Self {
            height,
            hash: hash.into(),
        }
    }

    /// Ordering used by the remote-revision write path: strictly by height,
    /// ties broken by lexicographic hash. Equal revisions are equal.
    pub fn dominates(&self, other: &Revision) -> bool {
        self.cmp(other) == Ordering::Greater
    }
}

impl FromStr for Revision {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self> {
        let (height, hash) = s
            .split_once('-')
            .ok_or_else(|| StorageError::InvalidRevision(s.to_string()))?;
        let height: u64 = height
            .parse()
            .map_err(|_| StorageError::InvalidRevision(s.to_string()))?;
        if height == 0 || hash.is_empty() {
            return Err(StorageError::InvalidRevision(s.to_string()));
        }
        Ok(Self {
            height,
            hash: hash.to_string(),
        })
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.height, self.hash)
    }
}

/// Parse a revision string
pub fn parse_revision(rev: &str) -> Result<Revision> {
    rev.parse()
}

/// Height component of a revision string
pub fn height_of_revision(rev: &str) -> Result<u64> {
    Ok(parse_revision(rev)?.height)
}

/// Stable content hash of a document body
///
/// `serde_json::Map` keeps its keys sorted, so serializing the body minus
/// the excluded fields yields a canonical field-sorted encoding.
pub fn create_revision_hash(doc: &DocumentData) -> String {
    let mut body = doc.clone();
    body.remove(REV_FIELD);
    body.remove(META_FIELD);
    body.remove(LAST_WRITE_FIELD);

    let encoded = serde_json::to_string(&body).unwrap_or_default();
    let digest = Sha256::digest(encoded.as_bytes());
    let mut hex = String::with_capacity(HASH_LEN);
    for byte in digest.iter().take(HASH_LEN / 2) {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}

/// Revision for a document entering storage for the first time
pub fn first_revision(doc: &DocumentData) -> String {
    Revision::new(1, create_revision_hash(doc)).to_string()
}

/// Revision for an accepted update over `existing_rev`
pub fn next_revision(existing_rev: &str, doc: &DocumentData) -> Result<String> {
    let height = height_of_revision(existing_rev)?;
    Ok(Revision::new(height + 1, create_revision_hash(doc)).to_string())
}
