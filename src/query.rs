//! Prepared queries
//!
//! The query planner lives outside this crate. A prepared query arrives as
//! an opaque matcher/comparator pair plus paging; execution is a full scan
//! of the live table. Correctness is the contract here, not performance.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::document::DocumentData;

/// Predicate deciding whether a document matches the query
pub type QueryMatcher = Arc<dyn Fn(&DocumentData) -> bool + Send + Sync>;

/// Total order over matching documents
pub type QueryComparator = Arc<dyn Fn(&DocumentData, &DocumentData) -> Ordering + Send + Sync>;

/// A planned query: opaque matcher, opaque sort order, paging
#[derive(Clone)]
pub struct PreparedQuery {
    /// Match predicate
    pub matcher: QueryMatcher,
    /// Sort order
    pub comparator: QueryComparator,
    /// Documents to drop from the front of the sorted result
    pub skip: usize,
    /// Maximum documents to return
    pub limit: Option<usize>,
}

impl PreparedQuery {
    /// Build a query from matcher and comparator, no paging
    pub fn new(matcher: QueryMatcher, comparator: QueryComparator) -> Self {
        Self {
            matcher,
            comparator,
            skip: 0,
            limit: None,
        }
    }

    /// Set the skip offset
    pub fn with_skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    /// Set the result limit
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Filter, sort and page a scanned table
    pub(crate) fn execute(&self, docs: Vec<DocumentData>) -> Vec<DocumentData> {
        let mut matched: Vec<DocumentData> =
            docs.into_iter().filter(|doc| (self.matcher)(doc)).collect();
        matched.sort_by(|a, b| (self.comparator)(a, b));

        matched
            .into_iter()
            .skip(self.skip)
            .take(self.limit.unwrap_or(usize::MAX))
            .collect()
    }
}

/// Documents produced by a query, in comparator order
#[derive(Clone, Debug)]
pub struct QueryResult {
    /// Matching documents after skip/limit, engine-private fields stripped
    pub documents: Vec<DocumentData>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: serde_json::Value) -> DocumentData {
        value.as_object().unwrap().clone()
    }

    fn by_field(field: &'static str) -> QueryComparator {
        Arc::new(move |a, b| {
            let left = a.get(field).and_then(|v| v.as_i64()).unwrap_or(0);
            let right = b.get(field).and_then(|v| v.as_i64()).unwrap_or(0);
            left.cmp(&right)
        })
    }

    #[test]
    fn test_execute_filters_sorts_and_pages() {
        let query = PreparedQuery::new(
            Arc::new(|doc| doc.get("v").and_then(|v| v.as_i64()).unwrap_or(0) > 1),
            by_field("v"),
        )
        .with_skip(1)
        .with_limit(2);

        let docs = vec![
            doc(json!({ "id": "a", "v": 5 })),
            doc(json!({ "id": "b", "v": 1 })),
            doc(json!({ "id": "c", "v": 3 })),
            doc(json!({ "id": "d", "v": 2 })),
            doc(json!({ "id": "e", "v": 4 })),
        ];

        let result = query.execute(docs);
        let ids: Vec<&str> = result
            .iter()
            .map(|d| d.get("id").and_then(|v| v.as_str()).unwrap())
            .collect();
        // matched: d(2), c(3), e(4), a(5); skip 1, take 2
        assert_eq!(ids, vec!["c", "e"]);
    }
}
