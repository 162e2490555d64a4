//! Per-query profiling records.

use crate::query::{Filter, SortSpec};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What one engine call asked for and where its time went.
///
/// Purely observational: recording never changes results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileEntry {
    pub concepts: Vec<String>,
    pub filters: Vec<Filter>,
    pub sort: Vec<SortSpec>,
    pub limit: Option<usize>,
    pub offset: usize,
    /// Rows returned to the caller.
    pub rows: usize,
    /// Reduction steps taken (operations and seeds).
    pub steps: usize,
    /// Time spent finding the route.
    pub route: Duration,
    /// Time spent in the reduction loop.
    pub reduce: Duration,
    /// Time spent sorting, windowing, aggregating and deserializing.
    pub post: Duration,
}

impl ProfileEntry {
    pub fn total(&self) -> Duration {
        self.route + self.reduce + self.post
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total() {
        let entry = ProfileEntry {
            concepts: vec!["a".into()],
            filters: Vec::new(),
            sort: Vec::new(),
            limit: None,
            offset: 0,
            rows: 3,
            steps: 1,
            route: Duration::from_millis(1),
            reduce: Duration::from_millis(5),
            post: Duration::from_millis(2),
        };
        assert_eq!(entry.total(), Duration::from_millis(8));
    }
}
