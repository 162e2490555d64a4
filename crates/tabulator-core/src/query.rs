//! Query descriptions: filters, sort keys, list and pivot queries.
//!
//! These are plain serializable value objects. A query file holds a
//! [`QuerySpec`], either a list query or a pivot (table) query.

use crate::format::{self, DocumentFormat, FormatError};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A constraint on the values of one concept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Filter {
    /// Only the listed values are allowed.
    Values { concept: String, values: Vec<Value> },
    /// Values within an inclusive range; a missing bound is open.
    Interval {
        concept: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to: Option<Value>,
    },
}

impl Filter {
    pub fn values(
        concept: impl Into<String>,
        values: impl IntoIterator<Item = impl Into<Value>>,
    ) -> Self {
        Filter::Values {
            concept: concept.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn interval(concept: impl Into<String>, from: Option<Value>, to: Option<Value>) -> Self {
        Filter::Interval {
            concept: concept.into(),
            from,
            to,
        }
    }

    /// Inclusive range with both bounds.
    pub fn between(concept: impl Into<String>, from: impl Into<Value>, to: impl Into<Value>) -> Self {
        Self::interval(concept, Some(from.into()), Some(to.into()))
    }

    pub fn concept(&self) -> &str {
        match self {
            Filter::Values { concept, .. } | Filter::Interval { concept, .. } => concept,
        }
    }

    /// Whether a value passes this filter. Values incomparable with an
    /// interval bound do not pass.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Filter::Values { values, .. } => values.contains(value),
            Filter::Interval { from, to, .. } => {
                if value.is_null() {
                    return false;
                }
                let above = from.as_ref().is_none_or(|from| {
                    matches!(
                        value.try_cmp(from),
                        Some(Ordering::Greater | Ordering::Equal)
                    )
                });
                let below = to.as_ref().is_none_or(|to| {
                    matches!(value.try_cmp(to), Some(Ordering::Less | Ordering::Equal))
                });
                above && below
            }
        }
    }
}

fn default_ascending() -> bool {
    true
}

/// One sort key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub concept: String,
    #[serde(default = "default_ascending")]
    pub ascending: bool,
}

impl SortSpec {
    pub fn asc(concept: impl Into<String>) -> Self {
        Self {
            concept: concept.into(),
            ascending: true,
        }
    }

    pub fn desc(concept: impl Into<String>) -> Self {
        Self {
            concept: concept.into(),
            ascending: false,
        }
    }
}

/// A request for a flat table of concept values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListQuery {
    /// Output columns, in order.
    pub concepts: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<Filter>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sort: Vec<SortSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,

    #[serde(default)]
    pub offset: usize,

    /// Drop duplicate rows (first occurrence wins).
    #[serde(default)]
    pub distinct: bool,
}

impl ListQuery {
    pub fn new<S: Into<String>>(concepts: impl IntoIterator<Item = S>) -> Self {
        Self {
            concepts: concepts.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn sort(mut self, sort: SortSpec) -> Self {
        self.sort.push(sort);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn distinct(mut self, distinct: bool) -> Self {
        self.distinct = distinct;
        self
    }
}

/// Aggregation functions for pivot cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateFn {
    Count,
    CountDistinct,
    Sum,
    Average,
    Min,
    Max,
}

/// One aggregate computed per pivot cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aggregate {
    /// Concept to fold; `None` only makes sense for `Count` (count rows).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concept: Option<String>,
    pub function: AggregateFn,
}

impl Aggregate {
    /// Number of rows per cell.
    pub fn count() -> Self {
        Self {
            concept: None,
            function: AggregateFn::Count,
        }
    }

    pub fn of(concept: impl Into<String>, function: AggregateFn) -> Self {
        Self {
            concept: Some(concept.into()),
            function,
        }
    }
}

/// A request for a pivot table: rows × columns, aggregated cells.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableQuery {
    pub rows: Vec<String>,

    #[serde(default)]
    pub columns: Vec<String>,

    /// Aggregates per cell; a row count when empty.
    #[serde(default)]
    pub cells: Vec<Aggregate>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<Filter>,
}

impl TableQuery {
    pub fn new<S: Into<String>>(rows: impl IntoIterator<Item = S>) -> Self {
        Self {
            rows: rows.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn columns<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn cell(mut self, aggregate: Aggregate) -> Self {
        self.cells.push(aggregate);
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Cell aggregates, defaulting to a row count.
    pub fn aggregates(&self) -> Vec<Aggregate> {
        if self.cells.is_empty() {
            vec![Aggregate::count()]
        } else {
            self.cells.clone()
        }
    }

    /// The flat list query feeding this pivot: rows, columns and every
    /// aggregated concept, without duplicates.
    pub fn to_list_query(&self) -> ListQuery {
        let mut concepts: Vec<String> = Vec::new();
        let referenced = self
            .rows
            .iter()
            .chain(&self.columns)
            .chain(self.cells.iter().filter_map(|a| a.concept.as_ref()));
        for concept in referenced {
            if !concepts.contains(concept) {
                concepts.push(concept.clone());
            }
        }
        ListQuery {
            concepts,
            filters: self.filters.clone(),
            ..ListQuery::default()
        }
    }
}

/// The file form of a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QuerySpec {
    Table(TableQuery),
    List(ListQuery),
}

impl QuerySpec {
    /// Parse a query, detecting the format from `path`.
    pub fn from_bytes(data: &[u8], path: Option<&str>) -> Result<Self, FormatError> {
        format::from_bytes(data, path)
    }

    pub fn from_bytes_format(data: &[u8], format: &str) -> Result<Self, FormatError> {
        format::from_bytes_format(data, format)
    }

    pub fn to_bytes(&self, format: &str) -> Result<Vec<u8>, FormatError> {
        DocumentFormat::from_name(format)
            .ok_or_else(|| FormatError::Unsupported(format.to_string()))?
            .render(self)
    }

    /// Every filter of the query.
    pub fn filters(&self) -> &[Filter] {
        match self {
            QuerySpec::Table(q) => &q.filters,
            QuerySpec::List(q) => &q.filters,
        }
    }
}
