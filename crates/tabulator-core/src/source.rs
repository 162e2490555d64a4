//! Fields, mappings and the data source trait.
//!
//! A [`Field`] is a concrete place where a concept lives inside a data
//! source. A [`Mapping`] links two fields of the same source and can
//! translate batches of values from one to the other through the
//! source's [`DataSource::lookup`].

use crate::value::Value;
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Number of distinct values handed to a single `DataSource::lookup` call.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Result of a batched lookup: each input value with the target values it
/// maps to. Inputs without a match are simply absent.
pub type Translation = IndexMap<Value, IndexSet<Value>>;

/// Identifier of a registered field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FieldId(pub usize);

/// Identifier of a registered mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MappingId(pub usize);

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "field#{}", self.0)
    }
}

impl fmt::Display for MappingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mapping#{}", self.0)
    }
}

/// Where a field can be read inside its data source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldLocator {
    /// Tables (join keys) through which this field is reachable.
    pub tables: Vec<String>,
    /// Column, expression or opaque address within those tables.
    pub column: String,
}

impl FieldLocator {
    pub fn new<T: Into<String>>(
        tables: impl IntoIterator<Item = T>,
        column: impl Into<String>,
    ) -> Self {
        Self {
            tables: tables.into_iter().map(Into::into).collect(),
            column: column.into(),
        }
    }

    /// Shorthand for a field reachable through a single table.
    pub fn column(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            tables: vec![table.into()],
            column: column.into(),
        }
    }
}

/// Converts between concept-level values and a source's own representation
/// (e.g. truncating dates to the granularity a column stores).
pub trait ValueMap: Send + Sync {
    /// Concept value to source value.
    fn to_source(&self, value: &Value) -> Value;

    /// Source value to concept value.
    fn from_source(&self, value: &Value) -> Value;
}

/// A concept realized in a data source.
#[derive(Clone)]
pub struct Field {
    pub id: FieldId,
    pub datasource: String,
    pub concept: String,
    pub locator: FieldLocator,
    value_map: Option<Arc<dyn ValueMap>>,
}

impl Field {
    pub(crate) fn new(
        id: FieldId,
        datasource: String,
        concept: String,
        locator: FieldLocator,
        value_map: Option<Arc<dyn ValueMap>>,
    ) -> Self {
        Self {
            id,
            datasource,
            concept,
            locator,
            value_map,
        }
    }

    pub fn to_source(&self, value: &Value) -> Value {
        match &self.value_map {
            Some(map) => map.to_source(value),
            None => value.clone(),
        }
    }

    pub fn from_source(&self, value: &Value) -> Value {
        match &self.value_map {
            Some(map) => map.from_source(value),
            None => value.clone(),
        }
    }

    /// Tables this field shares with another.
    pub fn shared_tables(&self, other: &Field) -> Vec<String> {
        self.locator
            .tables
            .iter()
            .filter(|t| other.locator.tables.contains(t))
            .cloned()
            .collect()
    }
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("id", &self.id)
            .field("datasource", &self.datasource)
            .field("concept", &self.concept)
            .field("locator", &self.locator)
            .field("value_map", &self.value_map.is_some())
            .finish()
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.datasource, self.concept)
    }
}

/// Direction in which a mapping is traversed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// From field `a` to field `b`.
    Forward,
    /// From field `b` to field `a`.
    Reverse,
}

/// A single batched lookup request against a data source.
#[derive(Debug, Clone, Copy)]
pub struct Lookup<'a> {
    /// The join key (table) shared by both fields.
    pub table: &'a str,
    pub from: &'a Field,
    pub to: &'a Field,
}

/// A source of data: owns fields and executes lookups for the mappings
/// between them.
pub trait DataSource: Send + Sync {
    /// Unique name of this source.
    fn name(&self) -> &str;

    /// For every input value of `lookup.from`, return the matching values
    /// of `lookup.to` within `lookup.table`.
    ///
    /// Receives at most one batch of distinct values per call.
    fn lookup(&self, lookup: &Lookup<'_>, values: &[Value]) -> Result<Translation, SourceError>;

    /// Turn a raw identifier into a richer presentation value.
    ///
    /// Default implementation knows nothing.
    fn deserialize(&self, concept: &str, raw: &Value) -> Option<Value> {
        let _ = (concept, raw);
        None
    }

    /// All values of a field, when the source can enumerate them.
    ///
    /// Used to start a query that has no enumerable filter. Default
    /// implementation cannot enumerate.
    fn scan(&self, field: &Field) -> Result<Option<Vec<Value>>, SourceError> {
        let _ = field;
        Ok(None)
    }
}

/// A costed, bidirectional link between two fields of the same source.
#[derive(Clone)]
pub struct Mapping {
    pub id: MappingId,
    pub a: Field,
    pub b: Field,
    /// Cost of translating `a` values into `b` values.
    pub forward_cost: f64,
    /// Cost of translating `b` values into `a` values. Infinite when the
    /// reverse direction is not supported.
    pub reverse_cost: f64,
    /// The join key both fields share.
    pub table: String,
    source: Arc<dyn DataSource>,
}

impl Mapping {
    pub(crate) fn new(
        id: MappingId,
        a: Field,
        b: Field,
        forward_cost: f64,
        reverse_cost: f64,
        table: String,
        source: Arc<dyn DataSource>,
    ) -> Self {
        Self {
            id,
            a,
            b,
            forward_cost,
            reverse_cost,
            table,
            source,
        }
    }

    pub fn cost(&self, direction: Direction) -> f64 {
        match direction {
            Direction::Forward => self.forward_cost,
            Direction::Reverse => self.reverse_cost,
        }
    }

    /// Weight used for route selection.
    pub fn weight(&self) -> f64 {
        self.forward_cost.min(self.reverse_cost)
    }

    pub fn supports(&self, direction: Direction) -> bool {
        self.cost(direction).is_finite()
    }

    /// Source and target field for a direction.
    pub fn endpoints(&self, direction: Direction) -> (&Field, &Field) {
        match direction {
            Direction::Forward => (&self.a, &self.b),
            Direction::Reverse => (&self.b, &self.a),
        }
    }

    /// Enumerate the concept values of the field a direction starts from,
    /// if the source can.
    pub fn scan(&self, direction: Direction) -> Result<Option<Vec<Value>>, SourceError> {
        let (from, _) = self.endpoints(direction);
        let values = self.source.scan(from)?;
        Ok(values.map(|values| values.iter().map(|v| from.from_source(v)).collect()))
    }

    /// Translate with the default batch size.
    pub fn translate(
        &self,
        values: &[Value],
        direction: Direction,
    ) -> Result<Translation, SourceError> {
        self.translate_batched(values, direction, DEFAULT_BATCH_SIZE)
    }

    /// Translate concept values across this mapping.
    ///
    /// Input values are deduplicated, converted to the source
    /// representation and sent to the data source in chunks of
    /// `batch_size`. Results come back as concept values.
    pub fn translate_batched(
        &self,
        values: &[Value],
        direction: Direction,
        batch_size: usize,
    ) -> Result<Translation, SourceError> {
        if !self.supports(direction) {
            return Err(SourceError::Unsupported(format!(
                "{self} cannot be traversed {direction:?}"
            )));
        }

        let (from, to) = self.endpoints(direction);

        // source value -> concept values that produced it
        let mut inputs: IndexMap<Value, IndexSet<Value>> = IndexMap::new();
        for value in values {
            inputs
                .entry(from.to_source(value))
                .or_default()
                .insert(value.clone());
        }
        let keys: Vec<Value> = inputs.keys().cloned().collect();

        let lookup = Lookup {
            table: &self.table,
            from,
            to,
        };

        let mut result = Translation::new();
        for chunk in keys.chunks(batch_size.max(1)) {
            let found = self.source.lookup(&lookup, chunk)?;
            for (key, targets) in found {
                let Some(originals) = inputs.get(&key) else {
                    continue;
                };
                for original in originals {
                    let entry = result.entry(original.clone()).or_default();
                    for target in &targets {
                        entry.insert(to.from_source(target));
                    }
                }
            }
        }

        Ok(result)
    }
}

impl fmt::Debug for Mapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mapping")
            .field("id", &self.id)
            .field("a", &self.a)
            .field("b", &self.b)
            .field("forward_cost", &self.forward_cost)
            .field("reverse_cost", &self.reverse_cost)
            .field("table", &self.table)
            .finish()
    }
}

impl fmt::Display for Mapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.a, self.b)
    }
}

/// Errors raised by data sources while looking up values.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("data source unavailable: {0}")]
    Unavailable(String),

    #[error("lookup not supported: {0}")]
    Unsupported(String),

    #[error("lookup failed: {0}")]
    Failed(String),

    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}
