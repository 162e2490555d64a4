//! The concept registry: concepts, data sources, fields and mappings.
//!
//! A [`Model`] is built once (append-only) and then shared read-only by
//! every query.

use crate::cache::{CacheStats, ObjectCache};
use crate::source::{DataSource, Field, FieldId, FieldLocator, Mapping, MappingId, ValueMap};
use crate::value::{Value, ValueType};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A named, typed domain attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Concept {
    pub name: String,
    #[serde(default)]
    pub value_type: ValueType,
}

impl Concept {
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
        }
    }
}

/// Configuration errors raised while building a model.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ModelError {
    #[error("concept already registered: {0}")]
    DuplicateConcept(String),

    #[error("data source already registered: {0}")]
    DuplicateDataSource(String),

    #[error("unknown concept: {0}")]
    UnknownConcept(String),

    #[error("unknown data source: {0}")]
    UnknownDataSource(String),

    #[error("unknown field: {0}")]
    UnknownField(FieldId),

    #[error("ambiguous or absent join key between {a} and {b} (shared tables: {shared:?})")]
    JoinKey {
        a: String,
        b: String,
        shared: Vec<String>,
    },

    #[error("invalid cost for mapping {a} -> {b}: {reason}")]
    InvalidCost { a: String, b: String, reason: String },
}

/// Registry of concepts, data sources, fields and mappings.
pub struct Model {
    concepts: IndexMap<String, Concept>,
    datasources: IndexMap<String, Arc<dyn DataSource>>,
    fields: Vec<Field>,
    mappings: Vec<Mapping>,
    cache: ObjectCache,
}

impl Default for Model {
    fn default() -> Self {
        Self::new()
    }
}

impl Model {
    /// Create an empty model with the default object cache.
    pub fn new() -> Self {
        Self {
            concepts: IndexMap::new(),
            datasources: IndexMap::new(),
            fields: Vec::new(),
            mappings: Vec::new(),
            cache: ObjectCache::default(),
        }
    }

    /// Replace the object cache with one of the given capacity.
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache = ObjectCache::new(capacity);
        self
    }

    pub fn register_datasource(&mut self, source: Arc<dyn DataSource>) -> Result<(), ModelError> {
        let name = source.name().to_string();
        if self.datasources.contains_key(&name) {
            return Err(ModelError::DuplicateDataSource(name));
        }
        self.datasources.insert(name, source);
        Ok(())
    }

    pub fn register_concept(
        &mut self,
        name: impl Into<String>,
        value_type: ValueType,
    ) -> Result<(), ModelError> {
        let name = name.into();
        if self.concepts.contains_key(&name) {
            return Err(ModelError::DuplicateConcept(name));
        }
        self.concepts
            .insert(name.clone(), Concept::new(name, value_type));
        Ok(())
    }

    /// Bind a concept to a location inside a registered data source.
    pub fn register_field(
        &mut self,
        datasource: &str,
        concept: &str,
        locator: FieldLocator,
    ) -> Result<FieldId, ModelError> {
        self.add_field(datasource, concept, locator, None)
    }

    /// Like [`register_field`](Self::register_field), translating values
    /// through `value_map` on the way into and out of the source.
    pub fn register_mapped_field(
        &mut self,
        datasource: &str,
        concept: &str,
        locator: FieldLocator,
        value_map: Arc<dyn ValueMap>,
    ) -> Result<FieldId, ModelError> {
        self.add_field(datasource, concept, locator, Some(value_map))
    }

    fn add_field(
        &mut self,
        datasource: &str,
        concept: &str,
        locator: FieldLocator,
        value_map: Option<Arc<dyn ValueMap>>,
    ) -> Result<FieldId, ModelError> {
        if !self.datasources.contains_key(datasource) {
            return Err(ModelError::UnknownDataSource(datasource.to_string()));
        }
        if !self.concepts.contains_key(concept) {
            return Err(ModelError::UnknownConcept(concept.to_string()));
        }
        let id = FieldId(self.fields.len());
        self.fields.push(Field::new(
            id,
            datasource.to_string(),
            concept.to_string(),
            locator,
            value_map,
        ));
        Ok(id)
    }

    /// Link two fields of the same data source.
    ///
    /// The fields must share exactly one table. Costs must be non-negative;
    /// an infinite cost marks that direction as unsupported.
    pub fn register_mapping(
        &mut self,
        a: FieldId,
        b: FieldId,
        forward_cost: f64,
        reverse_cost: f64,
    ) -> Result<MappingId, ModelError> {
        let field_a = self.field(a).ok_or(ModelError::UnknownField(a))?.clone();
        let field_b = self.field(b).ok_or(ModelError::UnknownField(b))?.clone();

        let cost_error = |reason: &str| ModelError::InvalidCost {
            a: field_a.to_string(),
            b: field_b.to_string(),
            reason: reason.to_string(),
        };
        if forward_cost.is_nan() || reverse_cost.is_nan() {
            return Err(cost_error("cost is NaN"));
        }
        if forward_cost < 0.0 || reverse_cost < 0.0 {
            return Err(cost_error("cost is negative"));
        }
        if forward_cost.is_infinite() && reverse_cost.is_infinite() {
            return Err(cost_error("neither direction is supported"));
        }

        let mut shared = if field_a.datasource == field_b.datasource {
            field_a.shared_tables(&field_b)
        } else {
            Vec::new()
        };
        if shared.len() != 1 {
            return Err(ModelError::JoinKey {
                a: field_a.to_string(),
                b: field_b.to_string(),
                shared,
            });
        }
        let table = shared.swap_remove(0);

        let source = self
            .datasources
            .get(&field_a.datasource)
            .cloned()
            .ok_or_else(|| ModelError::UnknownDataSource(field_a.datasource.clone()))?;

        let id = MappingId(self.mappings.len());
        self.mappings.push(Mapping::new(
            id,
            field_a,
            field_b,
            forward_cost,
            reverse_cost,
            table,
            source,
        ));
        Ok(id)
    }

    /// Register a mapping with the same cost in both directions.
    pub fn register_symmetric_mapping(
        &mut self,
        a: FieldId,
        b: FieldId,
        cost: f64,
    ) -> Result<MappingId, ModelError> {
        self.register_mapping(a, b, cost, cost)
    }

    pub fn concept(&self, name: &str) -> Option<&Concept> {
        self.concepts.get(name)
    }

    /// Look up a concept, failing with [`ModelError::UnknownConcept`].
    pub fn require_concept(&self, name: &str) -> Result<&Concept, ModelError> {
        self.concept(name)
            .ok_or_else(|| ModelError::UnknownConcept(name.to_string()))
    }

    /// Concepts in registration order.
    pub fn concepts(&self) -> impl Iterator<Item = &Concept> {
        self.concepts.values()
    }

    pub fn datasource(&self, name: &str) -> Option<&Arc<dyn DataSource>> {
        self.datasources.get(name)
    }

    pub fn datasources(&self) -> impl Iterator<Item = &Arc<dyn DataSource>> {
        self.datasources.values()
    }

    pub fn field(&self, id: FieldId) -> Option<&Field> {
        self.fields.get(id.0)
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Fields realizing a concept.
    pub fn fields_for<'a>(&'a self, concept: &'a str) -> impl Iterator<Item = &'a Field> + 'a {
        self.fields.iter().filter(move |f| f.concept == concept)
    }

    pub fn mapping(&self, id: MappingId) -> Option<&Mapping> {
        self.mappings.get(id.0)
    }

    /// Mappings in registration order.
    pub fn mappings(&self) -> &[Mapping] {
        &self.mappings
    }

    /// Turn a raw identifier into its presentation value.
    ///
    /// Data sources are asked in registration order; the first answer
    /// wins. Without an answer the raw value is returned as is.
    pub fn deserialize(&self, concept: &str, raw: &Value) -> Value {
        if raw.is_null() {
            return Value::Null;
        }
        self.cache.get_or_insert_with(concept, raw, || {
            self.datasources
                .values()
                .find_map(|source| source.deserialize(concept, raw))
                .unwrap_or_else(|| raw.clone())
        })
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("concepts", &self.concepts.keys().collect::<Vec<_>>())
            .field("datasources", &self.datasources.keys().collect::<Vec<_>>())
            .field("fields", &self.fields)
            .field("mappings", &self.mappings)
            .finish()
    }
}
