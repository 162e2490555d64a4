//! Model files: a whole model described as a serde document.
//!
//! ```yaml
//! concepts:
//!   article: identifier
//!   date: date
//! sources:
//!   news:
//!     tables:
//!       articles:
//!         columns: [id, date]
//!         rows:
//!           - [a1, "2010-01-31"]
//!     labels:
//!       article: { a1: "First article" }
//! fields:
//!   article_id: { source: news, concept: article, tables: [articles], column: id }
//!   article_date: { source: news, concept: date, tables: [articles], column: date }
//! mappings:
//!   - { a: article_id, b: article_date, cost: 1.0 }
//! ```
//!
//! Cells of every column bound to a field are coerced to the field's
//! concept type when the model is built.

use crate::source::{MemorySource, MemoryTable};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tabulator_core::format::{self, FormatError};
use tabulator_core::{
    DEFAULT_CACHE_CAPACITY, FieldId, FieldLocator, Model, ModelError, Value, ValueError, ValueType,
};
use tracing::debug;

/// Errors loading a model file.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to read {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("unknown field '{0}' in mapping")]
    UnknownField(String),

    #[error("field '{field}' names unknown source '{source_name}'")]
    UnknownSource { field: String, source_name: String },

    #[error("table '{table}' has no column '{column}'")]
    UnknownColumn { table: String, column: String },

    #[error("row {row} of table '{table}' has {found} cells, expected {expected}")]
    RowWidth {
        table: String,
        row: usize,
        found: usize,
        expected: usize,
    },

    #[error("bad value in {table}.{column}")]
    Value {
        table: String,
        column: String,
        #[source]
        source: ValueError,
    },
}

/// One data source and its contents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceSpec {
    pub tables: IndexMap<String, MemoryTable>,
    /// Presentation values, per concept, per raw value.
    pub labels: IndexMap<String, IndexMap<String, Value>>,
}

/// A concept bound to a column of a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub source: String,
    pub concept: String,
    pub tables: Vec<String>,
    pub column: String,
}

/// A mapping between two named fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingSpec {
    pub a: String,
    pub b: String,
    pub cost: f64,
    /// Cost of the b -> a direction; same as `cost` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reverse_cost: Option<f64>,
    /// Only the a -> b direction is supported.
    #[serde(default)]
    pub one_way: bool,
}

/// A complete model document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelFile {
    pub concepts: IndexMap<String, ValueType>,
    pub sources: IndexMap<String, SourceSpec>,
    pub fields: IndexMap<String, FieldSpec>,
    pub mappings: Vec<MappingSpec>,
}

impl ModelFile {
    /// Parse a model, detecting the format from `path` (YAML when unknown).
    pub fn from_bytes(data: &[u8], path: Option<&str>) -> Result<Self, FormatError> {
        format::from_bytes(data, path)
    }

    pub fn from_bytes_format(data: &[u8], format: &str) -> Result<Self, FormatError> {
        format::from_bytes_format(data, format)
    }

    pub fn from_path(path: &Path) -> Result<Self, LoadError> {
        let data = std::fs::read(path).map_err(|source| LoadError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self::from_bytes(&data, path.to_str())?)
    }

    /// Register everything into a new model.
    pub fn build(&self, cache_capacity: usize) -> Result<Model, LoadError> {
        let mut model = Model::new().with_cache_capacity(cache_capacity);

        for (name, value_type) in &self.concepts {
            model.register_concept(name.as_str(), *value_type)?;
        }

        let mut sources: IndexMap<&str, MemorySource> = IndexMap::new();
        for (name, spec) in &self.sources {
            let mut source = MemorySource::new(name.as_str());
            for (table, data) in &spec.tables {
                check_widths(table, data)?;
                source.insert_table(table.as_str(), data.clone());
            }
            for (concept, labels) in &spec.labels {
                for (raw, label) in labels {
                    // document keys are always strings; numeric ids are stored as ints
                    if let Ok(n) = raw.parse::<i64>() {
                        source = source.with_label(concept.as_str(), n, label.clone());
                    }
                    source = source.with_label(concept.as_str(), raw.as_str(), label.clone());
                }
            }
            sources.insert(name.as_str(), source);
        }

        for (name, field) in &self.fields {
            let source =
                sources
                    .get_mut(field.source.as_str())
                    .ok_or_else(|| LoadError::UnknownSource {
                        field: name.clone(),
                        source_name: field.source.clone(),
                    })?;
            let value_type = model.require_concept(&field.concept)?.value_type;
            for table in &field.tables {
                coerce_column(source, table, &field.column, value_type)?;
            }
        }

        for source in sources.into_values() {
            model.register_datasource(Arc::new(source))?;
        }

        let mut ids: IndexMap<&str, FieldId> = IndexMap::new();
        for (name, field) in &self.fields {
            let id = model.register_field(
                &field.source,
                &field.concept,
                FieldLocator::new(field.tables.iter().cloned(), field.column.as_str()),
            )?;
            ids.insert(name.as_str(), id);
        }

        for mapping in &self.mappings {
            let field = |name: &str| {
                ids.get(name)
                    .copied()
                    .ok_or_else(|| LoadError::UnknownField(name.to_string()))
            };
            let reverse = if mapping.one_way {
                f64::INFINITY
            } else {
                mapping.reverse_cost.unwrap_or(mapping.cost)
            };
            model.register_mapping(field(&mapping.a)?, field(&mapping.b)?, mapping.cost, reverse)?;
        }

        debug!(
            concepts = self.concepts.len(),
            sources = self.sources.len(),
            fields = self.fields.len(),
            mappings = self.mappings.len(),
            "model built"
        );
        Ok(model)
    }
}

/// Read and build a model file.
pub fn load_model(path: &Path, cache_capacity: Option<usize>) -> Result<Model, LoadError> {
    ModelFile::from_path(path)?.build(cache_capacity.unwrap_or(DEFAULT_CACHE_CAPACITY))
}

fn check_widths(name: &str, table: &MemoryTable) -> Result<(), LoadError> {
    let expected = table.columns.len();
    match table.rows.iter().position(|row| row.len() != expected) {
        Some(row) => Err(LoadError::RowWidth {
            table: name.to_string(),
            row,
            found: table.rows[row].len(),
            expected,
        }),
        None => Ok(()),
    }
}

fn coerce_column(
    source: &mut MemorySource,
    table: &str,
    column: &str,
    value_type: ValueType,
) -> Result<(), LoadError> {
    let unknown = || LoadError::UnknownColumn {
        table: table.to_string(),
        column: column.to_string(),
    };
    let data = source.table_mut(table).ok_or_else(unknown)?;
    let index = data.column_index(column).ok_or_else(unknown)?;

    for row in &mut data.rows {
        if let Some(cell) = row.get_mut(index) {
            let raw = std::mem::replace(cell, Value::Null);
            *cell = value_type
                .coerce(raw)
                .map_err(|source| LoadError::Value {
                    table: table.to_string(),
                    column: column.to_string(),
                    source,
                })?;
        }
    }
    Ok(())
}
