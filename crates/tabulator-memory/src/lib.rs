//! In-memory backend for Tabulator.
//!
//! [`MemorySource`] is a relational [`DataSource`](tabulator_core::DataSource):
//! named tables of rows, with fields addressed by table and column. Lookups
//! go through per-column hash indexes built on first use.
//!
//! [`ModelFile`] describes a complete model (concepts, sources, fields and
//! mappings) as a YAML, JSON or TOML document and builds it.

mod loader;
mod source;

pub use loader::{FieldSpec, LoadError, MappingSpec, ModelFile, SourceSpec, load_model};
pub use source::{MemorySource, MemoryTable};
