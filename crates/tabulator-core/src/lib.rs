//! Tabulator: federated concept query engine
//!
//! Callers ask for a table of abstract concepts (article, date, project,
//! ...) without knowing which data sources hold them. The engine finds the
//! cheapest route of mappings connecting the requested concepts, joins
//! partial results along that route step by step, then sorts, windows or
//! pivots the outcome.

mod cache;
mod engine;
mod error;
pub mod format;
mod model;
mod operation;
pub mod postprocess;
mod profile;
mod query;
mod router;
mod source;
mod state;
mod table;
mod value;

#[doc(hidden)]
pub mod testing;

pub use cache::{CacheStats, DEFAULT_CACHE_CAPACITY, ObjectCache};
pub use engine::{EngineOptions, QueryEngine};
pub use error::{ErrorKind, QueryError};
pub use format::{DocumentFormat, FormatError};
pub use model::{Concept, Model, ModelError};
pub use operation::{Candidate, Operation, OperationsFactory, StepReport};
pub use profile::ProfileEntry;
pub use query::{Aggregate, AggregateFn, Filter, ListQuery, QuerySpec, SortSpec, TableQuery};
pub use router::{Route, RouteError, Router};
pub use source::{
    DEFAULT_BATCH_SIZE, DataSource, Direction, Field, FieldId, FieldLocator, Lookup, Mapping,
    MappingId, SourceError, Translation, ValueMap,
};
pub use state::{Edge, ExecutionState, Node, NodeId, Signature, Solution};
pub use table::{PivotTable, Row, Table};
pub use value::{Value, ValueError, ValueType};
