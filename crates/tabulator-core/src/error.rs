//! Query errors and their kinds.

use crate::model::ModelError;
use crate::router::RouteError;
use crate::source::{MappingId, SourceError};
use crate::value::ValueError;

/// Broad category of a [`QueryError`], for callers rendering messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Static model or query defect.
    Configuration,
    /// Required concepts are not connected by mappings.
    NoRoute,
    /// The reduction loop stopped making progress.
    NoProgress,
    /// A data source failed.
    Data,
    /// Sorting or aggregating the result failed.
    Postprocess,
}

/// Everything a query can fail with.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Route(#[from] RouteError),

    #[error("invalid value for concept {concept}")]
    Value {
        concept: String,
        #[source]
        source: ValueError,
    },

    #[error("engine made no progress at step {step} (pending edges: {pending:?})")]
    NoProgress { step: usize, pending: Vec<String> },

    #[error("translating over {mapping} failed")]
    Translate {
        mapping: MappingId,
        #[source]
        source: SourceError,
    },

    #[error("scanning {field} failed")]
    Scan {
        field: String,
        #[source]
        source: SourceError,
    },

    #[error("no filter or scan can enumerate any of {concepts:?}")]
    Unbounded { concepts: Vec<String> },

    #[error("cannot compare {left} with {right} in column {column}")]
    Incomparable {
        column: String,
        left: String,
        right: String,
    },

    #[error("unknown result column: {0}")]
    UnknownColumn(String),

    #[error("cannot aggregate: {0}")]
    Aggregate(String),
}

impl QueryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            QueryError::Model(_)
            | QueryError::Route(RouteError::UnknownConcept(_))
            | QueryError::Value { .. }
            | QueryError::Unbounded { .. } => ErrorKind::Configuration,
            QueryError::Route(RouteError::NoRoute { .. }) => ErrorKind::NoRoute,
            QueryError::NoProgress { .. } => ErrorKind::NoProgress,
            QueryError::Translate { .. } | QueryError::Scan { .. } => ErrorKind::Data,
            QueryError::Incomparable { .. }
            | QueryError::UnknownColumn(_)
            | QueryError::Aggregate(_) => ErrorKind::Postprocess,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        let no_route = QueryError::from(RouteError::NoRoute {
            concepts: vec!["a".into(), "z".into()],
            unreachable: vec!["z".into()],
        });
        assert_eq!(no_route.kind(), ErrorKind::NoRoute);

        let unknown = QueryError::from(RouteError::UnknownConcept("z".into()));
        assert_eq!(unknown.kind(), ErrorKind::Configuration);

        let data = QueryError::Translate {
            mapping: MappingId(0),
            source: SourceError::Unavailable("db down".into()),
        };
        assert_eq!(data.kind(), ErrorKind::Data);
        assert!(std::error::Error::source(&data).is_some());

        assert_eq!(
            QueryError::UnknownColumn("x".into()).kind(),
            ErrorKind::Postprocess
        );
    }
}
