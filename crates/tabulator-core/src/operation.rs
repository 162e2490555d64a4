//! Operations: the candidate steps of the reduction loop.
//!
//! At every step the [`OperationsFactory`] lists the operations whose edge
//! is pending and whose source side already holds data, each with a
//! utility estimate. The engine applies the best one.

use crate::error::QueryError;
use crate::source::{Direction, Translation};
use crate::state::{Edge, ExecutionState, Node};
use crate::table::Row;
use crate::value::Value;
use indexmap::{IndexMap, IndexSet};

/// One application of a pending edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Translate a mapping edge in one direction and join both nodes.
    Reduce { edge: usize, direction: Direction },
    /// Apply a filter node to its concept node.
    Filter { edge: usize },
}

impl Operation {
    pub fn edge(&self) -> usize {
        match self {
            Operation::Reduce { edge, .. } | Operation::Filter { edge } => *edge,
        }
    }
}

/// An applicable operation with its score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub operation: Operation,
    /// Higher is better.
    pub utility: f64,
    /// Mapping cost of the direction taken (zero for filters).
    pub cost: f64,
}

impl Candidate {
    /// Max utility, then lowest cost. Earlier candidates win full ties.
    fn beats(&self, other: &Candidate) -> bool {
        self.utility > other.utility || (self.utility == other.utility && self.cost < other.cost)
    }
}

/// What a step did, for logging and profiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepReport {
    pub operation: Operation,
    pub rows_in: usize,
    pub rows_out: usize,
}

/// Enumerates applicable operations for a state.
pub struct OperationsFactory;

impl OperationsFactory {
    /// Applicable operations, in pending-edge order.
    pub fn candidates(state: &ExecutionState) -> Vec<Candidate> {
        let mut candidates = Vec::new();
        for &index in state.pending() {
            match state.edge(index) {
                Some(Edge::Filter { node, concept }) => {
                    let filter_ready = state.node(*node).is_some_and(Node::is_materialized);
                    let target_ready = state
                        .node_of(concept)
                        .and_then(|id| state.node(id))
                        .is_some_and(Node::is_materialized);
                    if filter_ready || target_ready {
                        candidates.push(Candidate {
                            operation: Operation::Filter { edge: index },
                            utility: 0.0,
                            cost: 0.0,
                        });
                    }
                }
                Some(Edge::Mapping(mapping)) => {
                    for direction in [Direction::Forward, Direction::Reverse] {
                        if !mapping.supports(direction) {
                            continue;
                        }
                        let (from, _) = mapping.endpoints(direction);
                        let Some(source) = state.node_of(&from.concept).and_then(|id| state.node(id))
                        else {
                            continue;
                        };
                        if !source.is_materialized() {
                            continue;
                        }
                        let values = source.distinct_values(&from.concept).len();
                        let cost = mapping.cost(direction);
                        candidates.push(Candidate {
                            operation: Operation::Reduce {
                                edge: index,
                                direction,
                            },
                            utility: -(values as f64 * cost),
                            cost,
                        });
                    }
                }
                None => {}
            }
        }
        candidates
    }

    /// The operation to apply next, if any is applicable.
    pub fn best(state: &ExecutionState) -> Option<Candidate> {
        Self::candidates(state)
            .into_iter()
            .reduce(|best, c| if c.beats(&best) { c } else { best })
    }
}

fn invalid(state: &ExecutionState) -> QueryError {
    QueryError::NoProgress {
        step: state.steps(),
        pending: state.pending_names(),
    }
}

impl Operation {
    /// Apply this operation, consuming its edge.
    ///
    /// The edge leaves the pending set before any lookup runs, so a failed
    /// translation never gets retried within the query.
    pub fn apply(
        &self,
        state: &mut ExecutionState,
        batch_size: usize,
    ) -> Result<StepReport, QueryError> {
        let edge = self.edge();
        if !state.take_edge(edge) {
            return Err(invalid(state));
        }
        match *self {
            Operation::Reduce { direction, .. } => reduce(state, edge, direction, batch_size),
            Operation::Filter { .. } => filter(state, edge),
        }
        .map(|(rows_in, rows_out)| StepReport {
            operation: *self,
            rows_in,
            rows_out,
        })
    }
}

fn reduce(
    state: &mut ExecutionState,
    edge: usize,
    direction: Direction,
    batch_size: usize,
) -> Result<(usize, usize), QueryError> {
    let Some(Edge::Mapping(mapping)) = state.edge(edge).cloned() else {
        return Err(invalid(state));
    };
    let (from, to) = mapping.endpoints(direction);

    let (Some(source_id), Some(target_id)) = (state.node_of(&from.concept), state.node_of(&to.concept))
    else {
        return Err(invalid(state));
    };
    if source_id == target_id {
        return Err(invalid(state));
    }
    let (Some(source), Some(target)) = (state.node(source_id), state.node(target_id)) else {
        return Err(invalid(state));
    };

    let values = source.distinct_values(&from.concept);
    let translation = mapping
        .translate_batched(&values, direction, batch_size)
        .map_err(|err| QueryError::Translate {
            mapping: mapping.id,
            source: err,
        })?;

    let rows_in = source.row_count().unwrap_or(0);
    let merged = join(source, &from.concept, target, &to.concept, &translation);
    let rows_out = merged.row_count().unwrap_or(0);
    state.replace_nodes(source_id, target_id, merged);
    Ok((rows_in, rows_out))
}

fn cell(row: &Row, index: Option<usize>) -> Option<&Value> {
    index.and_then(|i| row.get(i))
}

/// Inner join of `source` with `target` through a translation of the
/// source's `from` column into values of the target's `to` column.
fn join(source: &Node, from: &str, target: &Node, to: &str, translation: &Translation) -> Node {
    let source_rows: &[Row] = source.rows.as_deref().unwrap_or(&[]);
    let from_index = source.column_index(from);

    let mut columns = source.columns.clone();
    let mut rows = Vec::new();

    match (&target.rows, target.column_index(to)) {
        (Some(target_rows), Some(to_index)) => {
            columns.extend(target.columns.iter().cloned());

            let mut index: IndexMap<&Value, Vec<&Row>> = IndexMap::new();
            for row in target_rows {
                if let Some(v) = row.get(to_index) {
                    index.entry(v).or_default().push(row);
                }
            }

            for row in source_rows {
                let Some(targets) = cell(row, from_index).and_then(|k| translation.get(k)) else {
                    continue;
                };
                for value in targets {
                    for matched in index.get(value).into_iter().flatten() {
                        let mut joined = row.clone();
                        joined.extend(matched.iter().cloned());
                        rows.push(joined);
                    }
                }
            }
        }
        _ => {
            // target still virtual: expand
            columns.push(to.to_string());
            for row in source_rows {
                let Some(targets) = cell(row, from_index).and_then(|k| translation.get(k)) else {
                    continue;
                };
                for value in targets {
                    let mut joined = row.clone();
                    joined.push(value.clone());
                    rows.push(joined);
                }
            }
        }
    }

    Node {
        columns,
        rows: Some(rows),
        filter: None,
    }
}

fn filter(state: &mut ExecutionState, edge: usize) -> Result<(usize, usize), QueryError> {
    let Some(Edge::Filter { node, concept }) = state.edge(edge).cloned() else {
        return Err(invalid(state));
    };
    let Some(target_id) = state.node_of(&concept) else {
        return Err(invalid(state));
    };
    let Some(filter_node) = state.remove_node(node) else {
        return Err(invalid(state));
    };
    let Some(predicate) = filter_node.filter else {
        return Err(invalid(state));
    };

    let allowed: Option<IndexSet<Value>> = filter_node
        .rows
        .map(|rows| rows.into_iter().flatten().collect());

    let materialized = state.node(target_id).is_some_and(Node::is_materialized);
    if !materialized {
        // only a value filter can seed a virtual node
        let Some(allowed) = allowed else {
            return Err(invalid(state));
        };
        let values: Vec<Value> = allowed.into_iter().collect();
        let seeded = values.len();
        state.seed(target_id, values);
        return Ok((seeded, seeded));
    }

    let index = state
        .node(target_id)
        .and_then(|n| n.column_index(&concept));
    if let Some(rows) = state.node_mut(target_id).and_then(|n| n.rows.as_mut()) {
        let rows_in = rows.len();
        rows.retain(|row| {
            let Some(value) = index.and_then(|i| row.get(i)) else {
                return false;
            };
            match &allowed {
                Some(allowed) => allowed.contains(value),
                None => predicate.matches(value),
            }
        });
        return Ok((rows_in, rows.len()));
    }
    Err(invalid(state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Filter;
    use crate::router::Router;
    use crate::source::DEFAULT_BATCH_SIZE;
    use crate::testing::triangle;

    fn state_for(goal: &[&str], filters: Vec<Filter>) -> (ExecutionState, crate::model::Model) {
        let (model, _) = triangle().unwrap();
        let filter_concepts: Vec<String> = filters.iter().map(|f| f.concept().to_string()).collect();
        let route = Router::new(&model).find_route(goal, &filter_concepts).unwrap();
        let goal: Vec<String> = goal.iter().map(|c| c.to_string()).collect();
        (ExecutionState::new(&route, &goal, filters), model)
    }

    #[test]
    fn test_nothing_applicable_without_data() {
        let (state, _) = state_for(&["a", "b"], Vec::new());
        assert!(OperationsFactory::candidates(&state).is_empty());
        assert!(OperationsFactory::best(&state).is_none());
    }

    #[test]
    fn test_filter_first() {
        let (state, _) = state_for(&["a", "b"], vec![Filter::values("b", ["b1"])]);
        let best = OperationsFactory::best(&state).unwrap();
        assert_eq!(best.operation, Operation::Filter { edge: 0 });
    }

    #[test]
    fn test_interval_filter_waits_for_data() {
        let (state, _) = state_for(&["a", "b"], vec![Filter::between("b", "b1", "b2")]);
        assert!(OperationsFactory::candidates(&state).is_empty());
    }

    #[test]
    fn test_reduce_expands_and_joins() {
        let (mut state, _) = state_for(&["a", "b"], vec![Filter::values("a", ["a1", "a2"])]);

        let report = Operation::Filter { edge: 0 }.apply(&mut state, DEFAULT_BATCH_SIZE).unwrap();
        assert_eq!(report.rows_out, 2);

        let best = OperationsFactory::best(&state).unwrap();
        assert_eq!(
            best.operation,
            Operation::Reduce {
                edge: 1,
                direction: Direction::Forward
            }
        );
        assert_eq!(best.utility, -2.0);

        let report = best.operation.apply(&mut state, DEFAULT_BATCH_SIZE).unwrap();
        assert_eq!((report.rows_in, report.rows_out), (2, 2));

        let id = state.node_of("a").unwrap();
        assert_eq!(Some(id), state.node_of("b"));
        let rows = state.node(id).unwrap().rows.clone().unwrap();
        assert_eq!(
            rows,
            vec![
                vec![Value::from("a1"), Value::from("b1")],
                vec![Value::from("a1"), Value::from("b2")],
            ]
        );
        assert!(state.pending().is_empty());
    }

    #[test]
    fn test_join_materialized_target() {
        let (mut state, _) = state_for(
            &["a", "b"],
            vec![Filter::values("a", ["a1"]), Filter::values("b", ["b2", "b3"])],
        );
        Operation::Filter { edge: 0 }.apply(&mut state, DEFAULT_BATCH_SIZE).unwrap();
        Operation::Filter { edge: 1 }.apply(&mut state, DEFAULT_BATCH_SIZE).unwrap();

        let report = Operation::Reduce {
            edge: 2,
            direction: Direction::Forward,
        }
        .apply(&mut state, DEFAULT_BATCH_SIZE)
        .unwrap();
        assert_eq!(report.rows_out, 1);

        let id = state.node_of("b").unwrap();
        assert_eq!(
            state.node(id).unwrap().rows,
            Some(vec![vec![Value::from("a1"), Value::from("b2")]])
        );
    }

    #[test]
    fn test_edge_applied_once() {
        let (mut state, _) = state_for(&["a", "b"], vec![Filter::values("a", ["a1"])]);
        Operation::Filter { edge: 0 }.apply(&mut state, DEFAULT_BATCH_SIZE).unwrap();
        let err = Operation::Filter { edge: 0 }
            .apply(&mut state, DEFAULT_BATCH_SIZE)
            .unwrap_err();
        assert!(matches!(err, QueryError::NoProgress { .. }));
    }

    #[test]
    fn test_tie_prefers_lower_cost() {
        let better = Candidate {
            operation: Operation::Filter { edge: 3 },
            utility: -1.0,
            cost: 1.0,
        };
        let worse = Candidate {
            operation: Operation::Filter { edge: 1 },
            utility: -1.0,
            cost: 2.0,
        };
        assert!(better.beats(&worse));
        assert!(!worse.beats(&better));
        assert!(!better.beats(&better));
    }
}
