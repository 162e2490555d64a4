//! The query engine: route, reduce, extract, postprocess.
//!
//! Every call builds a fresh [`ExecutionState`], runs the reduction loop
//! to a solution and hands the extracted table to the postprocessor. The
//! model is only ever read.

use crate::error::QueryError;
use crate::model::Model;
use crate::operation::OperationsFactory;
use crate::postprocess;
use crate::profile::ProfileEntry;
use crate::query::{Filter, ListQuery, SortSpec, TableQuery};
use crate::router::{Route, Router};
use crate::source::{DEFAULT_BATCH_SIZE, Direction};
use crate::state::{Edge, ExecutionState, Solution};
use crate::table::{PivotTable, Table};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Engine settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    /// Distinct values per data source lookup.
    pub batch_size: usize,
    /// Record a [`ProfileEntry`] per call.
    pub profile: bool,
    /// Threads used by `get_lists` (rayon default when unset).
    pub parallelism: Option<usize>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            profile: false,
            parallelism: None,
        }
    }
}

impl EngineOptions {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_profile(mut self, profile: bool) -> Self {
        self.profile = profile;
        self
    }

    pub fn with_parallelism(mut self, threads: usize) -> Self {
        self.parallelism = Some(threads);
        self
    }
}

/// Result of routing and reducing, before postprocessing.
struct Extracted {
    table: Table,
    steps: usize,
    route: Duration,
    reduce: Duration,
}

/// Answers list and pivot queries over a model.
pub struct QueryEngine {
    model: Arc<Model>,
    options: EngineOptions,
    profile: Mutex<Vec<ProfileEntry>>,
}

impl QueryEngine {
    pub fn new(model: Arc<Model>) -> Self {
        Self::with_options(model, EngineOptions::default())
    }

    pub fn with_options(model: Arc<Model>, options: EngineOptions) -> Self {
        Self {
            model,
            options,
            profile: Mutex::new(Vec::new()),
        }
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// The route a query over these concepts would take.
    pub fn route(&self, concepts: &[String], filters: &[Filter]) -> Result<Route, QueryError> {
        for concept in concepts {
            self.model.require_concept(concept)?;
        }
        let filter_concepts: Vec<&str> = filters.iter().map(Filter::concept).collect();
        Ok(Router::new(&self.model).find_route(concepts, filter_concepts)?)
    }

    /// Run a list query.
    pub fn get_list(&self, query: &ListQuery) -> Result<Table, QueryError> {
        let extracted = self.extract(query)?;
        let post_started = Instant::now();

        let Extracted {
            mut table,
            steps,
            route,
            reduce,
        } = extracted;
        if query.distinct {
            postprocess::distinct(table.rows_mut());
        }
        postprocess::sort(&mut table, &query.sort)?;
        let columns = table.columns().to_vec();
        let rows = postprocess::window(table.into_rows(), query.offset, query.limit)
            .into_iter()
            .map(|row| {
                row.iter()
                    .zip(&columns)
                    .map(|(value, concept)| self.model.deserialize(concept, value))
                    .collect()
            })
            .collect();
        let table = Table::from_rows(columns, rows);

        let post = post_started.elapsed();
        info!(
            concepts = ?query.concepts,
            rows = table.len(),
            steps,
            route_ms = route.as_secs_f64() * 1000.0,
            reduce_ms = reduce.as_secs_f64() * 1000.0,
            post_ms = post.as_secs_f64() * 1000.0,
            "list query finished"
        );
        self.record(query, table.len(), steps, route, reduce, post);
        Ok(table)
    }

    /// Positional form of [`get_list`](Self::get_list).
    pub fn list(
        &self,
        concepts: &[&str],
        filters: Vec<Filter>,
        sort: Vec<SortSpec>,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> Result<Table, QueryError> {
        let query = ListQuery {
            concepts: concepts.iter().map(|c| c.to_string()).collect(),
            filters,
            sort,
            limit,
            offset: offset.unwrap_or(0),
            distinct: false,
        };
        self.get_list(&query)
    }

    /// Run a pivot query: list the union of all referenced concepts, then
    /// group and aggregate.
    pub fn get_table(&self, query: &TableQuery) -> Result<PivotTable, QueryError> {
        let list = query.to_list_query();
        let extracted = self.extract(&list)?;
        let post_started = Instant::now();

        let model = &self.model;
        let pivot = postprocess::pivot(&extracted.table, query, &|concept: &str, value: &Value| {
            model.deserialize(concept, value)
        })?;

        let post = post_started.elapsed();
        info!(
            rows = ?query.rows,
            columns = ?query.columns,
            cells = pivot.cell_count(),
            steps = extracted.steps,
            "table query finished"
        );
        self.record(
            &list,
            pivot.cell_count(),
            extracted.steps,
            extracted.route,
            extracted.reduce,
            post,
        );
        Ok(pivot)
    }

    /// Run independent list queries concurrently. Results come back in
    /// query order.
    #[cfg(feature = "parallel")]
    pub fn get_lists(&self, queries: &[ListQuery]) -> Vec<Result<Table, QueryError>> {
        use rayon::prelude::*;

        let pool = self.options.parallelism.and_then(|threads| {
            rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build()
                .ok()
        });
        let run = || -> Vec<Result<Table, QueryError>> {
            queries.par_iter().map(|q| self.get_list(q)).collect()
        };
        match pool {
            Some(pool) => pool.install(run),
            None => run(),
        }
    }

    /// Run independent list queries one after the other. Results come back
    /// in query order.
    #[cfg(not(feature = "parallel"))]
    pub fn get_lists(&self, queries: &[ListQuery]) -> Vec<Result<Table, QueryError>> {
        queries.iter().map(|q| self.get_list(q)).collect()
    }

    /// Profile entries recorded so far, oldest first.
    pub fn profile(&self) -> Vec<ProfileEntry> {
        self.profile
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    pub fn clear_profile(&self) {
        if let Ok(mut entries) = self.profile.lock() {
            entries.clear();
        }
    }

    fn record(
        &self,
        query: &ListQuery,
        rows: usize,
        steps: usize,
        route: Duration,
        reduce: Duration,
        post: Duration,
    ) {
        if !self.options.profile {
            return;
        }
        let entry = ProfileEntry {
            concepts: query.concepts.clone(),
            filters: query.filters.clone(),
            sort: query.sort.clone(),
            limit: query.limit,
            offset: query.offset,
            rows,
            steps,
            route,
            reduce,
            post,
        };
        if let Ok(mut entries) = self.profile.lock() {
            entries.push(entry);
        }
    }

    /// Route and reduce a list query into its raw, projected table.
    fn extract(&self, query: &ListQuery) -> Result<Extracted, QueryError> {
        let started = Instant::now();
        let filters = self.coerce_filters(&query.filters)?;
        let route = self.route(&query.concepts, &filters)?;
        let routed = Instant::now();

        let (table, steps) = if query.concepts.is_empty() {
            (Table::new(Vec::<String>::new()), 0)
        } else {
            self.reduce(&route, &query.concepts, filters)?
        };

        Ok(Extracted {
            table,
            steps,
            route: routed - started,
            reduce: routed.elapsed(),
        })
    }

    /// Convert filter values to their concept's declared type.
    fn coerce_filters(&self, filters: &[Filter]) -> Result<Vec<Filter>, QueryError> {
        filters
            .iter()
            .map(|filter| -> Result<Filter, QueryError> {
                let declared = self.model.require_concept(filter.concept())?;
                let coerce = |value: &Value| {
                    declared
                        .value_type
                        .coerce(value.clone())
                        .map_err(|source| QueryError::Value {
                            concept: declared.name.clone(),
                            source,
                        })
                };
                Ok(match filter {
                    Filter::Values { concept, values } => Filter::Values {
                        concept: concept.clone(),
                        values: values.iter().map(coerce).collect::<Result<_, _>>()?,
                    },
                    Filter::Interval { concept, from, to } => Filter::Interval {
                        concept: concept.clone(),
                        from: from.as_ref().map(coerce).transpose()?,
                        to: to.as_ref().map(coerce).transpose()?,
                    },
                })
            })
            .collect()
    }

    /// The reduction loop.
    fn reduce(
        &self,
        route: &Route,
        goal: &[String],
        filters: Vec<Filter>,
    ) -> Result<(Table, usize), QueryError> {
        let mut state = ExecutionState::new(route, goal, filters);
        // every edge once, every node seeded at most once
        let max_steps = state.edges().len() + state.nodes().count();
        let mut signature = state.signature();

        loop {
            match state.solution() {
                Some(Solution::Empty) => {
                    debug!(step = state.steps(), "empty node, result is empty");
                    return Ok((Table::new(goal.iter().cloned()), state.steps()));
                }
                Some(Solution::Node(id)) => {
                    let table = project(&state, id, goal)?;
                    return Ok((table, state.steps()));
                }
                None => {}
            }

            if state.steps() >= max_steps {
                return Err(no_progress(&state));
            }

            match OperationsFactory::best(&state) {
                Some(candidate) => {
                    let edge = state
                        .edge(candidate.operation.edge())
                        .map(ToString::to_string)
                        .unwrap_or_default();
                    let report = candidate.operation.apply(&mut state, self.options.batch_size)?;
                    debug!(
                        step = state.steps(),
                        %edge,
                        operation = ?report.operation,
                        utility = candidate.utility,
                        rows_in = report.rows_in,
                        rows_out = report.rows_out,
                        "applied operation"
                    );
                }
                None => self.seed(&mut state)?,
            }

            state.advance();
            state.prune();

            let next = state.signature();
            if next == signature {
                return Err(no_progress(&state));
            }
            signature = next;
        }
    }

    /// Materialize one virtual node from a data source scan.
    ///
    /// Tries the endpoints of pending mappings, cheapest first, then the
    /// fields of virtual goal concepts.
    fn seed(&self, state: &mut ExecutionState) -> Result<(), QueryError> {
        let mut mappings: Vec<_> = state
            .pending()
            .iter()
            .filter_map(|&i| match state.edge(i) {
                Some(Edge::Mapping(m)) => Some(m.clone()),
                _ => None,
            })
            .collect();
        mappings.sort_by(|x, y| x.weight().total_cmp(&y.weight()));

        for mapping in &mappings {
            for direction in [Direction::Forward, Direction::Reverse] {
                if !mapping.supports(direction) {
                    continue;
                }
                let (from, _) = mapping.endpoints(direction);
                let Some(id) = state.node_of(&from.concept) else {
                    continue;
                };
                if state.node(id).is_some_and(|n| n.is_materialized()) {
                    continue;
                }
                let scanned = mapping.scan(direction).map_err(|err| QueryError::Scan {
                    field: from.to_string(),
                    source: err,
                })?;
                if let Some(values) = scanned {
                    debug!(concept = %from.concept, field = %from, values = values.len(), "seeded by scan");
                    state.seed(id, values);
                    return Ok(());
                }
            }
        }

        let goal: Vec<String> = state.goal().iter().cloned().collect();
        for concept in &goal {
            let Some(id) = state.node_of(concept) else {
                continue;
            };
            if state.node(id).is_some_and(|n| n.is_materialized()) {
                continue;
            }
            for field in self.model.fields_for(concept) {
                let Some(source) = self.model.datasource(&field.datasource) else {
                    continue;
                };
                let scanned = source.scan(field).map_err(|err| QueryError::Scan {
                    field: field.to_string(),
                    source: err,
                })?;
                if let Some(values) = scanned {
                    debug!(%concept, %field, values = values.len(), "seeded by scan");
                    let values = values.iter().map(|v| field.from_source(v)).collect();
                    state.seed(id, values);
                    return Ok(());
                }
            }
        }

        if state.has_data() {
            Err(no_progress(state))
        } else {
            let concepts = state
                .nodes()
                .filter(|(_, n)| !n.is_filter())
                .flat_map(|(_, n)| n.columns.clone())
                .collect();
            Err(QueryError::Unbounded { concepts })
        }
    }
}

fn no_progress(state: &ExecutionState) -> QueryError {
    QueryError::NoProgress {
        step: state.steps(),
        pending: state.pending_names(),
    }
}

/// Rows of the solution node, columns in goal order.
fn project(
    state: &ExecutionState,
    id: crate::state::NodeId,
    goal: &[String],
) -> Result<Table, QueryError> {
    let node = state.node(id).ok_or_else(|| no_progress(state))?;
    let indices: Vec<usize> = goal
        .iter()
        .map(|c| node.column_index(c).ok_or_else(|| no_progress(state)))
        .collect::<Result<_, _>>()?;
    let rows = node
        .rows
        .iter()
        .flatten()
        .map(|row| {
            indices
                .iter()
                .map(|&i| row.get(i).cloned().unwrap_or(Value::Null))
                .collect()
        })
        .collect();
    Ok(Table::from_rows(goal.to_vec(), rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{Aggregate, AggregateFn};
    use crate::testing::{PairSource, link, model_with, strings, triangle};
    use crate::value::ValueType;

    fn engine() -> (QueryEngine, Arc<PairSource>) {
        let (model, source) = triangle().unwrap();
        (QueryEngine::new(Arc::new(model)), source)
    }

    #[test]
    fn test_inner_join() {
        let (engine, _) = engine();
        let table = engine
            .get_list(&ListQuery::new(["a", "b"]).filter(Filter::values("a", ["a1", "a2"])))
            .unwrap();
        assert_eq!(table.columns(), &["a", "b"]);
        assert_eq!(strings(&table), vec![vec!["a1", "b1"], vec!["a1", "b2"]]);
    }

    #[test]
    fn test_filter_propagation() {
        let (engine, _) = engine();
        let table = engine
            .get_list(
                &ListQuery::new(["a", "b"])
                    .filter(Filter::values("a", ["a1", "a2"]))
                    .filter(Filter::values("b", ["b1"])),
            )
            .unwrap();
        assert_eq!(strings(&table), vec![vec!["a1", "b1"]]);
    }

    #[test]
    fn test_route_through_intermediate() {
        let (engine, _) = engine();
        let table = engine
            .get_list(&ListQuery::new(["c", "a"]).filter(Filter::values("a", ["a1"])))
            .unwrap();
        // via b, not the direct a-c mapping (which would give c9)
        assert_eq!(strings(&table), vec![vec!["c1", "a1"], vec!["c2", "a1"]]);
    }

    #[test]
    fn test_unfiltered_query_scans() {
        let (engine, _) = engine();
        let table = engine.get_list(&ListQuery::new(["a", "b"])).unwrap();
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_single_concept() {
        let (engine, _) = engine();
        let table = engine
            .get_list(&ListQuery::new(["b"]).filter(Filter::values("b", ["b2", "b1"])))
            .unwrap();
        assert_eq!(strings(&table), vec![vec!["b2"], vec!["b1"]]);

        let table = engine
            .get_list(&ListQuery::new(["c"]).sort(SortSpec::desc("c")))
            .unwrap();
        // scanned from the first field of c
        assert_eq!(strings(&table), vec![vec!["c3"], vec!["c2"], vec!["c1"]]);
    }

    #[test]
    fn test_interval_filter() {
        let (engine, _) = engine();
        let table = engine
            .get_list(
                &ListQuery::new(["a", "c"])
                    .filter(Filter::interval("c", None, Some(Value::from("c1"))))
                    .filter(Filter::values("a", ["a1"])),
            )
            .unwrap();
        assert_eq!(strings(&table), vec![vec!["a1", "c1"]]);
    }

    #[test]
    fn test_distinct_sort_window() {
        let (engine, _) = engine();
        let query = ListQuery::new(["a"])
            .filter(Filter::values("b", ["b1", "b2", "b3"]))
            .sort(SortSpec::desc("a"));
        let table = engine.get_list(&query).unwrap();
        assert_eq!(strings(&table), vec![vec!["a3"], vec!["a1"], vec!["a1"]]);

        let table = engine.get_list(&query.clone().distinct(true)).unwrap();
        assert_eq!(strings(&table), vec![vec!["a3"], vec!["a1"]]);

        let table = engine.get_list(&query.offset(1).limit(1)).unwrap();
        assert_eq!(strings(&table), vec![vec!["a1"]]);
    }

    #[test]
    fn test_positional_list() {
        let (engine, _) = engine();
        let table = engine
            .list(
                &["a", "b"],
                vec![Filter::values("a", ["a1"])],
                vec![SortSpec::desc("b")],
                Some(1),
                None,
            )
            .unwrap();
        assert_eq!(strings(&table), vec![vec!["a1", "b2"]]);
    }

    #[test]
    fn test_errors_have_kinds() {
        let (engine, _) = engine();

        let err = engine.get_list(&ListQuery::new(["nope"])).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);

        let err = engine
            .get_list(&ListQuery::new(["a"]).sort(SortSpec::asc("b")))
            .unwrap_err();
        assert!(matches!(err, QueryError::UnknownColumn(_)));
    }

    #[test]
    fn test_unbounded_without_scan() {
        let source = PairSource::new("db").unscannable();
        let (mut model, _) = model_with(source, &["a", "b"]).unwrap();
        link(&mut model, "db", "ab", ("a", "a"), ("b", "b"), 1.0).unwrap();

        let engine = QueryEngine::new(Arc::new(model));
        let err = engine.get_list(&ListQuery::new(["a", "b"])).unwrap_err();
        assert!(matches!(err, QueryError::Unbounded { .. }));
    }

    #[test]
    fn test_filter_values_coerced() {
        let source = PairSource::new("db").table(
            "t",
            ("id", "score"),
            [
                (Value::Int(1), Value::Float(2.0)),
                (Value::Int(2), Value::Float(3.0)),
            ],
        );
        let (mut model, _) = model_with(source, &["id"]).unwrap();
        model.register_concept("score", ValueType::Float).unwrap();
        link(&mut model, "db", "t", ("id", "id"), ("score", "score"), 1.0).unwrap();

        let engine = QueryEngine::new(Arc::new(model));
        // integer filter values match float data once coerced
        let table = engine
            .get_list(&ListQuery::new(["id"]).filter(Filter::values("score", [3])))
            .unwrap();
        assert_eq!(strings(&table), vec![vec!["2"]]);

        let err = engine
            .get_list(&ListQuery::new(["id"]).filter(Filter::values("score", ["high"])))
            .unwrap_err();
        assert!(matches!(err, QueryError::Value { .. }));
    }

    #[test]
    fn test_get_table() {
        let (engine, _) = engine();
        let query = TableQuery::new(["a"])
            .columns(["b"])
            .cell(Aggregate::count())
            .filter(Filter::values("a", ["a1", "a3"]));
        let pivot = engine.get_table(&query).unwrap();
        assert_eq!(pivot.row_keys().len(), 2);
        assert_eq!(pivot.column_keys().len(), 3);
        assert_eq!(
            pivot.value(&[Value::from("a1")], &[Value::from("b2")]),
            Some(&Value::Int(1))
        );
        assert_eq!(pivot.value(&[Value::from("a3")], &[Value::from("b1")]), None);

        let query = TableQuery::new(["a"]).cell(Aggregate::of("b", AggregateFn::CountDistinct));
        let pivot = engine.get_table(&query).unwrap();
        assert_eq!(pivot.value(&[Value::from("a1")], &[]), Some(&Value::Int(2)));
    }

    #[test]
    fn test_profile_recorded() {
        let (model, _) = triangle().unwrap();
        let engine = QueryEngine::with_options(
            Arc::new(model),
            EngineOptions::default().with_profile(true),
        );
        engine
            .get_list(&ListQuery::new(["a", "b"]).filter(Filter::values("a", ["a1"])).limit(1))
            .unwrap();

        let profile = engine.profile();
        assert_eq!(profile.len(), 1);
        assert_eq!(profile[0].concepts, vec!["a", "b"]);
        assert_eq!(profile[0].rows, 1);
        assert_eq!(profile[0].limit, Some(1));
        assert!(profile[0].steps >= 2);

        engine.clear_profile();
        assert!(engine.profile().is_empty());
    }

    #[test]
    fn test_get_lists_in_order() {
        let (engine, _) = engine();
        let results = engine.get_lists(&[
            ListQuery::new(["a"]).filter(Filter::values("a", ["a1"])),
            ListQuery::new(["nope"]),
            ListQuery::new(["b"]).filter(Filter::values("b", ["b3"])),
        ]);
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap().len(), 1);
        assert!(results[1].is_err());
        assert_eq!(
            results[2].as_ref().unwrap().value(0, "b"),
            Some(&Value::from("b3"))
        );
    }
}
