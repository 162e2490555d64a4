//! Execution state: nodes of partial results and the edges joining them.
//!
//! Every concept of the route starts as its own virtual node. Every filter
//! becomes a filter node hanging off its concept by a zero-cost edge.
//! Operations (see `operation`) consume pending edges, merging and
//! shrinking nodes until a single node holds all goal concepts.

use crate::query::Filter;
use crate::router::Route;
use crate::source::Mapping;
use crate::table::Row;
use crate::value::Value;
use indexmap::{IndexMap, IndexSet};
use std::fmt;
use tracing::{debug, warn};

/// Identifier of a node within one execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

/// A partial result: named columns and, once materialized, rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub columns: Vec<String>,
    /// `None` while virtual (nothing known yet).
    pub rows: Option<Vec<Row>>,
    /// The constraint a filter node stands for.
    pub filter: Option<Filter>,
}

impl Node {
    fn concept(concept: &str) -> Self {
        Self {
            columns: vec![concept.to_string()],
            rows: None,
            filter: None,
        }
    }

    fn for_filter(filter: Filter) -> Self {
        let rows = match &filter {
            Filter::Values { values, .. } => Some(
                values
                    .iter()
                    .collect::<IndexSet<_>>()
                    .into_iter()
                    .map(|v| vec![v.clone()])
                    .collect(),
            ),
            Filter::Interval { .. } => None,
        };
        Self {
            columns: vec![filter.concept().to_string()],
            rows,
            filter: Some(filter),
        }
    }

    pub fn is_filter(&self) -> bool {
        self.filter.is_some()
    }

    pub fn is_materialized(&self) -> bool {
        self.rows.is_some()
    }

    pub fn row_count(&self) -> Option<usize> {
        self.rows.as_ref().map(Vec::len)
    }

    pub fn column_index(&self, concept: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == concept)
    }

    /// Distinct values of one column, in first-seen order.
    pub fn distinct_values(&self, concept: &str) -> Vec<Value> {
        let (Some(index), Some(rows)) = (self.column_index(concept), &self.rows) else {
            return Vec::new();
        };
        rows.iter()
            .filter_map(|r| r.get(index))
            .collect::<IndexSet<_>>()
            .into_iter()
            .cloned()
            .collect()
    }

    /// Keep only the listed columns, in their current order.
    fn project(&mut self, keep: &[usize]) {
        self.columns = keep.iter().map(|&i| self.columns[i].clone()).collect();
        if let Some(rows) = &mut self.rows {
            for row in rows.iter_mut() {
                *row = keep.iter().filter_map(|&i| row.get(i).cloned()).collect();
            }
        }
    }
}

/// A link the execution still has to (or already did) apply.
#[derive(Debug, Clone)]
pub enum Edge {
    /// A route mapping between two concepts.
    Mapping(Mapping),
    /// Zero-cost link from a filter node to its concept.
    Filter { node: NodeId, concept: String },
}

impl Edge {
    /// Concepts this edge touches.
    pub fn concepts(&self) -> Vec<&str> {
        match self {
            Edge::Mapping(m) => vec![m.a.concept.as_str(), m.b.concept.as_str()],
            Edge::Filter { concept, .. } => vec![concept.as_str()],
        }
    }

    pub fn cost(&self) -> f64 {
        match self {
            Edge::Mapping(m) => m.weight(),
            Edge::Filter { .. } => 0.0,
        }
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Edge::Mapping(m) => write!(f, "{}-{}", m.a.concept, m.b.concept),
            Edge::Filter { concept, .. } => write!(f, "filter({concept})"),
        }
    }
}

/// Outcome of the solution check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Solution {
    /// This node covers every goal concept.
    Node(NodeId),
    /// Some materialized node is empty: the inner join is empty.
    Empty,
}

/// Node shape used to detect steps that changed nothing.
pub type Signature = Vec<(Vec<String>, Option<usize>, bool)>;

/// Mutable state of one query execution. Never shared across queries.
#[derive(Debug)]
pub struct ExecutionState {
    goal: IndexSet<String>,
    nodes: IndexMap<NodeId, Node>,
    edges: Vec<Edge>,
    pending: IndexSet<usize>,
    next_node: usize,
    steps: usize,
}

impl ExecutionState {
    /// Build the initial state for a route, goal concepts and filters.
    ///
    /// Filters are expected to be coerced to their concept types already.
    /// Several value filters on the same concept are intersected.
    pub fn new(route: &Route, goal: &[String], filters: Vec<Filter>) -> Self {
        let mut state = Self {
            goal: goal.iter().cloned().collect(),
            nodes: IndexMap::new(),
            edges: Vec::new(),
            pending: IndexSet::new(),
            next_node: 0,
            steps: 0,
        };

        for concept in route.concepts() {
            state.add_node(Node::concept(concept));
        }

        // filter edges first so equal utilities favour filters
        for filter in merge_value_filters(filters) {
            let concept = filter.concept().to_string();
            let node = state.add_node(Node::for_filter(filter));
            state.add_edge(Edge::Filter { node, concept });
        }
        for mapping in route.mappings() {
            state.add_edge(Edge::Mapping(mapping.clone()));
        }

        state
    }

    fn add_node(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.next_node);
        self.next_node += 1;
        self.nodes.insert(id, node);
        id
    }

    fn add_edge(&mut self, edge: Edge) {
        self.pending.insert(self.edges.len());
        self.edges.push(edge);
    }

    /// Number of steps (operations and seeds) taken so far.
    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn advance(&mut self) {
        self.steps += 1;
    }

    pub fn goal(&self) -> &IndexSet<String> {
        &self.goal
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn edge(&self, index: usize) -> Option<&Edge> {
        self.edges.get(index)
    }

    /// Indices of edges not applied yet, in insertion order.
    pub fn pending(&self) -> &IndexSet<usize> {
        &self.pending
    }

    pub fn pending_names(&self) -> Vec<String> {
        self.pending
            .iter()
            .filter_map(|&i| self.edges.get(i))
            .map(ToString::to_string)
            .collect()
    }

    /// Mark an edge applied. Edges are applied at most once.
    pub fn take_edge(&mut self, edge: usize) -> bool {
        self.pending.shift_remove(&edge)
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter().map(|(id, node)| (*id, node))
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    /// The live concept node holding a column for `concept`.
    pub fn node_of(&self, concept: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .find(|(_, n)| !n.is_filter() && n.column_index(concept).is_some())
            .map(|(id, _)| *id)
    }

    pub fn remove_node(&mut self, id: NodeId) -> Option<Node> {
        self.nodes.shift_remove(&id)
    }

    /// Replace two nodes with their merge, keeping the first one's place.
    pub fn replace_nodes(&mut self, keep: NodeId, drop: NodeId, merged: Node) {
        self.nodes.shift_remove(&drop);
        if let Some(slot) = self.nodes.get_mut(&keep) {
            *slot = merged;
        }
    }

    /// Materialize a virtual node with values of its single column.
    pub fn seed(&mut self, id: NodeId, values: Vec<Value>) {
        if let Some(node) = self.nodes.get_mut(&id) {
            let rows = values
                .into_iter()
                .collect::<IndexSet<_>>()
                .into_iter()
                .map(|v| vec![v])
                .collect();
            node.rows = Some(rows);
        }
    }

    /// Concepts still needed: goal concepts and endpoints of pending edges.
    fn needed(&self) -> IndexSet<&str> {
        let mut needed: IndexSet<&str> = self.goal.iter().map(String::as_str).collect();
        for &i in &self.pending {
            if let Some(edge) = self.edges.get(i) {
                needed.extend(edge.concepts());
            }
        }
        needed
    }

    /// Drop columns nobody needs anymore, and nodes left without columns.
    pub fn prune(&mut self) {
        let needed: IndexSet<String> = self.needed().into_iter().map(str::to_string).collect();

        let mut emptied = Vec::new();
        for (id, node) in self.nodes.iter_mut() {
            if node.is_filter() {
                continue;
            }
            let keep: Vec<usize> = node
                .columns
                .iter()
                .enumerate()
                .filter(|(_, c)| needed.contains(c.as_str()))
                .map(|(i, _)| i)
                .collect();
            if keep.len() == node.columns.len() {
                continue;
            }
            let dropped: Vec<&String> = node
                .columns
                .iter()
                .filter(|c| !needed.contains(c.as_str()))
                .collect();
            debug!(node = id.0, ?dropped, "pruning columns");
            node.project(&keep);
            if node.columns.is_empty() {
                emptied.push(*id);
            }
        }
        for id in emptied {
            self.nodes.shift_remove(&id);
        }
    }

    /// Check whether the state has reached a solution.
    pub fn solution(&self) -> Option<Solution> {
        let empty = self
            .nodes
            .values()
            .any(|n| !n.is_filter() && n.row_count() == Some(0));
        if empty {
            return Some(Solution::Empty);
        }
        if !self.pending.is_empty() {
            return None;
        }
        self.nodes
            .iter()
            .find(|(_, n)| {
                !n.is_filter()
                    && n.is_materialized()
                    && self.goal.iter().all(|g| n.column_index(g).is_some())
            })
            .map(|(id, _)| Solution::Node(*id))
    }

    pub fn signature(&self) -> Signature {
        self.nodes
            .values()
            .map(|n| (n.columns.clone(), n.row_count(), n.is_filter()))
            .collect()
    }

    /// Whether any concept node holds rows.
    pub fn has_data(&self) -> bool {
        self.nodes
            .values()
            .any(|n| !n.is_filter() && n.is_materialized())
    }
}

/// Intersect value filters that constrain the same concept.
fn merge_value_filters(filters: Vec<Filter>) -> Vec<Filter> {
    let mut merged: Vec<Filter> = Vec::with_capacity(filters.len());
    for filter in filters {
        let (concept, values) = match filter {
            Filter::Values { concept, values } => (concept, values),
            other => {
                merged.push(other);
                continue;
            }
        };
        let existing = merged.iter_mut().find_map(|f| match f {
            Filter::Values {
                concept: c,
                values: v,
            } if *c == concept => Some(v),
            _ => None,
        });
        match existing {
            Some(current) => {
                warn!(%concept, "multiple value filters on one concept; intersecting");
                current.retain(|v| values.contains(v));
            }
            None => merged.push(Filter::Values { concept, values }),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::Router;
    use crate::testing::triangle;

    fn goal(concepts: &[&str]) -> Vec<String> {
        concepts.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn test_initial_state() {
        let (model, _) = triangle().unwrap();
        let route = Router::new(&model).find_route(["a", "b"], ["b"]).unwrap();
        let state = ExecutionState::new(
            &route,
            &goal(&["a", "b"]),
            vec![Filter::values("b", ["b1", "b1"])],
        );

        // a, b and one filter node
        assert_eq!(state.nodes().count(), 3);
        assert_eq!(state.pending().len(), 2);
        assert!(matches!(state.edge(0), Some(Edge::Filter { .. })));
        assert!(!state.has_data());

        let (_, filter) = state.nodes().find(|(_, n)| n.is_filter()).unwrap();
        assert_eq!(filter.row_count(), Some(1));
        assert_eq!(state.solution(), None);
    }

    #[test]
    fn test_duplicate_value_filters_intersect() {
        let merged = merge_value_filters(vec![
            Filter::values("b", ["b1", "b2"]),
            Filter::between("a", 1, 2),
            Filter::values("b", ["b2", "b3"]),
        ]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0], Filter::values("b", ["b2"]));
    }

    #[test]
    fn test_prune_and_solution() {
        let (model, _) = triangle().unwrap();
        let route = Router::new(&model).find_route(["a"], ["b"]).unwrap();
        let mut state = ExecutionState::new(&route, &goal(&["a"]), Vec::new());

        let a = state.node_of("a").unwrap();
        let b = state.node_of("b").unwrap();
        state.take_edge(0);
        state.replace_nodes(
            a,
            b,
            Node {
                columns: goal(&["a", "b"]),
                rows: Some(vec![vec![Value::from("a1"), Value::from("b1")]]),
                filter: None,
            },
        );
        state.prune();

        let node = state.node(a).unwrap();
        assert_eq!(node.columns, goal(&["a"]));
        assert_eq!(node.rows, Some(vec![vec![Value::from("a1")]]));
        assert_eq!(state.solution(), Some(Solution::Node(a)));
    }

    #[test]
    fn test_empty_node_short_circuits() {
        let (model, _) = triangle().unwrap();
        let route = Router::new(&model).find_route(["a", "c"], [] as [&str; 0]).unwrap();
        let mut state = ExecutionState::new(&route, &goal(&["a", "c"]), Vec::new());
        let a = state.node_of("a").unwrap();
        state.seed(a, Vec::new());
        assert_eq!(state.solution(), Some(Solution::Empty));
    }

    #[test]
    fn test_signature_changes_on_seed() {
        let (model, _) = triangle().unwrap();
        let route = Router::new(&model).find_route(["a", "b"], [] as [&str; 0]).unwrap();
        let mut state = ExecutionState::new(&route, &goal(&["a", "b"]), Vec::new());
        let before = state.signature();
        let a = state.node_of("a").unwrap();
        state.seed(a, vec![Value::from("a1"), Value::from("a1")]);
        assert_ne!(state.signature(), before);
        assert_eq!(state.node(a).unwrap().row_count(), Some(1));
    }
}
