//! Routing: find the cheapest tree of mappings connecting a set of concepts.
//!
//! Concepts are vertices and mappings are undirected edges weighted by the
//! cheaper of their two directions. The router computes a minimum spanning
//! forest (Kruskal, ties broken by registration order) and then strips
//! leaves that are not required, leaving a Steiner-tree approximation that
//! connects exactly what the query needs. A final pass swaps a chain of tree
//! mappings for a single mapping between its ends whenever that costs no
//! more and saves hops. Directions are resolved later, during execution.

use crate::model::Model;
use crate::source::Mapping;
use indexmap::{IndexMap, IndexSet};
use std::fmt;
use tracing::debug;

/// Errors raised while routing.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RouteError {
    /// The required concepts are not all connected by mappings.
    #[error("no route connects {concepts:?} (unreachable: {unreachable:?})")]
    NoRoute {
        concepts: Vec<String>,
        unreachable: Vec<String>,
    },

    #[error("unknown concept: {0}")]
    UnknownConcept(String),
}

/// A tree of mappings connecting the concepts of a query.
#[derive(Debug, Clone, Default)]
pub struct Route {
    mappings: Vec<Mapping>,
    concepts: IndexSet<String>,
}

impl Route {
    /// Mappings in registration order.
    pub fn mappings(&self) -> &[Mapping] {
        &self.mappings
    }

    /// Every concept touched by the route: required concepts first.
    pub fn concepts(&self) -> &IndexSet<String> {
        &self.concepts
    }

    /// Total weight of the route.
    pub fn cost(&self) -> f64 {
        self.mappings.iter().map(Mapping::weight).sum()
    }

    pub fn hops(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.mappings.is_empty() {
            return write!(f, "(no mappings)");
        }
        for (i, m) in self.mappings.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}-{} ({})", m.a.concept, m.b.concept, m.weight())?;
        }
        Ok(())
    }
}

/// Disjoint sets over vertex indices.
struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    /// Returns false when both were already in the same set.
    fn union(&mut self, a: usize, b: usize) -> bool {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return false;
        }
        self.parent[rb] = ra;
        true
    }
}

/// Finds routes through a model's mappings.
pub struct Router<'a> {
    model: &'a Model,
}

impl<'a> Router<'a> {
    pub fn new(model: &'a Model) -> Self {
        Self { model }
    }

    /// Minimum-cost route connecting every goal and filter concept.
    pub fn find_route<G, F>(&self, goals: G, filters: F) -> Result<Route, RouteError>
    where
        G: IntoIterator,
        G::Item: AsRef<str>,
        F: IntoIterator,
        F::Item: AsRef<str>,
    {
        let mut required = IndexSet::new();
        for concept in goals
            .into_iter()
            .map(|c| c.as_ref().to_string())
            .chain(filters.into_iter().map(|c| c.as_ref().to_string()))
        {
            if self.model.concept(&concept).is_none() {
                return Err(RouteError::UnknownConcept(concept));
            }
            required.insert(concept);
        }

        if required.len() <= 1 {
            return Ok(Route {
                mappings: Vec::new(),
                concepts: required,
            });
        }

        let (vertices, mut uf, tree) = self.spanning_forest();

        let index = |c: &String| vertices.get_index_of(c.as_str()).unwrap_or(usize::MAX);
        let root = uf.find(index(&required[0]));
        let unreachable: Vec<String> = required
            .iter()
            .filter(|c| uf.find(index(c)) != root)
            .cloned()
            .collect();
        if !unreachable.is_empty() {
            return Err(RouteError::NoRoute {
                concepts: required.into_iter().collect(),
                unreachable,
            });
        }

        let kept = prune_leaves(self.model, tree, &required);
        let kept = shorten(self.model, kept, &required);

        let mut mappings: Vec<Mapping> = kept
            .into_iter()
            .filter_map(|i| self.model.mappings().get(i).cloned())
            .collect();
        mappings.sort_by_key(|m| m.id);

        let mut concepts = required;
        for m in &mappings {
            concepts.insert(m.a.concept.clone());
            concepts.insert(m.b.concept.clone());
        }

        let route = Route { mappings, concepts };
        debug!(
            concepts = ?route.concepts,
            hops = route.hops(),
            cost = route.cost(),
            "route found"
        );
        Ok(route)
    }

    /// Concepts reachable from `concept` through any chain of mappings.
    pub fn connected(&self, concept: &str) -> Vec<String> {
        let (vertices, mut uf, _) = self.spanning_forest();
        let Some(start) = vertices.get_index_of(concept) else {
            return Vec::new();
        };
        let root = uf.find(start);
        (0..vertices.len())
            .filter(|&i| i != start && uf.find(i) == root)
            .filter_map(|i| vertices.get_index(i).map(|c| c.to_string()))
            .collect()
    }

    /// Kruskal over all mappings. Returns the vertex index, the final
    /// union-find and the indices of the spanning-forest mappings.
    fn spanning_forest(&self) -> (IndexSet<&'a str>, UnionFind, Vec<usize>) {
        let vertices: IndexSet<&str> = self.model.concepts().map(|c| c.name.as_str()).collect();
        let mut uf = UnionFind::new(vertices.len());

        let mut order: Vec<usize> = (0..self.model.mappings().len()).collect();
        let mappings = self.model.mappings();
        // stable sort keeps registration order among equal weights
        order.sort_by(|&x, &y| mappings[x].weight().total_cmp(&mappings[y].weight()));

        let mut tree = Vec::new();
        for i in order {
            let m = &mappings[i];
            let (Some(a), Some(b)) = (
                vertices.get_index_of(m.a.concept.as_str()),
                vertices.get_index_of(m.b.concept.as_str()),
            ) else {
                continue;
            };
            if uf.union(a, b) {
                tree.push(i);
            }
        }
        (vertices, uf, tree)
    }
}

/// Repeatedly drop tree edges hanging off a non-required leaf.
fn prune_leaves(model: &Model, mut tree: Vec<usize>, required: &IndexSet<String>) -> Vec<usize> {
    let mappings = model.mappings();
    loop {
        let mut degree: IndexMap<&str, usize> = IndexMap::new();
        for &i in &tree {
            *degree.entry(mappings[i].a.concept.as_str()).or_default() += 1;
            *degree.entry(mappings[i].b.concept.as_str()).or_default() += 1;
        }
        let is_loose = |c: &str| degree.get(c) == Some(&1) && !required.contains(c);

        let before = tree.len();
        tree.retain(|&i| !is_loose(&mappings[i].a.concept) && !is_loose(&mappings[i].b.concept));
        if tree.len() == before {
            return tree;
        }
    }
}

/// Relative tolerance when comparing route costs.
const COST_EPSILON: f64 = 1e-9;

/// Total weight and hop count of a set of mappings.
fn measure(mappings: &[Mapping], tree: &[usize]) -> (f64, usize) {
    (tree.iter().map(|&i| mappings[i].weight()).sum(), tree.len())
}

/// Lower cost wins; equal cost goes to fewer hops.
fn is_better((cost, hops): (f64, usize), (best_cost, best_hops): (f64, usize)) -> bool {
    let tolerance = COST_EPSILON * best_cost.abs().max(1.0);
    if cost < best_cost - tolerance {
        return true;
    }
    (cost - best_cost).abs() <= tolerance && hops < best_hops
}

/// Tree mappings on the path between two concepts, if the tree joins them.
fn tree_path(mappings: &[Mapping], tree: &[usize], from: &str, to: &str) -> Option<Vec<usize>> {
    // breadth-first, remembering the mapping that reached each concept
    let mut reached: IndexMap<&str, Option<usize>> = IndexMap::new();
    reached.insert(from, None);
    let mut next = 0;
    while let Some((&concept, _)) = reached.get_index(next) {
        next += 1;
        if concept == to {
            break;
        }
        for &i in tree {
            let m = &mappings[i];
            let other = if m.a.concept == concept {
                m.b.concept.as_str()
            } else if m.b.concept == concept {
                m.a.concept.as_str()
            } else {
                continue;
            };
            if !reached.contains_key(other) {
                reached.insert(other, Some(i));
            }
        }
    }

    let mut path = Vec::new();
    let mut concept = to;
    loop {
        match reached.get(concept)? {
            None => return Some(path),
            Some(i) => {
                let m = &mappings[*i];
                path.push(*i);
                concept = if m.a.concept == concept {
                    m.b.concept.as_str()
                } else {
                    m.a.concept.as_str()
                };
            }
        }
    }
}

/// Whether the mappings join every required concept.
fn spans(mappings: &[Mapping], tree: &[usize], required: &IndexSet<String>) -> bool {
    let mut vertices: IndexSet<&str> = required.iter().map(String::as_str).collect();
    for &i in tree {
        vertices.insert(mappings[i].a.concept.as_str());
        vertices.insert(mappings[i].b.concept.as_str());
    }
    let mut uf = UnionFind::new(vertices.len());
    for &i in tree {
        if let (Some(a), Some(b)) = (
            vertices.get_index_of(mappings[i].a.concept.as_str()),
            vertices.get_index_of(mappings[i].b.concept.as_str()),
        ) {
            uf.union(a, b);
        }
    }
    let root = uf.find(0);
    (1..required.len()).all(|i| uf.find(i) == root)
}

/// Replace tree paths by single mappings while that lowers the cost or
/// keeps it and saves hops. Candidates are tried in registration order.
fn shorten(model: &Model, mut tree: Vec<usize>, required: &IndexSet<String>) -> Vec<usize> {
    let mappings = model.mappings();
    loop {
        let current = measure(mappings, &tree);
        let improved = (0..mappings.len())
            .filter(|i| !tree.contains(i))
            .find_map(|i| {
                let m = &mappings[i];
                let path = tree_path(mappings, &tree, &m.a.concept, &m.b.concept)?;
                if path.len() < 2 {
                    return None;
                }
                let mut candidate: Vec<usize> =
                    tree.iter().copied().filter(|t| !path.contains(t)).collect();
                candidate.push(i);
                let candidate = prune_leaves(model, candidate, required);
                (spans(mappings, &candidate, required)
                    && is_better(measure(mappings, &candidate), current))
                .then_some(candidate)
            });
        match improved {
            Some(candidate) => tree = candidate,
            None => return tree,
        }
    }
}
