//! In-memory fixtures shared by the unit and integration tests.

use crate::model::{Model, ModelError};
use crate::source::{DataSource, Field, FieldLocator, Lookup, MappingId, SourceError, Translation};
use crate::table::Table;
use crate::value::{Value, ValueType};
use indexmap::{IndexMap, IndexSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Two-column tables held in memory, counting lookup calls.
#[derive(Default)]
pub struct PairSource {
    name: String,
    tables: IndexMap<String, Vec<(Value, Value)>>,
    columns: IndexMap<String, (String, String)>,
    /// Tables whose lookups always come back empty.
    broken: IndexSet<String>,
    /// Tables whose lookups and scans fail.
    failing: IndexSet<String>,
    scannable: bool,
    lookups: AtomicUsize,
}

impl PairSource {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            scannable: true,
            ..Default::default()
        }
    }

    pub fn table<A: Into<Value>, B: Into<Value>>(
        mut self,
        name: &str,
        columns: (&str, &str),
        rows: impl IntoIterator<Item = (A, B)>,
    ) -> Self {
        self.tables.insert(
            name.to_string(),
            rows.into_iter().map(|(a, b)| (a.into(), b.into())).collect(),
        );
        self.columns
            .insert(name.to_string(), (columns.0.to_string(), columns.1.to_string()));
        self
    }

    /// Make every lookup in `table` return nothing.
    pub fn broken(mut self, table: &str) -> Self {
        self.broken.insert(table.to_string());
        self
    }

    /// Make every lookup and scan touching `table` fail.
    pub fn failing(mut self, table: &str) -> Self {
        self.failing.insert(table.to_string());
        self
    }

    /// Refuse to enumerate any field.
    pub fn unscannable(mut self) -> Self {
        self.scannable = false;
        self
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

impl DataSource for PairSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookup(&self, lookup: &Lookup<'_>, values: &[Value]) -> Result<Translation, SourceError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(lookup.table) {
            return Err(SourceError::Unavailable(format!("{} is offline", lookup.table)));
        }
        let mut out = Translation::new();
        if self.broken.contains(lookup.table) {
            return Ok(out);
        }
        let (Some(rows), Some((left, _))) =
            (self.tables.get(lookup.table), self.columns.get(lookup.table))
        else {
            return Err(SourceError::Failed(format!("no table {}", lookup.table)));
        };
        let forward = &lookup.from.locator.column == left;
        let wanted: IndexSet<&Value> = values.iter().collect();
        for (a, b) in rows {
            let (from, to) = if forward { (a, b) } else { (b, a) };
            if wanted.contains(from) {
                out.entry(from.clone()).or_default().insert(to.clone());
            }
        }
        Ok(out)
    }

    fn scan(&self, field: &Field) -> Result<Option<Vec<Value>>, SourceError> {
        if !self.scannable {
            return Ok(None);
        }
        let mut values = IndexSet::new();
        for table in &field.locator.tables {
            if self.failing.contains(table) {
                return Err(SourceError::Unavailable(format!("{table} is offline")));
            }
            let (Some(rows), Some((left, _))) = (self.tables.get(table), self.columns.get(table))
            else {
                continue;
            };
            let forward = &field.locator.column == left;
            for (a, b) in rows {
                values.insert(if forward { a.clone() } else { b.clone() });
            }
        }
        Ok(Some(values.into_iter().collect()))
    }
}

/// Register the fields of `table` and a symmetric mapping between them.
pub fn link(
    model: &mut Model,
    source: &str,
    table: &str,
    a: (&str, &str),
    b: (&str, &str),
    cost: f64,
) -> Result<MappingId, ModelError> {
    let fa = model.register_field(source, a.0, FieldLocator::column(table, a.1))?;
    let fb = model.register_field(source, b.0, FieldLocator::column(table, b.1))?;
    model.register_symmetric_mapping(fa, fb, cost)
}

/// A model holding `source` and identifier concepts named `concepts`.
pub fn model_with(
    source: PairSource,
    concepts: &[&str],
) -> Result<(Model, Arc<PairSource>), ModelError> {
    let source = Arc::new(source);
    let mut model = Model::new();
    model.register_datasource(source.clone())?;
    for concept in concepts {
        model.register_concept(*concept, ValueType::Identifier)?;
    }
    Ok((model, source))
}

/// Concepts `a`, `b`, `c` with mappings a-b (1), b-c (1) and a-c (10).
///
/// a1 -> {b1, b2}, a3 -> b3, b1 -> c1, b2 -> c2, b3 -> c3; a-c holds a1 -> c9.
pub fn triangle() -> Result<(Model, Arc<PairSource>), ModelError> {
    let source = PairSource::new("db")
        .table("ab", ("a", "b"), [("a1", "b1"), ("a1", "b2"), ("a3", "b3")])
        .table("bc", ("b", "c"), [("b1", "c1"), ("b2", "c2"), ("b3", "c3")])
        .table("ac", ("a", "c"), [("a1", "c9")]);
    let (mut model, source) = model_with(source, &["a", "b", "c"])?;
    link(&mut model, "db", "ab", ("a", "a"), ("b", "b"), 1.0)?;
    link(&mut model, "db", "bc", ("b", "b"), ("c", "c"), 1.0)?;
    link(&mut model, "db", "ac", ("a", "a"), ("c", "c"), 10.0)?;
    Ok((model, source))
}

/// Every cell of `table` in display form.
pub fn strings(table: &Table) -> Vec<Vec<String>> {
    table
        .rows()
        .iter()
        .map(|r| r.iter().map(ToString::to_string).collect())
        .collect()
}
