//! Relational data source held in memory.

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tabulator_core::{DataSource, Field, Lookup, SourceError, Translation, Value};
use tracing::debug;

/// A table: named columns and rows aligned to them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryTable {
    pub columns: Vec<String>,
    #[serde(default)]
    pub rows: Vec<Vec<Value>>,
}

impl MemoryTable {
    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn row<V: Into<Value>>(mut self, row: impl IntoIterator<Item = V>) -> Self {
        self.rows.push(row.into_iter().map(Into::into).collect());
        self
    }

    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }
}

/// Row positions by value, for one column of one table.
type ColumnIndex = IndexMap<Value, Vec<usize>>;

/// An in-memory relational source.
///
/// Each mapping's join key is a table name; a lookup reads the `from`
/// column of that table and returns the `to` column of every matching row.
pub struct MemorySource {
    name: String,
    tables: IndexMap<String, MemoryTable>,
    /// Presentation values per concept, used by `deserialize`.
    labels: IndexMap<String, IndexMap<Value, Value>>,
    indexes: Mutex<IndexMap<(String, String), Arc<ColumnIndex>>>,
    lookups: AtomicUsize,
}

impl MemorySource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tables: IndexMap::new(),
            labels: IndexMap::new(),
            indexes: Mutex::new(IndexMap::new()),
            lookups: AtomicUsize::new(0),
        }
    }

    /// Add a table (replacing one with the same name).
    pub fn with_table(mut self, name: impl Into<String>, table: MemoryTable) -> Self {
        self.insert_table(name, table);
        self
    }

    pub fn insert_table(&mut self, name: impl Into<String>, table: MemoryTable) {
        let name = name.into();
        self.lock_indexes().retain(|(t, _), _| t != &name);
        self.tables.insert(name, table);
    }

    /// Label a raw value of `concept` for presentation.
    pub fn with_label(
        mut self,
        concept: impl Into<String>,
        raw: impl Into<Value>,
        label: impl Into<Value>,
    ) -> Self {
        self.labels
            .entry(concept.into())
            .or_default()
            .insert(raw.into(), label.into());
        self
    }

    pub fn table(&self, name: &str) -> Option<&MemoryTable> {
        self.tables.get(name)
    }

    pub fn table_mut(&mut self, name: &str) -> Option<&mut MemoryTable> {
        self.indexes
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(t, _), _| t != name);
        self.tables.get_mut(name)
    }

    pub fn tables(&self) -> impl Iterator<Item = (&str, &MemoryTable)> {
        self.tables.iter().map(|(name, table)| (name.as_str(), table))
    }

    /// Number of `lookup` calls served so far.
    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::Relaxed)
    }

    fn lock_indexes(&self) -> MutexGuard<'_, IndexMap<(String, String), Arc<ColumnIndex>>> {
        self.indexes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The index of `column` in `table`, built on first use.
    fn index(&self, table: &str, column: usize) -> Option<Arc<ColumnIndex>> {
        let data = self.tables.get(table)?;
        let name = data.columns.get(column)?;
        let key = (table.to_string(), name.clone());

        if let Some(index) = self.lock_indexes().get(&key) {
            return Some(index.clone());
        }

        let mut index = ColumnIndex::new();
        for (position, row) in data.rows.iter().enumerate() {
            if let Some(value) = row.get(column) {
                index.entry(value.clone()).or_default().push(position);
            }
        }
        debug!(source = %self.name, table, column = %name, keys = index.len(), "built column index");

        let index = Arc::new(index);
        self.lock_indexes().insert(key, index.clone());
        Some(index)
    }

    fn resolve(&self, table: &str, column: &str) -> Result<(&MemoryTable, usize), SourceError> {
        let data = self
            .tables
            .get(table)
            .ok_or_else(|| SourceError::Failed(format!("{}: no table '{table}'", self.name)))?;
        let index = data.column_index(column).ok_or_else(|| {
            SourceError::Failed(format!("{}: table '{table}' has no column '{column}'", self.name))
        })?;
        Ok((data, index))
    }
}

impl DataSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookup(&self, lookup: &Lookup<'_>, values: &[Value]) -> Result<Translation, SourceError> {
        self.lookups.fetch_add(1, Ordering::Relaxed);

        let (data, from) = self.resolve(lookup.table, &lookup.from.locator.column)?;
        let (_, to) = self.resolve(lookup.table, &lookup.to.locator.column)?;
        let index = self
            .index(lookup.table, from)
            .ok_or_else(|| SourceError::Failed(format!("cannot index {}", lookup.table)))?;

        let mut out = Translation::new();
        for value in values {
            let Some(positions) = index.get(value) else {
                continue;
            };
            let targets = out.entry(value.clone()).or_insert_with(IndexSet::new);
            for &position in positions {
                if let Some(target) = data.rows.get(position).and_then(|row| row.get(to)) {
                    targets.insert(target.clone());
                }
            }
        }
        Ok(out)
    }

    fn deserialize(&self, concept: &str, raw: &Value) -> Option<Value> {
        self.labels.get(concept)?.get(raw).cloned()
    }

    fn scan(&self, field: &Field) -> Result<Option<Vec<Value>>, SourceError> {
        let mut values = IndexSet::new();
        for table in &field.locator.tables {
            let (data, column) = self.resolve(table, &field.locator.column)?;
            values.extend(data.rows.iter().filter_map(|row| row.get(column)).cloned());
        }
        Ok(Some(values.into_iter().collect()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabulator_core::{FieldLocator, ListQuery, Model, QueryEngine, ValueType};

    fn projects() -> MemorySource {
        MemorySource::new("news")
            .with_table(
                "articles",
                MemoryTable::new(["id", "project"])
                    .row(["a1", "p1"])
                    .row(["a2", "p1"])
                    .row(["a3", "p2"]),
            )
            .with_label("project", "p1", "Project One")
    }

    fn model(source: Arc<MemorySource>) -> Model {
        let mut model = Model::new();
        model.register_datasource(source).unwrap();
        model
            .register_concept("article", ValueType::Identifier)
            .unwrap();
        model
            .register_concept("project", ValueType::Identifier)
            .unwrap();
        let a = model
            .register_field("news", "article", FieldLocator::column("articles", "id"))
            .unwrap();
        let p = model
            .register_field("news", "project", FieldLocator::column("articles", "project"))
            .unwrap();
        model.register_symmetric_mapping(a, p, 1.0).unwrap();
        model
    }

    #[test]
    fn test_lookup_both_directions() {
        let source = Arc::new(projects());
        let model = model(source.clone());
        let mapping = &model.mappings()[0];

        let forward = source
            .lookup(
                &Lookup {
                    table: "articles",
                    from: &mapping.a,
                    to: &mapping.b,
                },
                &[Value::from("a1"), Value::from("a9")],
            )
            .unwrap();
        assert_eq!(forward.len(), 1);
        assert!(forward[&Value::from("a1")].contains(&Value::from("p1")));

        let reverse = source
            .lookup(
                &Lookup {
                    table: "articles",
                    from: &mapping.b,
                    to: &mapping.a,
                },
                &[Value::from("p1")],
            )
            .unwrap();
        let articles: Vec<_> = reverse[&Value::from("p1")].iter().cloned().collect();
        assert_eq!(articles, vec![Value::from("a1"), Value::from("a2")]);
        assert_eq!(source.lookup_count(), 2);
    }

    #[test]
    fn test_index_rebuilt_after_edit() {
        let mut source = projects();
        let key = ("articles".to_string(), "id".to_string());
        source.index("articles", 0).unwrap();
        assert!(source.lock_indexes().contains_key(&key));

        if let Some(table) = source.table_mut("articles") {
            table.rows.push(vec![Value::from("a4"), Value::from("p3")]);
        }
        assert!(!source.lock_indexes().contains_key(&key));
        let index = source.index("articles", 0).unwrap();
        assert_eq!(index.len(), 4);
    }

    #[test]
    fn test_missing_column_fails() {
        let source = projects();
        let err = source.resolve("articles", "title").unwrap_err();
        assert!(matches!(err, SourceError::Failed(_)));
        assert!(source.resolve("authors", "id").is_err());
    }

    #[test]
    fn test_batched_lookups_through_engine() {
        let mut table = MemoryTable::new(["id", "project"]);
        for i in 0..25 {
            table
                .rows
                .push(vec![Value::from(format!("a{i}")), Value::from(format!("p{}", i % 3))]);
        }
        let source = Arc::new(MemorySource::new("news").with_table("articles", table));
        let engine = QueryEngine::with_options(
            Arc::new(model(source.clone())),
            tabulator_core::EngineOptions::default().with_batch_size(10),
        );

        let ids: Vec<String> = (0..25).map(|i| format!("a{i}")).collect();
        let result = engine
            .get_list(
                &ListQuery::new(["article", "project"])
                    .filter(tabulator_core::Filter::values("article", ids)),
            )
            .unwrap();
        assert_eq!(result.len(), 25);
        assert_eq!(source.lookup_count(), 3);
    }

    #[test]
    fn test_labels_and_scan() {
        let source = Arc::new(projects());
        let engine = QueryEngine::new(Arc::new(model(source.clone())));

        let result = engine.get_list(&ListQuery::new(["project"])).unwrap();
        assert_eq!(
            result.column("project").unwrap(),
            vec![&Value::from("Project One"), &Value::from("p2")]
        );
        assert_eq!(source.deserialize("article", &Value::from("a1")), None);
    }
}
