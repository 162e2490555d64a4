//! Query results: flat tables and pivot tables.

use crate::query::Aggregate;
use crate::value::Value;
use serde::{Deserialize, Serialize};

/// One result row, aligned to [`Table::columns`].
pub type Row = Vec<Value>;

/// A flat result: named columns and rows of values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Row>,
}

impl Table {
    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Build from rows already aligned to `columns`.
    pub fn from_rows(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    pub(crate) fn rows_mut(&mut self) -> &mut Vec<Row> {
        &mut self.rows
    }

    pub fn push(&mut self, row: Row) {
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    /// Value at a row index and column name.
    pub fn value(&self, row: usize, column: &str) -> Option<&Value> {
        let col = self.column_index(column)?;
        self.rows.get(row)?.get(col)
    }

    /// All values of one column, in row order.
    pub fn column(&self, column: &str) -> Option<Vec<&Value>> {
        let col = self.column_index(column)?;
        Some(self.rows.iter().filter_map(|r| r.get(col)).collect())
    }
}

/// A sparse rows × columns grid of aggregated cells.
///
/// Keys are tuples of values, one per row (or column) concept, sorted
/// ascending. A key combination that never occurred has no cell.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PivotTable {
    pub row_concepts: Vec<String>,
    pub column_concepts: Vec<String>,
    pub aggregates: Vec<Aggregate>,
    row_keys: Vec<Row>,
    column_keys: Vec<Row>,
    // cells[row][column]
    cells: Vec<Vec<Option<Vec<Value>>>>,
}

impl PivotTable {
    pub(crate) fn new(
        row_concepts: Vec<String>,
        column_concepts: Vec<String>,
        aggregates: Vec<Aggregate>,
        row_keys: Vec<Row>,
        column_keys: Vec<Row>,
        cells: Vec<Vec<Option<Vec<Value>>>>,
    ) -> Self {
        Self {
            row_concepts,
            column_concepts,
            aggregates,
            row_keys,
            column_keys,
            cells,
        }
    }

    pub fn row_keys(&self) -> &[Row] {
        &self.row_keys
    }

    pub fn column_keys(&self) -> &[Row] {
        &self.column_keys
    }

    /// All aggregates of a cell, in [`aggregates`](Self::aggregates) order.
    pub fn values(&self, row_key: &[Value], column_key: &[Value]) -> Option<&[Value]> {
        let r = self.row_keys.iter().position(|k| k.as_slice() == row_key)?;
        let c = self
            .column_keys
            .iter()
            .position(|k| k.as_slice() == column_key)?;
        self.cell_at(r, c)
    }

    /// First aggregate of a cell.
    pub fn value(&self, row_key: &[Value], column_key: &[Value]) -> Option<&Value> {
        self.values(row_key, column_key)?.first()
    }

    /// Cell by grid position.
    pub fn cell_at(&self, row: usize, column: usize) -> Option<&[Value]> {
        self.cells.get(row)?.get(column)?.as_deref()
    }

    /// Number of non-empty cells.
    pub fn cell_count(&self) -> usize {
        self.cells.iter().flatten().filter(|c| c.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_access() {
        let mut table = Table::new(["a", "b"]);
        table.push(vec![Value::from("a1"), Value::from("b1")]);
        table.push(vec![Value::from("a1"), Value::from("b2")]);

        assert_eq!(table.len(), 2);
        assert_eq!(table.value(1, "b"), Some(&Value::from("b2")));
        assert_eq!(table.value(2, "b"), None);
        assert_eq!(table.value(0, "z"), None);
        assert_eq!(
            table.column("a").unwrap(),
            vec![&Value::from("a1"), &Value::from("a1")]
        );
    }

    #[test]
    fn test_pivot_lookup() {
        let pivot = PivotTable::new(
            vec!["p".into()],
            vec!["y".into()],
            vec![Aggregate::count()],
            vec![vec![Value::Int(1)], vec![Value::Int(2)]],
            vec![vec![Value::Int(2010)]],
            vec![vec![Some(vec![Value::Int(3)])], vec![None]],
        );
        assert_eq!(
            pivot.value(&[Value::Int(1)], &[Value::Int(2010)]),
            Some(&Value::Int(3))
        );
        assert_eq!(pivot.value(&[Value::Int(2)], &[Value::Int(2010)]), None);
        assert_eq!(pivot.value(&[Value::Int(9)], &[Value::Int(2010)]), None);
        assert_eq!(pivot.cell_count(), 1);
    }
}
