//! Postprocessing of extracted results: dedup, sort, window and pivot.
//!
//! Everything here operates on the logical result table and never sees
//! the execution state that produced it.

use crate::error::QueryError;
use crate::query::{Aggregate, AggregateFn, SortSpec, TableQuery};
use crate::table::{PivotTable, Row, Table};
use crate::value::Value;
use indexmap::{IndexMap, IndexSet};
use std::cmp::Ordering;

static NULL: Value = Value::Null;

fn cell(row: &Row, index: usize) -> &Value {
    row.get(index).unwrap_or(&NULL)
}

/// Comparison class of a value; `None` for null, which compares with all.
fn class(value: &Value) -> Option<&'static str> {
    match value {
        Value::Null => None,
        Value::Int(_) | Value::Float(_) => Some("number"),
        Value::Str(_) => Some("string"),
        Value::Date(_) => Some("date"),
    }
}

/// Fail unless every value of a column can be ordered against every other.
fn check_comparable<'a>(
    column: &str,
    values: impl IntoIterator<Item = &'a Value>,
) -> Result<(), QueryError> {
    let mut first: Option<(&'static str, &Value)> = None;
    for value in values {
        let Some(c) = class(value) else { continue };
        match first {
            None => first = Some((c, value)),
            Some((fc, fv)) if fc != c => {
                return Err(QueryError::Incomparable {
                    column: column.to_string(),
                    left: format!("{} '{fv}'", fv.kind()),
                    right: format!("{} '{value}'", value.kind()),
                });
            }
            Some(_) => {}
        }
    }
    Ok(())
}

/// Keep the first occurrence of every row.
pub fn distinct(rows: &mut Vec<Row>) {
    let mut seen = IndexSet::new();
    rows.retain(|row| seen.insert(row.clone()));
}

/// Stable multi-key sort. No-op without keys.
pub fn sort(table: &mut Table, keys: &[SortSpec]) -> Result<(), QueryError> {
    if keys.is_empty() {
        return Ok(());
    }

    let mut columns = Vec::with_capacity(keys.len());
    for key in keys {
        let index = table
            .column_index(&key.concept)
            .ok_or_else(|| QueryError::UnknownColumn(key.concept.clone()))?;
        check_comparable(&key.concept, table.rows().iter().map(|r| cell(r, index)))?;
        columns.push((index, key.ascending));
    }

    table.rows_mut().sort_by(|x, y| {
        for &(index, ascending) in &columns {
            let ord = cell(x, index)
                .try_cmp(cell(y, index))
                .unwrap_or(Ordering::Equal);
            let ord = if ascending { ord } else { ord.reverse() };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
    Ok(())
}

/// Skip `offset` rows and keep at most `limit`.
pub fn window(rows: Vec<Row>, offset: usize, limit: Option<usize>) -> Vec<Row> {
    rows.into_iter()
        .skip(offset)
        .take(limit.unwrap_or(usize::MAX))
        .collect()
}

fn sort_keys(keys: &mut [Row], concepts: &[String]) -> Result<(), QueryError> {
    for (i, concept) in concepts.iter().enumerate() {
        check_comparable(concept, keys.iter().map(|k| cell(k, i)))?;
    }
    keys.sort_by(|x, y| {
        x.iter()
            .zip(y.iter())
            .map(|(a, b)| a.try_cmp(b).unwrap_or(Ordering::Equal))
            .find(|o| *o != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    });
    Ok(())
}

fn numbers<'a>(
    concept: &str,
    function: AggregateFn,
    values: &[&'a Value],
) -> Result<Vec<&'a Value>, QueryError> {
    for v in values {
        if v.as_f64().is_none() {
            return Err(QueryError::Aggregate(format!(
                "{function:?} of {concept} needs numbers, found {} '{v}'",
                v.kind()
            )));
        }
    }
    Ok(values.to_vec())
}

fn fold(
    aggregate: &Aggregate,
    index: Option<usize>,
    rows: &[&Row],
    present: &dyn Fn(&str, &Value) -> Value,
) -> Result<Value, QueryError> {
    let (Some(index), Some(concept)) = (index, aggregate.concept.as_deref()) else {
        return Ok(Value::Int(rows.len() as i64));
    };
    let values: Vec<&Value> = rows
        .iter()
        .map(|r| cell(r, index))
        .filter(|v| !v.is_null())
        .collect();

    let folded = match aggregate.function {
        AggregateFn::Count => Value::Int(values.len() as i64),
        AggregateFn::CountDistinct => {
            Value::Int(values.iter().collect::<IndexSet<_>>().len() as i64)
        }
        AggregateFn::Sum => {
            let values = numbers(concept, aggregate.function, &values)?;
            let ints: Option<i64> = values
                .iter()
                .try_fold(0i64, |acc, v| acc.checked_add(v.as_i64()?));
            match ints {
                Some(total) => Value::Int(total),
                None => Value::Float(values.iter().filter_map(|v| v.as_f64()).sum()),
            }
        }
        AggregateFn::Average => {
            let values = numbers(concept, aggregate.function, &values)?;
            if values.is_empty() {
                Value::Null
            } else {
                let total: f64 = values.iter().filter_map(|v| v.as_f64()).sum();
                Value::Float(total / values.len() as f64)
            }
        }
        AggregateFn::Min | AggregateFn::Max => {
            check_comparable(concept, values.iter().copied())?;
            let pick = values.iter().copied().reduce(|best, v| {
                let ord = v.try_cmp(best).unwrap_or(Ordering::Equal);
                let better = match aggregate.function {
                    AggregateFn::Min => ord == Ordering::Less,
                    _ => ord == Ordering::Greater,
                };
                if better { v } else { best }
            });
            match pick {
                Some(v) => present(concept, v),
                None => Value::Null,
            }
        }
    };
    Ok(folded)
}

/// Group a flat table by row and column concepts and fold every group
/// through the query's aggregates.
///
/// Keys are sorted on raw values and then passed through `present` for
/// display, as are `Min`/`Max` results.
pub fn pivot(
    table: &Table,
    query: &TableQuery,
    present: &dyn Fn(&str, &Value) -> Value,
) -> Result<PivotTable, QueryError> {
    let aggregates = query.aggregates();
    for a in &aggregates {
        if a.concept.is_none() && a.function != AggregateFn::Count {
            return Err(QueryError::Aggregate(format!(
                "{:?} needs a concept",
                a.function
            )));
        }
    }

    let index = |c: &String| {
        table
            .column_index(c)
            .ok_or_else(|| QueryError::UnknownColumn(c.clone()))
    };
    let row_index: Vec<usize> = query.rows.iter().map(index).collect::<Result<_, _>>()?;
    let column_index: Vec<usize> = query.columns.iter().map(index).collect::<Result<_, _>>()?;
    let aggregate_index: Vec<Option<usize>> = aggregates
        .iter()
        .map(|a| a.concept.as_ref().map(index).transpose())
        .collect::<Result<_, _>>()?;

    let pick = |row: &Row, indices: &[usize]| -> Row {
        indices.iter().map(|&i| cell(row, i).clone()).collect()
    };

    let mut groups: IndexMap<(Row, Row), Vec<&Row>> = IndexMap::new();
    for row in table.rows() {
        groups
            .entry((pick(row, &row_index), pick(row, &column_index)))
            .or_default()
            .push(row);
    }

    let mut row_keys: Vec<Row> = groups
        .keys()
        .map(|(r, _)| r.clone())
        .collect::<IndexSet<_>>()
        .into_iter()
        .collect();
    let mut column_keys: Vec<Row> = groups
        .keys()
        .map(|(_, c)| c.clone())
        .collect::<IndexSet<_>>()
        .into_iter()
        .collect();
    sort_keys(&mut row_keys, &query.rows)?;
    sort_keys(&mut column_keys, &query.columns)?;

    let row_pos: IndexMap<&Row, usize> = row_keys.iter().enumerate().map(|(i, k)| (k, i)).collect();
    let column_pos: IndexMap<&Row, usize> =
        column_keys.iter().enumerate().map(|(i, k)| (k, i)).collect();

    let mut cells = vec![vec![None; column_keys.len()]; row_keys.len()];
    for ((rk, ck), rows) in &groups {
        let (Some(&r), Some(&c)) = (row_pos.get(rk), column_pos.get(ck)) else {
            continue;
        };
        let values = aggregates
            .iter()
            .zip(&aggregate_index)
            .map(|(a, &i)| fold(a, i, rows, present))
            .collect::<Result<Vec<_>, _>>()?;
        cells[r][c] = Some(values);
    }

    let present_keys = |keys: &[Row], concepts: &[String]| -> Vec<Row> {
        keys.iter()
            .map(|k| {
                k.iter()
                    .zip(concepts)
                    .map(|(v, c)| present(c, v))
                    .collect()
            })
            .collect()
    };
    let row_keys = present_keys(&row_keys, &query.rows);
    let column_keys = present_keys(&column_keys, &query.columns);

    Ok(PivotTable::new(
        query.rows.clone(),
        query.columns.clone(),
        aggregates,
        row_keys,
        column_keys,
        cells,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(_: &str, v: &Value) -> Value {
        v.clone()
    }

    fn numbered(n: usize) -> Table {
        let rows = (1..=n as i64)
            .rev()
            .map(|i| vec![Value::Str(format!("r{i}")), Value::Int(i)])
            .collect();
        Table::from_rows(vec!["name".into(), "n".into()], rows)
    }

    fn names(rows: &[Row]) -> Vec<String> {
        rows.iter().map(|r| r[0].to_string()).collect()
    }

    #[test]
    fn test_sort_limit_offset() {
        let mut table = numbered(10);
        sort(&mut table, &[SortSpec::asc("n")]).unwrap();
        let rows = window(table.into_rows(), 4, Some(3));
        assert_eq!(names(&rows), vec!["r5", "r6", "r7"]);
    }

    #[test]
    fn test_window_defaults() {
        let mut table = numbered(10);
        sort(&mut table, &[SortSpec::asc("n")]).unwrap();
        let expected = table.rows().to_vec();
        assert_eq!(window(table.into_rows(), 0, None), expected);
        assert!(window(numbered(3).into_rows(), 5, None).is_empty());
    }

    #[test]
    fn test_sort_multi_key_stable() {
        let rows = vec![
            vec![Value::from("x"), Value::Int(2), Value::from("first")],
            vec![Value::from("y"), Value::Int(1), Value::from("second")],
            vec![Value::from("x"), Value::Int(2), Value::from("third")],
            vec![Value::from("x"), Value::Int(3), Value::from("fourth")],
        ];
        let mut table = Table::from_rows(vec!["k".into(), "n".into(), "tag".into()], rows);
        sort(&mut table, &[SortSpec::asc("k"), SortSpec::desc("n")]).unwrap();
        let tags: Vec<_> = table.rows().iter().map(|r| r[2].to_string()).collect();
        assert_eq!(tags, vec!["fourth", "first", "third", "second"]);
    }

    #[test]
    fn test_sort_nulls_first() {
        let rows = vec![vec![Value::Int(2)], vec![Value::Null], vec![Value::Float(1.5)]];
        let mut table = Table::from_rows(vec!["n".into()], rows);
        sort(&mut table, &[SortSpec::asc("n")]).unwrap();
        assert_eq!(
            table.column("n").unwrap(),
            vec![&Value::Null, &Value::Float(1.5), &Value::Int(2)]
        );
    }

    #[test]
    fn test_sort_errors() {
        let rows = vec![vec![Value::Int(2)], vec![Value::from("two")]];
        let mut table = Table::from_rows(vec!["n".into()], rows);
        let err = sort(&mut table, &[SortSpec::asc("n")]).unwrap_err();
        assert!(matches!(err, QueryError::Incomparable { ref column, .. } if column == "n"));

        let err = sort(&mut table, &[SortSpec::asc("missing")]).unwrap_err();
        assert!(matches!(err, QueryError::UnknownColumn(_)));

        // no keys, no check
        assert!(sort(&mut table, &[]).is_ok());
    }

    #[test]
    fn test_distinct() {
        let mut rows = vec![
            vec![Value::Int(1)],
            vec![Value::Int(2)],
            vec![Value::Int(1)],
        ];
        distinct(&mut rows);
        assert_eq!(rows, vec![vec![Value::Int(1)], vec![Value::Int(2)]]);
    }

    fn sales() -> Table {
        let row = |p: &str, y: i64, a: i64, amount: f64| {
            vec![Value::from(p), Value::Int(y), Value::Int(a), Value::Float(amount)]
        };
        Table::from_rows(
            vec!["project".into(), "year".into(), "article".into(), "amount".into()],
            vec![
                row("p2", 2011, 1, 1.0),
                row("p1", 2010, 2, 2.0),
                row("p1", 2010, 3, 4.0),
                row("p1", 2011, 3, 8.0),
                row("p2", 2011, 1, 16.0),
            ],
        )
    }

    #[test]
    fn test_pivot_count() {
        let query = TableQuery::new(["project"]).columns(["year"]);
        let pivot = pivot(&sales(), &query, &raw).unwrap();

        assert_eq!(
            pivot.row_keys(),
            &[vec![Value::from("p1")], vec![Value::from("p2")]]
        );
        assert_eq!(
            pivot.column_keys(),
            &[vec![Value::Int(2010)], vec![Value::Int(2011)]]
        );
        assert_eq!(
            pivot.value(&[Value::from("p1")], &[Value::Int(2010)]),
            Some(&Value::Int(2))
        );
        assert_eq!(
            pivot.value(&[Value::from("p2")], &[Value::Int(2011)]),
            Some(&Value::Int(2))
        );
        // sparse
        assert_eq!(pivot.value(&[Value::from("p2")], &[Value::Int(2010)]), None);
    }

    #[test]
    fn test_pivot_aggregates() {
        let query = TableQuery::new(["project"])
            .cell(Aggregate::of("article", AggregateFn::CountDistinct))
            .cell(Aggregate::of("amount", AggregateFn::Sum))
            .cell(Aggregate::of("amount", AggregateFn::Average))
            .cell(Aggregate::of("year", AggregateFn::Min))
            .cell(Aggregate::of("year", AggregateFn::Max));
        let pivot = pivot(&sales(), &query, &raw).unwrap();

        let p1 = pivot.values(&[Value::from("p1")], &[]).unwrap();
        assert_eq!(
            p1,
            &[
                Value::Int(2),
                Value::Float(14.0),
                Value::Float(14.0 / 3.0),
                Value::Int(2010),
                Value::Int(2011)
            ]
        );
        let p2 = pivot.values(&[Value::from("p2")], &[]).unwrap();
        assert_eq!(p2[0], Value::Int(1));
        assert_eq!(p2[1], Value::Float(17.0));
    }

    #[test]
    fn test_pivot_integer_sum() {
        let query = TableQuery::new(["project"]).cell(Aggregate::of("year", AggregateFn::Sum));
        let pivot = pivot(&sales(), &query, &raw).unwrap();
        assert_eq!(
            pivot.value(&[Value::from("p2")], &[]),
            Some(&Value::Int(4022))
        );
    }

    #[test]
    fn test_pivot_errors() {
        let query = TableQuery::new(["year"]).cell(Aggregate::of("project", AggregateFn::Sum));
        assert!(matches!(
            pivot(&sales(), &query, &raw),
            Err(QueryError::Aggregate(_))
        ));

        let query = TableQuery::new(["year"]).cell(Aggregate {
            concept: None,
            function: AggregateFn::Max,
        });
        assert!(matches!(
            pivot(&sales(), &query, &raw),
            Err(QueryError::Aggregate(_))
        ));

        let query = TableQuery::new(["nope"]);
        assert!(matches!(
            pivot(&sales(), &query, &raw),
            Err(QueryError::UnknownColumn(_))
        ));
    }

    #[test]
    fn test_pivot_presents_keys() {
        let query = TableQuery::new(["project"]);
        let label = |c: &str, v: &Value| Value::Str(format!("{c}={v}"));
        let pivot = pivot(&sales(), &query, &label).unwrap();
        assert_eq!(pivot.row_keys()[0], vec![Value::from("project=p1")]);
    }
}
