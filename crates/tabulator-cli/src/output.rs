//! Plain-text rendering of query results.

use tabulator_core::{Aggregate, AggregateFn, PivotTable, Table, Value};

/// Render a flat table with aligned columns.
pub fn render_table(table: &Table) -> String {
    let header: Vec<String> = table.columns().to_vec();
    let body: Vec<Vec<String>> = table
        .rows()
        .iter()
        .map(|row| row.iter().map(cell).collect())
        .collect();
    align(header, body)
}

/// Render a pivot table: one line per row key, one column per column key.
pub fn render_pivot(pivot: &PivotTable) -> String {
    let aggregates: Vec<String> = pivot.aggregates.iter().map(aggregate_label).collect();

    let mut header = pivot.row_concepts.clone();
    for key in pivot.column_keys() {
        if key.is_empty() {
            header.push(aggregates.join(" / "));
        } else {
            header.push(key.iter().map(cell).collect::<Vec<_>>().join("/"));
        }
    }

    let body = pivot
        .row_keys()
        .iter()
        .enumerate()
        .map(|(r, key)| {
            let mut line: Vec<String> = key.iter().map(cell).collect();
            for c in 0..pivot.column_keys().len() {
                line.push(match pivot.cell_at(r, c) {
                    Some(values) => values.iter().map(cell).collect::<Vec<_>>().join(" / "),
                    None => String::new(),
                });
            }
            line
        })
        .collect();
    align(header, body)
}

/// Header label of an aggregate, e.g. `count` or `sum(score)`.
pub fn aggregate_label(aggregate: &Aggregate) -> String {
    let name = match aggregate.function {
        AggregateFn::Count => "count",
        AggregateFn::CountDistinct => "count_distinct",
        AggregateFn::Sum => "sum",
        AggregateFn::Average => "average",
        AggregateFn::Min => "min",
        AggregateFn::Max => "max",
    };
    match &aggregate.concept {
        Some(concept) => format!("{name}({concept})"),
        None => name.to_string(),
    }
}

fn cell(value: &Value) -> String {
    match value {
        Value::Null => "-".to_string(),
        Value::Float(f) => format!("{f:.2}"),
        other => other.to_string(),
    }
}

fn align(header: Vec<String>, body: Vec<Vec<String>>) -> String {
    let mut widths: Vec<usize> = header.iter().map(|h| h.chars().count()).collect();
    for line in &body {
        for (i, text) in line.iter().enumerate() {
            if let Some(width) = widths.get_mut(i) {
                *width = (*width).max(text.chars().count());
            }
        }
    }

    let mut out = String::new();
    for line in std::iter::once(&header).chain(&body) {
        let padded: Vec<String> = line
            .iter()
            .enumerate()
            .map(|(i, text)| {
                let width = widths.get(i).copied().unwrap_or(0);
                format!("{text:<width$}")
            })
            .collect();
        out.push_str(padded.join("  ").trim_end());
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_table() {
        let table = Table::from_rows(
            vec!["article".into(), "score".into()],
            vec![
                vec![Value::Int(1), Value::Float(2.5)],
                vec![Value::Int(12), Value::Null],
            ],
        );
        assert_eq!(
            render_table(&table),
            "article  score\n1        2.50\n12       -\n"
        );
    }

    #[test]
    fn test_aggregate_label() {
        assert_eq!(aggregate_label(&Aggregate::count()), "count");
        assert_eq!(
            aggregate_label(&Aggregate::of("score", AggregateFn::Average)),
            "average(score)"
        );
    }
}
