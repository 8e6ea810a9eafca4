//! Evaluation of a parsed `SELECT` over an in-memory row set

use super::ast::{Projection, Select};
use crate::models::{Dataset, Value};

/// Apply the WHERE conjunction, projection and LIMIT of `select` to `table`.
/// Unknown columns are reported by name.
pub fn apply_select(select: &Select, table: &Dataset) -> Result<Dataset, String> {
    let filter = select
        .filter
        .iter()
        .map(|eq| {
            table
                .column_index(&eq.column)
                .map(|idx| (idx, &eq.value))
                .ok_or_else(|| format!("unknown column '{}'", eq.column))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let (columns, indices): (Vec<String>, Vec<usize>) = match &select.projection {
        Projection::All => table.columns.iter().cloned().zip(0..).unzip(),
        Projection::Columns(cols) => cols
            .iter()
            .map(|c| {
                table
                    .column_index(c)
                    .map(|idx| (table.columns[idx].clone(), idx))
                    .ok_or_else(|| format!("unknown column '{}'", c))
            })
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .unzip(),
    };

    let rows = table
        .rows
        .iter()
        .filter(|row| {
            filter
                .iter()
                .all(|(idx, value)| row.get(*idx).is_some_and(|v| v.loosely_equals(value)))
        })
        .take(select.limit.unwrap_or(usize::MAX))
        .map(|row| {
            indices
                .iter()
                .map(|i| row.get(*i).cloned().unwrap_or(Value::Null))
                .collect()
        })
        .collect();

    Ok(Dataset::new(columns, rows))
}
