use anyhow::{Context, Result};
use arrow::{
    array::{new_null_array, Array, ArrayRef},
    compute,
    datatypes::DataType,
};
use std::collections::HashMap;

use crate::process::{
    date_parser, flatten_columns,
    table::{cell_at, Cell},
    Column, ColumnLabel, Table, REFERENCE_DATE_COLUMN,
};

/// Identity of a column across tables: its label plus which repeat of that
/// label it is within its own table.
type ColumnKey = (ColumnLabel, usize);

fn column_keys(table: &Table) -> Vec<ColumnKey> {
    let mut seen: HashMap<&ColumnLabel, usize> = HashMap::new();
    table
        .labels()
        .map(|label| {
            let n = seen.entry(label).or_insert(0);
            let key = (label.clone(), *n);
            *n += 1;
            key
        })
        .collect()
}

/// Stack tables vertically, in order. The result has the union of all
/// columns in order of first appearance; cells a table does not have are
/// null. A column that is text in one table and numeric in another becomes a
/// mixed column, so no existing cell changes kind.
pub fn concat_tables(tables: &[Table]) -> Result<Table> {
    let keyed: Vec<Vec<ColumnKey>> = tables.iter().map(column_keys).collect();

    let mut union: Vec<ColumnKey> = Vec::new();
    for keys in &keyed {
        for key in keys {
            if !union.contains(key) {
                union.push(key.clone());
            }
        }
    }

    let mut columns = Vec::with_capacity(union.len());
    for key in union {
        let pieces: Vec<Option<&ArrayRef>> = tables
            .iter()
            .zip(&keyed)
            .map(|(t, keys)| {
                keys.iter()
                    .position(|k| *k == key)
                    .map(|i| &t.columns()[i].values)
            })
            .collect();

        let mut types = pieces.iter().flatten().map(|a| a.data_type());
        let first = types.next().cloned().unwrap_or(DataType::Utf8);
        let uniform = types.all(|t| *t == first) && !matches!(first, DataType::Union(..));

        if !uniform {
            let cells = tables.iter().zip(&pieces).flat_map(|(t, piece)| {
                (0..t.num_rows()).map(move |row| match *piece {
                    Some(a) => cell_at(a.as_ref(), row),
                    None => Cell::Missing,
                })
            });
            columns.push(
                Column::mixed(key.0.clone(), cells)
                    .with_context(|| format!("combining column `{}`", key.0))?,
            );
            continue;
        }

        let arrays: Vec<ArrayRef> = tables
            .iter()
            .zip(&pieces)
            .map(|(t, piece)| match *piece {
                Some(a) => ArrayRef::clone(a),
                None => new_null_array(&first, t.num_rows()),
            })
            .collect();

        let refs: Vec<&dyn Array> = arrays.iter().map(|a| a.as_ref()).collect();
        let values = compute::concat(&refs)
            .with_context(|| format!("concatenating column `{}`", key.0))?;
        columns.push(Column::new(key.0, values));
    }

    Table::new(columns)
}

/// Existing rows first, then the new ones, with labels re-flattened.
pub fn merge_datasets(existing: Option<Table>, new_rows: Table) -> Result<Table> {
    let combined = match existing {
        Some(old) => concat_tables(&[old, new_rows])?,
        None => new_rows,
    };
    Ok(flatten_columns(combined))
}

/// Stable ascending sort on the parsed `Data` column, unparseable dates
/// last, with `Data` moved to the front. Tables without `Data` are returned
/// as they are.
pub fn sort_by_reference_date(table: Table) -> Result<Table> {
    let Some(col) = table.column_index(REFERENCE_DATE_COLUMN) else {
        return Ok(table);
    };
    let keys = date_parser::reference_dates(&table, col);

    let rows = u32::try_from(table.num_rows()).context("too many rows to sort")?;
    let mut order: Vec<u32> = (0..rows).collect();
    order.sort_by_key(|&i| {
        let key = keys[i as usize];
        (key.is_none(), key)
    });

    let mut sorted = table.take_rows(&order)?;
    sorted.move_to_front(col);
    Ok(sorted)
}
