use anyhow::{bail, Context, Result};
use arrow::{
    array::{
        Array, ArrayRef, Float64Array, Float64Builder, StringArray, StringBuilder, UInt32Array,
        UnionArray,
    },
    buffer::ScalarBuffer,
    compute,
    datatypes::{DataType, Field, UnionFields},
};
use std::{fmt, sync::Arc};

/// Union type ids of a mixed column.
const TEXT_TYPE_ID: i8 = 0;
const NUMBER_TYPE_ID: i8 = 1;

fn mixed_fields() -> UnionFields {
    UnionFields::new(
        [TEXT_TYPE_ID, NUMBER_TYPE_ID],
        [
            Field::new("text", DataType::Utf8, true),
            Field::new("number", DataType::Float64, true),
        ],
    )
}

/// Header of one column. Tables parsed from HTML with several header rows
/// carry one entry per header level until they are flattened.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ColumnLabel {
    Single(String),
    Levels(Vec<String>),
}

impl ColumnLabel {
    pub fn single(name: impl Into<String>) -> Self {
        ColumnLabel::Single(name.into())
    }

    /// The label text when this is a single-level label.
    pub fn as_single(&self) -> Option<&str> {
        match self {
            ColumnLabel::Single(name) => Some(name),
            ColumnLabel::Levels(_) => None,
        }
    }
}

impl fmt::Display for ColumnLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnLabel::Single(name) => write!(f, "{}", name),
            ColumnLabel::Levels(parts) => write!(f, "{}", parts.join(" ")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Column {
    pub label: ColumnLabel,
    /// `Utf8`, `Float64`, or a dense union of the two for columns holding
    /// both kinds of cell. Nulls mark missing cells.
    pub values: ArrayRef,
}

impl PartialEq for Column {
    fn eq(&self, other: &Self) -> bool {
        self.label == other.label && self.values.as_ref() == other.values.as_ref()
    }
}

impl Column {
    pub fn new(label: ColumnLabel, values: ArrayRef) -> Self {
        Self { label, values }
    }

    pub fn text(label: ColumnLabel, values: Vec<Option<String>>) -> Self {
        Self::new(label, Arc::new(StringArray::from(values)) as ArrayRef)
    }

    pub fn numbers(label: ColumnLabel, values: Vec<Option<f64>>) -> Self {
        Self::new(label, Arc::new(Float64Array::from(values)) as ArrayRef)
    }

    /// A column where every cell keeps its own kind.
    pub fn mixed<'a>(
        label: ColumnLabel,
        cells: impl IntoIterator<Item = Cell<'a>>,
    ) -> Result<Self> {
        let mut type_ids = Vec::new();
        let mut offsets = Vec::new();
        let mut text = StringBuilder::new();
        let mut numbers = Float64Builder::new();
        let (mut n_text, mut n_numbers) = (0usize, 0usize);

        for cell in cells {
            match cell {
                Cell::Number(v) => {
                    type_ids.push(NUMBER_TYPE_ID);
                    offsets.push(i32::try_from(n_numbers).context("mixed column too long")?);
                    numbers.append_value(v);
                    n_numbers += 1;
                }
                Cell::Text(_) | Cell::Missing => {
                    type_ids.push(TEXT_TYPE_ID);
                    offsets.push(i32::try_from(n_text).context("mixed column too long")?);
                    // missing cells are nulls in the text child
                    text.append_option(match cell {
                        Cell::Text(s) => Some(s),
                        _ => None,
                    });
                    n_text += 1;
                }
            }
        }

        let values = UnionArray::try_new(
            mixed_fields(),
            ScalarBuffer::from(type_ids),
            Some(ScalarBuffer::from(offsets)),
            vec![
                Arc::new(text.finish()) as ArrayRef,
                Arc::new(numbers.finish()) as ArrayRef,
            ],
        )
        .with_context(|| format!("building mixed column `{}`", label))?;
        Ok(Self::new(label, Arc::new(values) as ArrayRef))
    }

    pub fn is_mixed(&self) -> bool {
        matches!(self.values.data_type(), DataType::Union(..))
    }

    pub fn cell(&self, row: usize) -> Cell<'_> {
        cell_at(self.values.as_ref(), row)
    }
}

/// Cell `row` of a `Utf8`, `Float64` or mixed array.
pub fn cell_at(values: &dyn Array, row: usize) -> Cell<'_> {
    if row >= values.len() {
        return Cell::Missing;
    }
    if let Some(u) = values.as_any().downcast_ref::<UnionArray>() {
        return cell_at(u.child(u.type_id(row)).as_ref(), u.value_offset(row));
    }
    if values.is_null(row) {
        return Cell::Missing;
    }
    if let Some(s) = values.as_any().downcast_ref::<StringArray>() {
        Cell::Text(s.value(row))
    } else if let Some(f) = values.as_any().downcast_ref::<Float64Array>() {
        Cell::Number(f.value(row))
    } else {
        Cell::Missing
    }
}

/// A borrowed view of one cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Cell<'a> {
    Text(&'a str),
    Number(f64),
    Missing,
}

/// Column-oriented table with arrow-backed values and free-form labels.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<Column>,
    num_rows: usize,
}

impl Table {
    /// Build a table, checking every column has the same length.
    pub fn new(columns: Vec<Column>) -> Result<Self> {
        let num_rows = columns.first().map(|c| c.values.len()).unwrap_or(0);
        if let Some(bad) = columns.iter().find(|c| c.values.len() != num_rows) {
            bail!(
                "column `{}` has {} rows, expected {}",
                bad.label,
                bad.values.len(),
                num_rows
            );
        }
        Ok(Self { columns, num_rows })
    }

    /// Build an all-text table from row-major cells. Blank cells become nulls
    /// and short rows are padded with nulls.
    pub fn from_text_rows(labels: Vec<ColumnLabel>, rows: &[Vec<String>]) -> Result<Self> {
        if let Some(wide) = rows.iter().find(|r| r.len() > labels.len()) {
            bail!(
                "row has {} cells but the header only has {} columns",
                wide.len(),
                labels.len()
            );
        }

        let columns = labels
            .into_iter()
            .enumerate()
            .map(|(i, label)| {
                let mut b = StringBuilder::new();
                for row in rows {
                    match row.get(i).map(|s| s.trim()) {
                        Some(s) if !s.is_empty() => b.append_value(s),
                        _ => b.append_null(),
                    }
                }
                Column::new(label, Arc::new(b.finish()) as ArrayRef)
            })
            .collect();

        Table::new(columns)
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn into_columns(self) -> Vec<Column> {
        self.columns
    }

    pub fn labels(&self) -> impl Iterator<Item = &ColumnLabel> {
        self.columns.iter().map(|c| &c.label)
    }

    /// Position of the first single-level column called `name`.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.label.as_single() == Some(name))
    }

    /// Rewrite every label, leaving values untouched.
    pub fn map_labels(self, f: impl Fn(&ColumnLabel) -> ColumnLabel) -> Self {
        let columns = self
            .columns
            .into_iter()
            .map(|c| Column::new(f(&c.label), c.values))
            .collect();
        Self {
            columns,
            num_rows: self.num_rows,
        }
    }

    pub fn insert_column(&mut self, index: usize, column: Column) -> Result<()> {
        if !self.columns.is_empty() && column.values.len() != self.num_rows {
            bail!(
                "column `{}` has {} rows, expected {}",
                column.label,
                column.values.len(),
                self.num_rows
            );
        }
        if self.columns.is_empty() {
            self.num_rows = column.values.len();
        }
        let index = index.min(self.columns.len());
        self.columns.insert(index, column);
        Ok(())
    }

    /// Move the column at `from` so it becomes the leftmost one.
    pub fn move_to_front(&mut self, from: usize) {
        if from < self.columns.len() {
            let col = self.columns.remove(from);
            self.columns.insert(0, col);
        }
    }

    /// Reorder rows by position; `indices` may select any subset.
    pub fn take_rows(&self, indices: &[u32]) -> Result<Self> {
        let idx = UInt32Array::from(indices.to_vec());
        let columns = self
            .columns
            .iter()
            .map(|c| -> Result<Column> {
                if c.is_mixed() {
                    let cells = indices.iter().map(|&i| c.cell(i as usize));
                    return Column::mixed(c.label.clone(), cells);
                }
                let values = compute::take(c.values.as_ref(), &idx, None)?;
                Ok(Column::new(c.label.clone(), values))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            columns,
            num_rows: indices.len(),
        })
    }

    pub fn cell(&self, column: usize, row: usize) -> Cell<'_> {
        self.columns
            .get(column)
            .map_or(Cell::Missing, |c| c.cell(row))
    }
}
