use crate::process::table::{ColumnLabel, Table};

/// Collapse one label into a single trimmed string. Multi-level parts that
/// are blank or the literal `nan` are dropped before joining with a space.
pub fn flatten_label(label: &ColumnLabel) -> String {
    match label {
        ColumnLabel::Single(name) => name.trim().to_string(),
        ColumnLabel::Levels(parts) => parts
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty() && *p != "nan")
            .collect::<Vec<_>>()
            .join(" "),
    }
}

/// Replace every label with its flattened single-level form. Idempotent.
pub fn flatten_columns(table: Table) -> Table {
    table.map_labels(|label| ColumnLabel::Single(flatten_label(label)))
}
