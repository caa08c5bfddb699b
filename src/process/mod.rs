// src/process/mod.rs
pub mod date_parser;
pub mod flatten;
pub mod numbers;
pub mod table;

pub use flatten::flatten_columns;
pub use numbers::normalize_numbers;
pub use table::{Cell, Column, ColumnLabel, Table};

/// Leftmost column of every snapshot: the reference date as `DD/MM/YYYY`.
pub const REFERENCE_DATE_COLUMN: &str = "Data";
