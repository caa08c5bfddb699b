// src/history/mod.rs
use chrono::NaiveDate;
use std::collections::BTreeSet;
use tracing::warn;

use crate::process::{date_parser, flatten_columns, Table, REFERENCE_DATE_COLUMN};

pub mod store;

pub use store::{DatasetStore, XlsxStore};

/// Load the persisted dataset and the reference dates it already holds.
///
/// Anything that keeps the dataset from loading (no file, no sheet, a sheet
/// that cannot be read as a table) counts as "no prior data".
pub fn load_existing<S: DatasetStore>(store: &S) -> (Option<Table>, BTreeSet<NaiveDate>) {
    match store.load() {
        Ok(Some(table)) => {
            let table = flatten_columns(table);
            let dates = known_dates(&table);
            let has_dates_column = table.column_index(REFERENCE_DATE_COLUMN).is_some();
            if dates.is_empty() && has_dates_column && table.num_rows() > 0 {
                warn!(
                    rows = table.num_rows(),
                    "no readable dates in `{}`; every window date will be fetched",
                    REFERENCE_DATE_COLUMN
                );
            }
            (Some(table), dates)
        }
        Ok(None) => (None, BTreeSet::new()),
        Err(e) => {
            warn!("existing dataset not usable, starting empty: {:#}", e);
            (None, BTreeSet::new())
        }
    }
}

/// Distinct calendar dates of the `Data` column, from `DD/MM/YYYY` text or
/// Excel serial numbers; unparseable values are dropped.
pub fn known_dates(table: &Table) -> BTreeSet<NaiveDate> {
    match table.column_index(REFERENCE_DATE_COLUMN) {
        Some(col) => date_parser::reference_dates(table, col)
            .into_iter()
            .flatten()
            .collect(),
        None => BTreeSet::new(),
    }
}
