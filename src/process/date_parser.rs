use chrono::{Days, NaiveDate};

use crate::process::table::{Cell, Table};

/// Layout of reference dates in the `Data` column and in request bodies.
pub const REFERENCE_DATE_FORMAT: &str = "%d/%m/%Y";

pub fn format_reference_date(date: NaiveDate) -> String {
    date.format(REFERENCE_DATE_FORMAT).to_string()
}

/// Parse `"DD/MM/YYYY"`, ignoring any trailing time portion
/// (`"16/10/2026 00:00:00"` is accepted).
pub fn parse_reference_date(s: &str) -> Option<NaiveDate> {
    let day = s.split_whitespace().next()?;
    NaiveDate::parse_from_str(day, REFERENCE_DATE_FORMAT).ok()
}

/// Day of an Excel serial date number (`46311.0` is 16/10/2026). Time of day
/// is dropped; serials before March 1900 are not supported.
pub fn excel_serial_date(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() || serial < 61.0 {
        return None;
    }
    NaiveDate::from_ymd_opt(1899, 12, 30)?.checked_add_days(Days::new(serial.trunc() as u64))
}

/// Parsed reference date per row of `column`. Text cells are read as
/// `DD/MM/YYYY`, number cells as Excel serial dates.
pub fn reference_dates(table: &Table, column: usize) -> Vec<Option<NaiveDate>> {
    (0..table.num_rows())
        .map(|row| match table.cell(column, row) {
            Cell::Text(s) => parse_reference_date(s),
            Cell::Number(v) => excel_serial_date(v),
            Cell::Missing => None,
        })
        .collect()
}
