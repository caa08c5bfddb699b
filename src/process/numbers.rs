use anyhow::Result;
use arrow::array::{Array, ArrayRef, Float64Builder, StringArray};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use tracing::debug;

use crate::process::table::Table;

static HAS_DIGIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d").expect("digit regex"));
static HAS_SEPARATOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"[,.]").expect("separator regex"));
static PLAIN_INTEGER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[+-]?\d+$").expect("integer regex"));

/// A text column is treated as locale-formatted numbers when some value has a
/// digit and some value has a `,` or `.`. The check is loose; values are only
/// converted when every one of them parses.
pub fn looks_localized(values: &StringArray) -> bool {
    let mut digit = false;
    let mut separator = false;
    for s in values.iter().flatten() {
        digit |= HAS_DIGIT.is_match(s);
        separator |= HAS_SEPARATOR.is_match(s);
        if digit && separator {
            return true;
        }
    }
    false
}

/// Every filled value is a bare integer such as `252`. Such columns hold
/// numbers even though they carry no separator.
pub fn all_integers(values: &StringArray) -> bool {
    let mut any = false;
    for s in values.iter().flatten().map(str::trim).filter(|s| !s.is_empty()) {
        if !PLAIN_INTEGER.is_match(s) {
            return false;
        }
        any = true;
    }
    any
}

/// `"1.234,56"` → `"1234.56"`: drops spaces (plain and non-breaking) and
/// thousands dots, turns the decimal comma into a dot.
pub fn clean_localized(raw: &str) -> String {
    raw.chars()
        .filter(|c| !matches!(c, ' ' | '\u{a0}' | '\u{202f}' | '.'))
        .map(|c| if c == ',' { '.' } else { c })
        .collect()
}

pub fn parse_localized(raw: &str) -> Option<f64> {
    clean_localized(raw).parse().ok()
}

/// Convert a text column, or `None` when any non-blank value fails to parse.
fn convert_column(values: &StringArray) -> Option<ArrayRef> {
    let mut b = Float64Builder::with_capacity(values.len());
    for opt in values.iter() {
        match opt.map(clean_localized) {
            Some(cleaned) if !cleaned.is_empty() => b.append_value(cleaned.parse().ok()?),
            _ => b.append_null(),
        }
    }
    Some(Arc::new(b.finish()) as ArrayRef)
}

/// Best-effort conversion of locale-formatted and plain integer text columns
/// to `Float64`. Columns that do not fully parse keep their original strings.
pub fn normalize_numbers(table: Table) -> Result<Table> {
    let columns = table
        .into_columns()
        .into_iter()
        .map(|mut col| {
            if let Some(sarr) = col.values.as_any().downcast_ref::<StringArray>() {
                if looks_localized(sarr) || all_integers(sarr) {
                    match convert_column(sarr) {
                        Some(converted) => col.values = converted,
                        None => debug!(column = %col.label, "left as text"),
                    }
                }
            }
            col
        })
        .collect();
    Table::new(columns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::table::{Cell, Column, ColumnLabel};

    fn text_col(name: &str, values: &[Option<&str>]) -> Column {
        Column::text(
            ColumnLabel::single(name),
            values.iter().map(|v| v.map(str::to_string)).collect(),
        )
    }

    #[test]
    fn parses_localized_strings() {
        assert_eq!(parse_localized("1.234,56"), Some(1234.56));
        assert_eq!(parse_localized("12,5"), Some(12.5));
        assert_eq!(parse_localized("1.234.567,0"), Some(1234567.0));
        assert_eq!(parse_localized("1\u{a0}234,5"), Some(1234.5));
        assert_eq!(parse_localized("-0,0312"), Some(-0.0312));
        assert_eq!(parse_localized("abc"), None);
    }

    #[test]
    fn converts_grouped_and_plain_values() {
        for (s, want) in [("0,1", 0.1), ("9.999,99", 9999.99), ("42,0", 42.0), ("1.0,5", 10.5)] {
            assert_eq!(parse_localized(s), Some(want), "{}", s);
        }
    }

    #[test]
    fn converts_numeric_columns_only() {
        let t = Table::new(vec![
            text_col("Data", &[Some("16/10/2026"), Some("16/10/2026")]),
            text_col("Taxa", &[Some("13,4512"), Some("1.013,5")]),
            text_col("Nome", &[Some("Prefixado"), Some("IPCA")]),
            text_col("Vertice", &[Some("252"), Some("504")]),
        ])
        .unwrap();

        let n = normalize_numbers(t).unwrap();
        assert_eq!(n.cell(0, 0), Cell::Text("16/10/2026"));
        assert_eq!(n.cell(1, 0), Cell::Number(13.4512));
        assert_eq!(n.cell(1, 1), Cell::Number(1013.5));
        assert_eq!(n.cell(2, 1), Cell::Text("IPCA"));
        assert_eq!(n.cell(3, 0), Cell::Number(252.0));
        assert_eq!(n.cell(3, 1), Cell::Number(504.0));
    }

    #[test]
    fn integer_detection_needs_every_value() {
        let ints = StringArray::from(vec![Some("252"), None, Some(" -21 "), Some("")]);
        assert!(all_integers(&ints));
        let codes = StringArray::from(vec![Some("252"), Some("DI1F27")]);
        assert!(!all_integers(&codes));
        assert!(!all_integers(&StringArray::from(vec![None::<&str>, Some("")])));
    }

    #[test]
    fn text_with_digits_but_no_separator_is_untouched() {
        let t = Table::new(vec![text_col("Nome", &[Some("NTN-B 2035"), Some("LTN")])]).unwrap();
        let n = normalize_numbers(t).unwrap();
        assert_eq!(n.cell(0, 0), Cell::Text("NTN-B 2035"));
    }

    #[test]
    fn unparseable_column_keeps_strings() {
        let t = Table::new(vec![text_col("Mixed", &[Some("1,5"), Some("n.d.")])]).unwrap();
        let n = normalize_numbers(t).unwrap();
        assert_eq!(n.cell(0, 0), Cell::Text("1,5"));
        assert_eq!(n.cell(0, 1), Cell::Text("n.d."));
    }

    #[test]
    fn nulls_survive_conversion() {
        let t = Table::new(vec![text_col("Taxa", &[None, Some("2,5")])]).unwrap();
        let n = normalize_numbers(t).unwrap();
        assert_eq!(n.cell(0, 0), Cell::Missing);
        assert_eq!(n.cell(0, 1), Cell::Number(2.5));
    }

    #[test]
    fn numeric_columns_are_left_alone() {
        let t = Table::new(vec![Column::numbers(
            ColumnLabel::single("v"),
            vec![Some(1.5), None],
        )])
        .unwrap();
        assert_eq!(normalize_numbers(t.clone()).unwrap(), t);
    }
}
