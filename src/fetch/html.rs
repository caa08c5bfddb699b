use anyhow::{bail, Result};
use scraper::{ElementRef, Html, Selector};

use crate::process::table::{ColumnLabel, Table};

/// Upper bound on `colspan` / `rowspan` so a malformed attribute cannot
/// blow up the grid.
const MAX_SPAN: usize = 1000;

struct SpanCell {
    text: String,
    colspan: usize,
    rowspan: usize,
}

struct SourceRow {
    header: bool,
    cells: Vec<SpanCell>,
}

/// Parse the first `<table>` of an HTML document.
///
/// Header rows (inside `<thead>`, or leading rows made only of `<th>`) become
/// the labels; two or more header rows yield `ColumnLabel::Levels`. Columns
/// without any header text are labelled by position. Spanned cells are
/// repeated over every slot they cover.
pub fn parse_first_table(html: &str) -> Result<Table> {
    let table_sel = Selector::parse("table").expect("table selector should parse");
    let row_sel = Selector::parse("tr").expect("row selector should parse");

    let doc = Html::parse_document(html);
    let Some(table) = doc.select(&table_sel).next() else {
        bail!("no <table> in document");
    };

    let rows = source_rows(table, &row_sel);
    let grid = expand_spans(&rows);

    let header_count = rows.iter().take_while(|r| r.header).count();
    let (header, body) = grid.split_at(header_count);
    let body: Vec<Vec<String>> = body
        .iter()
        .filter(|r| r.iter().any(|c| !c.trim().is_empty()))
        .cloned()
        .collect();
    if body.is_empty() {
        bail!("table has no data rows");
    }

    let width = grid.iter().map(Vec::len).max().unwrap_or(0);
    let labels = (0..width)
        .map(|col| {
            let parts: Vec<String> = header
                .iter()
                .map(|r| r.get(col).cloned().unwrap_or_default())
                .collect();
            match parts.len() {
                0 => ColumnLabel::Single(col.to_string()),
                1 if parts[0].trim().is_empty() => ColumnLabel::Single(col.to_string()),
                1 => ColumnLabel::Single(parts[0].clone()),
                _ if parts.iter().all(|p| p.trim().is_empty()) => {
                    ColumnLabel::Single(col.to_string())
                }
                _ => ColumnLabel::Levels(parts),
            }
        })
        .collect();

    Table::from_text_rows(labels, &body)
}

/// Rows that belong to `table` itself, not to a table nested inside it.
fn source_rows(table: ElementRef<'_>, row_sel: &Selector) -> Vec<SourceRow> {
    let mut in_leading_header = true;
    table
        .select(row_sel)
        .filter(|row| {
            row.ancestors()
                .filter_map(ElementRef::wrap)
                .find(|e| e.value().name() == "table")
                .map(|t| t.id())
                == Some(table.id())
        })
        .filter_map(|row| {
            let cells: Vec<ElementRef<'_>> = row
                .children()
                .filter_map(ElementRef::wrap)
                .filter(|c| matches!(c.value().name(), "td" | "th"))
                .collect();
            if cells.is_empty() {
                return None;
            }
            let in_thead = row
                .parent()
                .and_then(ElementRef::wrap)
                .is_some_and(|p| p.value().name() == "thead");
            let all_th = cells.iter().all(|c| c.value().name() == "th");
            in_leading_header &= in_thead || all_th;

            Some(SourceRow {
                header: in_leading_header,
                cells: cells.into_iter().map(span_cell).collect(),
            })
        })
        .collect()
}

fn span_cell(cell: ElementRef<'_>) -> SpanCell {
    let span = |attr: &str| {
        cell.value()
            .attr(attr)
            .and_then(|v| v.trim().parse::<usize>().ok())
            .filter(|&n| n > 0)
            .unwrap_or(1)
            .min(MAX_SPAN)
    };
    let raw: String = cell.text().collect();
    SpanCell {
        text: raw.split_whitespace().collect::<Vec<_>>().join(" "),
        colspan: span("colspan"),
        rowspan: span("rowspan"),
    }
}

/// Lay rows out on a grid, copying spanned cells into every slot they cover.
fn expand_spans(rows: &[SourceRow]) -> Vec<Vec<String>> {
    // column → (rows still covered, text)
    let mut carry: Vec<Option<(usize, String)>> = Vec::new();
    let mut grid = Vec::with_capacity(rows.len());

    for row in rows {
        let mut out: Vec<String> = Vec::new();
        let mut cells = row.cells.iter();
        let mut col = 0;
        loop {
            let carried = carry.get_mut(col).and_then(Option::take);
            if let Some((remaining, text)) = carried {
                out.push(text.clone());
                if remaining > 1 {
                    carry[col] = Some((remaining - 1, text));
                }
                col += 1;
                continue;
            }

            let Some(cell) = cells.next() else {
                if carry.iter().skip(col).any(Option::is_some) {
                    out.push(String::new());
                    col += 1;
                    continue;
                }
                break;
            };

            for _ in 0..cell.colspan {
                if cell.rowspan > 1 {
                    if carry.len() <= col {
                        carry.resize(col + 1, None);
                    }
                    carry[col] = Some((cell.rowspan - 1, cell.text.clone()));
                }
                out.push(cell.text.clone());
                col += 1;
            }
        }
        grid.push(out);
    }
    grid
}
