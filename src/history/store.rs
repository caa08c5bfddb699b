use anyhow::{bail, Context, Result};
use calamine::{open_workbook, Data, DataType as _, Range, Reader, Xlsx};
use rust_xlsxwriter::{Workbook, Worksheet};
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::process::table::{Cell, Column, ColumnLabel, Table};

/// Where the historical dataset lives between runs.
pub trait DatasetStore {
    /// The stored table, or `None` when the file or sheet does not exist.
    fn load(&self) -> Result<Option<Table>>;
    /// Replace the stored table with `table`.
    fn save(&self, table: &Table) -> Result<()>;
}

/// One named sheet of an `.xlsx` workbook. The first row holds the labels.
#[derive(Debug, Clone)]
pub struct XlsxStore {
    path: PathBuf,
    sheet: String,
}

impl XlsxStore {
    pub fn new(path: impl Into<PathBuf>, sheet: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            sheet: sheet.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sheet(&self) -> &str {
        &self.sheet
    }

    fn open(&self) -> Result<Xlsx<std::io::BufReader<fs::File>>> {
        open_workbook(&self.path).with_context(|| format!("opening {}", self.path.display()))
    }

    /// Every sheet of the current workbook in order; the managed sheet comes
    /// back without its contents since it is about to be replaced.
    fn existing_sheets(&self) -> Result<Vec<(String, Option<Range<Data>>)>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let mut workbook = match self.open() {
            Ok(wb) => wb,
            Err(e) => {
                warn!("replacing unreadable workbook: {:#}", e);
                return Ok(Vec::new());
            }
        };

        let mut sheets = Vec::new();
        for name in workbook.sheet_names() {
            if name == self.sheet {
                sheets.push((name, None));
                continue;
            }
            let range = workbook
                .worksheet_range(&name)
                .with_context(|| format!("reading sheet `{}` to carry it over", name))?;
            sheets.push((name, Some(range)));
        }
        Ok(sheets)
    }
}

impl DatasetStore for XlsxStore {
    fn load(&self) -> Result<Option<Table>> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "no dataset yet");
            return Ok(None);
        }
        let mut workbook = self.open()?;
        if !workbook.sheet_names().iter().any(|n| n == &self.sheet) {
            debug!(sheet = %self.sheet, "sheet not in workbook");
            return Ok(None);
        }
        let range = workbook
            .worksheet_range(&self.sheet)
            .with_context(|| format!("reading sheet `{}`", self.sheet))?;
        table_from_range(&range).map(Some)
    }

    fn save(&self, table: &Table) -> Result<()> {
        let mut workbook = Workbook::new();
        let mut wrote_table = false;
        for (name, range) in self.existing_sheets()? {
            let sheet = workbook.add_worksheet();
            match range {
                Some(range) => write_range(sheet, &name, &range)?,
                None => {
                    write_table(sheet, &self.sheet, table)?;
                    wrote_table = true;
                }
            }
        }
        if !wrote_table {
            write_table(workbook.add_worksheet(), &self.sheet, table)?;
        }

        let bytes = workbook
            .save_to_buffer()
            .context("serializing workbook")?;

        // write next to the destination, then rename over it
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
        let mut tmp = NamedTempFile::new_in(&dir)
            .with_context(|| format!("creating temp file in {}", dir.display()))?;
        tmp.write_all(&bytes).context("writing temp workbook")?;
        tmp.as_file().sync_all().context("syncing temp workbook")?;
        tmp.persist(&self.path)
            .with_context(|| format!("replacing {}", self.path.display()))?;
        Ok(())
    }
}

/// Text form of a spreadsheet cell; `None` for blanks and error cells.
fn cell_text(cell: &Data) -> Option<String> {
    match cell {
        Data::Empty | Data::Error(_) => None,
        Data::String(s) if s.trim().is_empty() => None,
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => Some(s.clone()),
        Data::Float(f) => Some(f.to_string()),
        Data::Int(i) => Some(i.to_string()),
        Data::Bool(b) => Some(b.to_string()),
        Data::DateTime(_) => cell.as_datetime().map(|dt| {
            if dt.time() == chrono::NaiveTime::MIN {
                dt.format("%d/%m/%Y").to_string()
            } else {
                dt.format("%d/%m/%Y %H:%M:%S").to_string()
            }
        }),
    }
}

fn cell_number(cell: &Data) -> Option<f64> {
    match cell {
        Data::Float(f) => Some(*f),
        Data::Int(i) => Some(*i as f64),
        _ => None,
    }
}

/// Build a table from a sheet: first row are labels, the rest are values.
/// A column whose filled cells are all numeric is read as numbers, one with
/// no numeric cells as text, and anything else as a mixed column.
pub fn table_from_range(range: &Range<Data>) -> Result<Table> {
    let mut rows = range.rows();
    let Some(header) = rows.next() else {
        bail!("sheet is empty");
    };
    let body: Vec<&[Data]> = rows.collect();
    let empty = Data::Empty;

    let columns = header
        .iter()
        .enumerate()
        .map(|(i, head)| {
            let label = match cell_text(head) {
                Some(text) => ColumnLabel::Single(text),
                None => ColumnLabel::Single(i.to_string()),
            };
            let cells: Vec<&Data> = body.iter().map(|r| r.get(i).unwrap_or(&empty)).collect();
            let numbers: Vec<Option<f64>> = cells.iter().map(|c| cell_number(c)).collect();
            let texts: Vec<Option<String>> = cells
                .iter()
                .zip(&numbers)
                .map(|(c, n)| if n.is_some() { None } else { cell_text(c) })
                .collect();

            let has_numbers = numbers.iter().any(Option::is_some);
            let has_text = texts.iter().any(Option::is_some);
            match (has_numbers, has_text) {
                (true, false) => Ok(Column::numbers(label, numbers)),
                (false, _) => Ok(Column::text(label, texts)),
                (true, true) => {
                    let mixed = numbers.iter().zip(&texts).map(|(n, t)| match (n, t) {
                        (Some(v), _) => Cell::Number(*v),
                        (None, Some(s)) => Cell::Text(s.as_str()),
                        (None, None) => Cell::Missing,
                    });
                    Column::mixed(label, mixed)
                }
            }
        })
        .collect::<Result<Vec<_>>>()?;

    Table::new(columns)
}

fn row_num(row: usize) -> Result<u32> {
    u32::try_from(row).context("row index out of range for xlsx")
}

fn col_num(col: usize) -> Result<u16> {
    u16::try_from(col).context("column index out of range for xlsx")
}

fn write_table(sheet: &mut Worksheet, name: &str, table: &Table) -> Result<()> {
    sheet.set_name(name)?;
    for (c, label) in table.labels().enumerate() {
        let col = col_num(c)?;
        sheet.write_string(0, col, label.to_string())?;
        for row in 0..table.num_rows() {
            let r = row_num(row + 1)?;
            match table.cell(c, row) {
                Cell::Text(s) => {
                    sheet.write_string(r, col, s)?;
                }
                Cell::Number(v) if v.is_finite() => {
                    sheet.write_number(r, col, v)?;
                }
                Cell::Number(_) | Cell::Missing => {}
            }
        }
    }
    Ok(())
}

/// Copy cell values of a sheet we do not manage. Formatting is not kept.
fn write_range(sheet: &mut Worksheet, name: &str, range: &Range<Data>) -> Result<()> {
    sheet.set_name(name)?;
    let (row0, col0) = range.start().unwrap_or((0, 0));
    for (r, c, cell) in range.used_cells() {
        let row = row_num(row0 as usize + r)?;
        let col = col_num(col0 as usize + c)?;
        match cell {
            Data::Float(f) if f.is_finite() => {
                sheet.write_number(row, col, *f)?;
            }
            Data::Int(i) => {
                sheet.write_number(row, col, *i as f64)?;
            }
            Data::Bool(b) => {
                sheet.write_boolean(row, col, *b)?;
            }
            Data::DateTime(dt) => {
                sheet.write_number(row, col, dt.as_f64())?;
            }
            other => {
                if let Some(text) = cell_text(other) {
                    sheet.write_string(row, col, text)?;
                }
            }
        }
    }
    Ok(())
}
