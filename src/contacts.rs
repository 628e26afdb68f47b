use std::fmt;
use std::path::PathBuf;

use calamine::{Data, Reader, open_workbook_auto};
use rust_xlsxwriter::{Format, Workbook, Worksheet, XlsxError};
use thiserror::Error;

use crate::coordinates::temp_sibling;

/// Column widths reapplied every time the sheet is written (A, B, C, D).
pub const DEFAULT_COLUMN_WIDTHS: [f64; 4] = [9.0, 9.0, 15.0, 15.0];

const PHONE_LEN: usize = 11;

#[derive(Debug, Error)]
pub enum SheetError {
    #[error("spreadsheet not found: {0}")]
    Missing(PathBuf),

    #[error("failed to read {path}: {reason}")]
    Read { path: PathBuf, reason: String },

    #[error("{0} has no worksheet")]
    NoWorksheet(PathBuf),

    #[error("column {0:?} not found in header row")]
    MissingColumn(String),

    #[error("failed to write spreadsheet: {0}")]
    Write(#[from] XlsxError),

    #[error("failed to replace {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Number formats used when writing date and duration cells back. The
/// workbook's own display format is not preserved, only the value and kind.
const DATETIME_FORMAT: &str = "yyyy-mm-dd hh:mm:ss";
const DURATION_FORMAT: &str = "[h]:mm:ss";

/// A spreadsheet cell, kept typed so untouched columns survive a rewrite.
/// Cells calamine reports as errors or ISO strings come back as text.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
    /// Excel serial date.
    DateTime(f64),
    /// Elapsed time in days.
    Duration(f64),
}

impl Cell {
    pub fn is_blank(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Text form of the cell. Whole numbers print without a fractional part,
    /// so a phone number stored as `13062812446.0` reads as `13062812446`.
    pub fn text(&self) -> String {
        match self {
            Cell::Empty => String::new(),
            Cell::Text(s) => s.trim().to_string(),
            Cell::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => format!("{}", *n as i64),
            Cell::Number(n) => n.to_string(),
            Cell::Bool(b) => b.to_string(),
            Cell::DateTime(serial) | Cell::Duration(serial) => serial.to_string(),
        }
    }
}

impl From<&Data> for Cell {
    fn from(data: &Data) -> Self {
        match data {
            Data::Empty => Cell::Empty,
            Data::String(s) => Cell::Text(s.clone()),
            Data::Int(i) => Cell::Number(*i as f64),
            Data::Float(f) => Cell::Number(*f),
            Data::Bool(b) => Cell::Bool(*b),
            Data::DateTime(dt) if dt.is_duration() => Cell::Duration(dt.as_f64()),
            Data::DateTime(dt) => Cell::DateTime(dt.as_f64()),
            other => Cell::Text(other.to_string()),
        }
    }
}

/// Outcome recorded in the status column. Any non-empty status means the
/// row is skipped on later runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowStatus {
    Processed,
    AddFailed,
    InvalidPhone,
    Error(String),
    /// A label this tool did not write; still counts as handled.
    Other(String),
}

impl RowStatus {
    pub fn parse(text: &str) -> Option<RowStatus> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        Some(match text {
            "processed" => RowStatus::Processed,
            "add-failed" => RowStatus::AddFailed,
            "invalid-phone" => RowStatus::InvalidPhone,
            _ => match text.strip_prefix("error:") {
                Some(detail) => RowStatus::Error(detail.trim().to_string()),
                None => RowStatus::Other(text.to_string()),
            },
        })
    }
}

impl fmt::Display for RowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowStatus::Processed => f.write_str("processed"),
            RowStatus::AddFailed => f.write_str("add-failed"),
            RowStatus::InvalidPhone => f.write_str("invalid-phone"),
            RowStatus::Error(detail) => write!(f, "error: {detail}"),
            RowStatus::Other(label) => f.write_str(label),
        }
    }
}

/// Exactly 11 ASCII digits.
pub fn is_valid_phone(phone: &str) -> bool {
    phone.len() == PHONE_LEN && phone.bytes().all(|b| b.is_ascii_digit())
}

/// Per-status row counts for the end-of-run report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    pub total: usize,
    pub processed: usize,
    pub failed: usize,
    pub invalid: usize,
    pub errored: usize,
    pub unprocessed: usize,
}

impl Summary {
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.processed as f64 / self.total as f64 * 100.0
        }
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "total rows:   {}", self.total)?;
        writeln!(f, "processed:    {} ({:.1}%)", self.processed, self.success_rate())?;
        writeln!(f, "add failed:   {}", self.failed)?;
        writeln!(f, "invalid:      {}", self.invalid)?;
        writeln!(f, "errors:       {}", self.errored)?;
        write!(f, "unprocessed:  {}", self.unprocessed)
    }
}

/// The contact table: a header row plus data rows, with the phone and status
/// columns located by header name.
#[derive(Debug, Clone, PartialEq)]
pub struct ContactSheet {
    headers: Vec<String>,
    rows: Vec<Vec<Cell>>,
    phone_col: usize,
    status_col: usize,
}

impl ContactSheet {
    /// Appends a status column when the header row lacks one.
    pub fn new(
        mut headers: Vec<String>,
        mut rows: Vec<Vec<Cell>>,
        phone_column: &str,
        status_column: &str,
    ) -> Result<Self, SheetError> {
        let find = |headers: &[String], name: &str| headers.iter().position(|h| h.trim() == name);

        let phone_col =
            find(&headers, phone_column).ok_or_else(|| SheetError::MissingColumn(phone_column.to_string()))?;
        let status_col = match find(&headers, status_column) {
            Some(col) => col,
            None => {
                headers.push(status_column.to_string());
                headers.len() - 1
            }
        };

        let width = rows.iter().map(Vec::len).max().unwrap_or(0).max(headers.len());
        headers.resize(width, String::new());
        for row in &mut rows {
            row.resize(width, Cell::Empty);
        }

        Ok(ContactSheet {
            headers,
            rows,
            phone_col,
            status_col,
        })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn phone(&self, row: usize) -> String {
        self.rows[row][self.phone_col].text()
    }

    pub fn status(&self, row: usize) -> Option<RowStatus> {
        RowStatus::parse(&self.rows[row][self.status_col].text())
    }

    pub fn set_status(&mut self, row: usize, status: RowStatus) {
        self.rows[row][self.status_col] = Cell::Text(status.to_string());
    }

    pub fn summary(&self) -> Summary {
        let mut summary = Summary {
            total: self.len(),
            ..Summary::default()
        };
        for row in 0..self.len() {
            match self.status(row) {
                None => summary.unprocessed += 1,
                Some(RowStatus::Processed) => summary.processed += 1,
                Some(RowStatus::AddFailed) => summary.failed += 1,
                Some(RowStatus::InvalidPhone) => summary.invalid += 1,
                Some(RowStatus::Error(_)) => summary.errored += 1,
                Some(RowStatus::Other(_)) => {}
            }
        }
        summary
    }
}

fn write_cell(
    worksheet: &mut Worksheet,
    row: u32,
    col: u16,
    cell: &Cell,
    datetime: &Format,
    duration: &Format,
) -> Result<(), XlsxError> {
    match cell {
        Cell::Empty => {}
        Cell::Text(s) => {
            worksheet.write_string(row, col, s)?;
        }
        Cell::Number(n) => {
            worksheet.write_number(row, col, *n)?;
        }
        Cell::Bool(b) => {
            worksheet.write_boolean(row, col, *b)?;
        }
        Cell::DateTime(serial) => {
            worksheet.write_number_with_format(row, col, *serial, datetime)?;
        }
        Cell::Duration(days) => {
            worksheet.write_number_with_format(row, col, *days, duration)?;
        }
    }
    Ok(())
}

/// Where contact rows are loaded from and progress is written back to.
pub trait ContactBook {
    fn load(&self) -> Result<ContactSheet, SheetError>;
    fn save(&mut self, sheet: &ContactSheet) -> Result<(), SheetError>;
}

/// `.xlsx` workbook on disk; only the first worksheet is used.
#[derive(Debug, Clone)]
pub struct XlsxBook {
    path: PathBuf,
    phone_column: String,
    status_column: String,
    column_widths: Vec<f64>,
}

impl XlsxBook {
    pub fn new(path: impl Into<PathBuf>, phone_column: impl Into<String>, status_column: impl Into<String>) -> Self {
        XlsxBook {
            path: path.into(),
            phone_column: phone_column.into(),
            status_column: status_column.into(),
            column_widths: DEFAULT_COLUMN_WIDTHS.to_vec(),
        }
    }

    fn read_error(&self, reason: impl ToString) -> SheetError {
        SheetError::Read {
            path: self.path.clone(),
            reason: reason.to_string(),
        }
    }
}

impl ContactBook for XlsxBook {
    fn load(&self) -> Result<ContactSheet, SheetError> {
        if !self.path.exists() {
            return Err(SheetError::Missing(self.path.clone()));
        }
        let mut workbook = open_workbook_auto(&self.path).map_err(|e| self.read_error(e))?;
        let range = workbook
            .worksheet_range_at(0)
            .ok_or_else(|| SheetError::NoWorksheet(self.path.clone()))?
            .map_err(|e| self.read_error(e))?;

        let mut rows = range.rows();
        let headers: Vec<String> = rows
            .next()
            .map(|header| header.iter().map(|c| Cell::from(c).text()).collect())
            .unwrap_or_default();
        let rows: Vec<Vec<Cell>> = rows.map(|row| row.iter().map(Cell::from).collect()).collect();

        let sheet = ContactSheet::new(headers, rows, &self.phone_column, &self.status_column)?;
        tracing::info!("loaded {} row(s) from {}", sheet.len(), self.path.display());
        Ok(sheet)
    }

    fn save(&mut self, sheet: &ContactSheet) -> Result<(), SheetError> {
        let mut workbook = Workbook::new();
        let worksheet = workbook.add_worksheet();

        for (col, header) in sheet.headers().iter().enumerate() {
            worksheet.write_string(0, col as u16, header)?;
        }
        let datetime = Format::new().set_num_format(DATETIME_FORMAT);
        let duration = Format::new().set_num_format(DURATION_FORMAT);
        for (index, row) in sheet.rows().iter().enumerate() {
            let row_num = index as u32 + 1;
            for (col, cell) in row.iter().enumerate() {
                write_cell(worksheet, row_num, col as u16, cell, &datetime, &duration)?;
            }
        }
        for (col, width) in self.column_widths.iter().enumerate() {
            worksheet.set_column_width(col as u16, *width)?;
        }

        let tmp = temp_sibling(&self.path);
        workbook.save(&tmp)?;
        std::fs::rename(&tmp, &self.path).map_err(|source| SheetError::Io {
            path: self.path.clone(),
            source,
        })?;
        tracing::debug!("saved progress to {}", self.path.display());
        Ok(())
    }
}
