use crate::error::{Result, StockLimitsError};
use crate::ledger::{Cell, LedgerTable};
use crate::utils::{excel_serial_to_date, parse_ledger_date};
use calamine::{Data, Reader};
use log::{debug, warn};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerFormat {
    Workbook,
    Csv,
}

impl LedgerFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "xls" | "xlsx" | "xlsm" => Some(LedgerFormat::Workbook),
            "csv" => Some(LedgerFormat::Csv),
            _ => None,
        }
    }
}

/// Ledger files in `dir`, ordered by numeric file stem when every stem is a
/// number and by stem text otherwise.
pub fn discover_ledger_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        // Lock files left behind by open spreadsheets
        if name.starts_with("~$") {
            continue;
        }
        if LedgerFormat::from_path(&path).is_some() {
            files.push(path);
        }
    }

    sort_ledger_files(&mut files);
    debug!("Discovered {} ledger files in {}", files.len(), dir.display());
    Ok(files)
}

pub fn sort_ledger_files(files: &mut [PathBuf]) {
    let stem = |p: &PathBuf| -> String {
        p.file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string()
    };

    if files.iter().all(|p| stem(p).parse::<u64>().is_ok()) {
        files.sort_by_key(|p| stem(p).parse::<u64>().unwrap_or(u64::MAX));
    } else {
        files.sort_by_key(stem);
    }
}

pub fn read_ledger(path: &Path) -> Result<LedgerTable> {
    match LedgerFormat::from_path(path) {
        Some(LedgerFormat::Workbook) => read_workbook(path),
        Some(LedgerFormat::Csv) => read_csv(path),
        None => Err(StockLimitsError::Workbook(format!(
            "Unsupported ledger file type: {}",
            path.display()
        ))),
    }
}

/// First worksheet, first row as headers.
pub fn read_workbook(path: &Path) -> Result<LedgerTable> {
    let mut workbook = calamine::open_workbook_auto(path).map_err(|e| {
        StockLimitsError::Workbook(format!("Failed to open {}: {e}", path.display()))
    })?;

    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| {
            StockLimitsError::Workbook(format!("{} has no worksheets", path.display()))
        })?
        .map_err(|e| {
            StockLimitsError::Workbook(format!("Failed to read {}: {e}", path.display()))
        })?;

    let mut rows = range.rows();
    let headers: Vec<String> = rows
        .next()
        .ok_or_else(|| StockLimitsError::Workbook(format!("{} is empty", path.display())))?
        .iter()
        .map(|d| match cell_from_data(d) {
            Cell::Empty => String::new(),
            cell => cell.as_text().unwrap_or_default(),
        })
        .collect();

    let rows: Vec<Vec<Cell>> = rows
        .map(|row| row.iter().map(cell_from_data).collect())
        .collect();

    Ok(LedgerTable::new(headers, rows))
}

pub fn cell_from_data(data: &Data) -> Cell {
    match data {
        Data::Empty => Cell::Empty,
        Data::String(s) => Cell::Text(s.clone()),
        Data::Float(f) => Cell::Number(*f),
        Data::Int(i) => Cell::Number(*i as f64),
        Data::Bool(b) => Cell::Text(b.to_string()),
        Data::DateTime(dt) => excel_serial_to_date(dt.as_f64())
            .map(Cell::Date)
            .unwrap_or(Cell::Empty),
        Data::DateTimeIso(s) => parse_ledger_date(s)
            .map(Cell::Date)
            .unwrap_or_else(|| Cell::Text(s.clone())),
        Data::DurationIso(s) => Cell::Text(s.clone()),
        Data::Error(e) => {
            warn!("Spreadsheet cell error {:?} treated as empty", e);
            Cell::Empty
        }
    }
}

pub fn read_csv(path: &Path) -> Result<LedgerTable> {
    let file = std::fs::File::open(path)?;
    read_csv_from(std::io::BufReader::new(file))
}

pub fn read_csv_from<R: std::io::Read>(reader: R) -> Result<LedgerTable> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers: Vec<String> = rdr
        .headers()?
        .iter()
        // Spreadsheet tools often prepend a BOM to UTF-8 exports
        .map(|h| h.trim_start_matches('\u{feff}').to_string())
        .collect();

    let mut rows = Vec::new();
    for record in rdr.records() {
        let record = record?;
        rows.push(
            record
                .iter()
                .map(|field| {
                    if field.is_empty() {
                        Cell::Empty
                    } else {
                        Cell::Text(field.to_string())
                    }
                })
                .collect(),
        );
    }

    Ok(LedgerTable::new(headers, rows))
}
