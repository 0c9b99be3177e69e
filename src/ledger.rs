//! Ledger parsing: drug identity plus the transaction rows the series builder needs.
//!
//! The wire format is the dispensing system's export, whose Chinese column
//! headers are matched verbatim.

use crate::error::{Result, StockLimitsError};
use crate::schema::BasicInfoRow;
use crate::utils::{excel_serial_to_date, parse_ledger_date};
use chrono::NaiveDate;
use log::debug;
use serde::{Deserialize, Serialize};

pub const COL_CUSTOM_CODE: &str = "自定义码";
pub const COL_DRUG_NAME: &str = "药品名称";
pub const COL_SPECIFICATION: &str = "规格";
pub const COL_UNIT: &str = "单位";
pub const COL_QUANTITY: &str = "入出库数量";
pub const COL_PURCHASE_AMOUNT: &str = "购入金额";
pub const COL_MANUFACTURER: &str = "厂家";
pub const COL_KIND: &str = "类型";
pub const COL_STOCK: &str = "库存量";
pub const COL_OPERATION_DATE: &str = "操作日期";

/// Transaction type literal that drives sales.
pub const INPATIENT_DISPENSE: &str = "住院摆药";

const TRANSACTION_COLUMNS: [&str; 4] = [COL_KIND, COL_QUANTITY, COL_STOCK, COL_OPERATION_DATE];
const BASIC_INFO_COLUMNS: [&str; 6] = [
    COL_CUSTOM_CODE,
    COL_DRUG_NAME,
    COL_SPECIFICATION,
    COL_UNIT,
    COL_QUANTITY,
    COL_PURCHASE_AMOUNT,
];

/// A single spreadsheet cell, already normalised away from the reader's own types.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
    Date(NaiveDate),
}

impl Cell {
    pub fn is_empty(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(s) => s.trim().is_empty(),
            Cell::Number(n) => n.is_nan(),
            Cell::Date(_) => false,
        }
    }

    pub fn as_text(&self) -> Option<String> {
        match self {
            Cell::Empty => None,
            Cell::Text(s) => {
                let trimmed = s.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
            // Codes typed as numbers come back as floats; keep integers integral
            Cell::Number(n) if n.is_nan() => None,
            Cell::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => Some(format!("{}", *n as i64)),
            Cell::Number(n) => Some(n.to_string()),
            Cell::Date(d) => Some(d.format("%Y-%m-%d").to_string()),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Number(n) if !n.is_nan() => Some(*n),
            Cell::Text(s) => s.trim().replace(',', "").parse::<f64>().ok(),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Cell::Date(d) => Some(*d),
            Cell::Text(s) => parse_ledger_date(s),
            Cell::Number(n) => excel_serial_to_date(*n),
            Cell::Empty => None,
        }
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::Text(value.to_string())
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Cell::Number(value)
    }
}

impl From<NaiveDate> for Cell {
    fn from(value: NaiveDate) -> Self {
        Cell::Date(value)
    }
}

/// A raw ledger: header names plus data rows in ledger order.
#[derive(Debug, Clone, Default)]
pub struct LedgerTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl LedgerTable {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<Cell>>) -> Self {
        Self { headers, rows }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h.trim() == name)
    }

    fn require_column(&self, name: &str) -> Result<usize> {
        self.column_index(name)
            .ok_or_else(|| StockLimitsError::MissingColumn(name.to_string()))
    }

    fn cell(&self, row: usize, col: usize) -> &Cell {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .unwrap_or(&Cell::Empty)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrugBasicInfo {
    pub custom_code: String,
    pub name: String,
    pub specification: String,
    pub unit: String,
    /// Cumulative in/out quantity over the ledger's lifetime.
    pub cumulative_quantity: f64,
    /// Total purchase cost over the ledger's lifetime.
    pub purchase_amount: f64,
    pub manufacturer: Option<String>,
}

impl DrugBasicInfo {
    /// `|purchase_amount / cumulative_quantity|`, or `None` when the quantity is zero.
    pub fn unit_price(&self) -> Option<f64> {
        if self.cumulative_quantity == 0.0 || !self.cumulative_quantity.is_finite() {
            return None;
        }
        let price = (self.purchase_amount / self.cumulative_quantity).abs();
        price.is_finite().then_some(price)
    }

    pub fn display_name(&self) -> String {
        format!("{}_{}", self.name, self.specification)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionKind {
    InpatientDispense,
    Other(String),
}

impl TransactionKind {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed == INPATIENT_DISPENSE {
            TransactionKind::InpatientDispense
        } else {
            TransactionKind::Other(trimmed.to_string())
        }
    }

    pub fn is_dispense(&self) -> bool {
        matches!(self, TransactionKind::InpatientDispense)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRow {
    pub kind: TransactionKind,
    /// Signed quantity delta; dispenses are negative.
    pub quantity: f64,
    /// Stock on hand after this transaction.
    pub stock: f64,
    pub date: NaiveDate,
}

#[derive(Debug, Clone)]
pub struct ParsedLedger {
    pub basic_info: DrugBasicInfo,
    /// Valid transactions in ledger order.
    pub transactions: Vec<TransactionRow>,
    /// Rows dropped because one of the transaction fields was empty.
    pub dropped_rows: usize,
}

pub fn parse_ledger(table: &LedgerTable, basic_info_row: BasicInfoRow) -> Result<ParsedLedger> {
    for column in TRANSACTION_COLUMNS.iter().chain(BASIC_INFO_COLUMNS.iter()) {
        table.require_column(column)?;
    }

    if table.rows.is_empty() {
        return Err(StockLimitsError::Workbook(
            "Ledger contains no data rows".to_string(),
        ));
    }

    let basic_info = extract_basic_info(table, basic_info_row)?;
    let (transactions, dropped_rows) = extract_transactions(table)?;

    debug!(
        "Parsed ledger for {}: {} transactions kept, {} rows dropped",
        basic_info.display_name(),
        transactions.len(),
        dropped_rows
    );

    Ok(ParsedLedger {
        basic_info,
        transactions,
        dropped_rows,
    })
}

pub fn extract_basic_info(table: &LedgerTable, selector: BasicInfoRow) -> Result<DrugBasicInfo> {
    let row = match selector {
        BasicInfoRow::First => 0,
        BasicInfoRow::Last => table.rows.len().checked_sub(1).ok_or_else(|| {
            StockLimitsError::Workbook("Ledger contains no data rows".to_string())
        })?,
    };
    let row_label = format!("{:?} row #{}", selector, row);

    let text = |column: &str| -> Result<String> {
        let idx = table.require_column(column)?;
        table
            .cell(row, idx)
            .as_text()
            .ok_or_else(|| StockLimitsError::BasicInfoIncomplete {
                row: row_label.clone(),
                field: column.to_string(),
            })
    };

    let number = |column: &str| -> Result<f64> {
        let idx = table.require_column(column)?;
        let cell = table.cell(row, idx);
        if cell.is_empty() {
            return Err(StockLimitsError::BasicInfoIncomplete {
                row: row_label.clone(),
                field: column.to_string(),
            });
        }
        cell.as_f64().ok_or_else(|| StockLimitsError::InvalidCell {
            column: column.to_string(),
            row,
            details: format!("expected a number, found {:?}", cell),
        })
    };

    let manufacturer = table
        .column_index(COL_MANUFACTURER)
        .and_then(|idx| table.cell(row, idx).as_text());

    Ok(DrugBasicInfo {
        custom_code: text(COL_CUSTOM_CODE)?,
        name: text(COL_DRUG_NAME)?,
        specification: text(COL_SPECIFICATION)?,
        unit: text(COL_UNIT)?,
        cumulative_quantity: number(COL_QUANTITY)?,
        purchase_amount: number(COL_PURCHASE_AMOUNT)?,
        manufacturer,
    })
}

fn extract_transactions(table: &LedgerTable) -> Result<(Vec<TransactionRow>, usize)> {
    let kind_idx = table.require_column(COL_KIND)?;
    let qty_idx = table.require_column(COL_QUANTITY)?;
    let stock_idx = table.require_column(COL_STOCK)?;
    let date_idx = table.require_column(COL_OPERATION_DATE)?;

    let mut transactions = Vec::with_capacity(table.rows.len());
    let mut dropped = 0;

    for row in 0..table.rows.len() {
        let kind = table.cell(row, kind_idx);
        let qty = table.cell(row, qty_idx);
        let stock = table.cell(row, stock_idx);
        let date = table.cell(row, date_idx);

        if [kind, qty, stock, date].iter().any(|c| c.is_empty()) {
            dropped += 1;
            continue;
        }

        let invalid = |column: &str, cell: &Cell, expected: &str| StockLimitsError::InvalidCell {
            column: column.to_string(),
            row,
            details: format!("expected {}, found {:?}", expected, cell),
        };

        transactions.push(TransactionRow {
            kind: TransactionKind::parse(&kind.as_text().unwrap_or_default()),
            quantity: qty
                .as_f64()
                .ok_or_else(|| invalid(COL_QUANTITY, qty, "a number"))?,
            stock: stock
                .as_f64()
                .ok_or_else(|| invalid(COL_STOCK, stock, "a number"))?,
            date: date
                .as_date()
                .ok_or_else(|| invalid(COL_OPERATION_DATE, date, "a date"))?,
        });
    }

    Ok((transactions, dropped))
}
