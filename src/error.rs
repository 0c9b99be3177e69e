use chrono::NaiveDate;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StockLimitsError {
    #[error("Required column '{0}' is missing from the ledger header")]
    MissingColumn(String),

    #[error("Invalid value in column '{column}' at row {row}: {details}")]
    InvalidCell {
        column: String,
        row: usize,
        details: String,
    },

    #[error("Basic info row ({row}) is incomplete: field '{field}' is empty")]
    BasicInfoIncomplete { row: String, field: String },

    #[error("Workbook error: {0}")]
    Workbook(String),

    #[error("Date error: {0}")]
    DateError(String),

    #[error("Requested window {start}..={end} does not overlap the observed ledger dates")]
    EmptyWindow { start: NaiveDate, end: NaiveDate },

    #[error("Degenerate statistic: {0}")]
    DegenerateStatistic(String),

    #[error("Invalid tier table: {0}")]
    InvalidTierTable(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Export to '{path}' failed: {details}")]
    Export { path: String, details: String },

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl StockLimitsError {
    /// Errors that make a single ledger unusable. The batch loop logs these and moves on.
    pub fn is_parse_error(&self) -> bool {
        matches!(
            self,
            StockLimitsError::MissingColumn(_)
                | StockLimitsError::InvalidCell { .. }
                | StockLimitsError::BasicInfoIncomplete { .. }
                | StockLimitsError::Workbook(_)
                | StockLimitsError::CsvError(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, StockLimitsError>;
