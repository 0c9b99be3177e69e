//! # Drug Stock Limits
//!
//! Turns per-drug consumption ledgers exported from a hospital dispensing
//! system into dense daily sales/stock series, then derives rolling sales
//! statistics, a value tier with recommended reorder limits, and a shortage rate.
//!
//! ## Core Concepts
//!
//! - **Ledger**: an irregular transaction log, one row per stock movement
//! - **Daily Series**: one row per calendar day with net sales and closing stock
//! - **Rolling Sums**: 5/7/10-day sales totals whose 95th percentile drives the limits
//! - **Tier**: a value band chosen from `P95(10-day sum) * unit price`
//! - **Shortage Rate**: shortage days over on-sale days in a window
//!
//! ## Example
//!
//! ```rust,ignore
//! use drug_stock_limits::*;
//!
//! let config = AnalysisConfig::new("ledgers", "export");
//! let table = read_ledger(std::path::Path::new("ledgers/1.xls"))?;
//!
//! match LedgerAnalyzer::new(&config).analyze(&table)? {
//!     AnalysisOutcome::Analyzed(analysis) => {
//!         println!(
//!             "{}: {} (limits {:.2}..{:.2})",
//!             analysis.basic_info.display_name(),
//!             analysis.classification.label,
//!             analysis.classification.lower_limit,
//!             analysis.classification.upper_limit,
//!         );
//!     }
//!     AnalysisOutcome::NoSalesRecord { basic_info } => {
//!         println!("{} has no inpatient dispenses", basic_info.display_name());
//!     }
//! }
//! ```

pub mod batch;
pub mod chart;
pub mod engine;
pub mod error;
pub mod export;
pub mod ingestion;
pub mod ledger;
pub mod rolling;
pub mod schema;
pub mod shortage;
pub mod tiering;
pub mod utils;

pub use batch::{run_batch, shortage_for_file, BatchSummary, SkippedFile};
pub use chart::{chart_file_name, render_drug_chart, ChartInput};
pub use engine::{
    build_daily_series, BuildOutcome, DailyPoint, DailySeries, DenseSeries, SeriesBuilder,
    StockOrigin,
};
pub use error::{Result, StockLimitsError};
pub use export::{AnalysisRecord, Exporter, ScreeningRecord};
pub use ingestion::{discover_ledger_files, read_ledger};
pub use ledger::{
    parse_ledger, Cell, DrugBasicInfo, LedgerTable, ParsedLedger, TransactionKind, TransactionRow,
};
pub use rolling::{compute_rolling_stats, RollingStats, RollingWindow, SalesSummary};
pub use schema::*;
pub use shortage::{
    screen_shortage_records, shortage_rate, ScreenedDay, Screening, ShortageRate, ShortageReport,
};
pub use tiering::{classify, Classification, TierClassifier};

use log::{debug, info, warn};

/// Everything derived from one drug's ledger.
#[derive(Debug, Clone)]
pub struct DrugAnalysis {
    pub basic_info: DrugBasicInfo,
    pub series: DailySeries,
    pub stats: RollingStats,
    pub classification: Classification,
    pub shortage: ShortageReport,
    pub dropped_rows: usize,
}

#[derive(Debug, Clone)]
pub enum AnalysisOutcome {
    Analyzed(Box<DrugAnalysis>),
    /// The ledger parsed but has no inpatient dispenses; nothing to classify.
    NoSalesRecord { basic_info: DrugBasicInfo },
}

/// Runs the per-ledger pipeline: parse, build the daily series, then
/// rolling statistics feeding both the classifier and the shortage rate.
pub struct LedgerAnalyzer<'a> {
    config: &'a AnalysisConfig,
}

impl<'a> LedgerAnalyzer<'a> {
    pub fn new(config: &'a AnalysisConfig) -> Self {
        Self { config }
    }

    pub fn analyze(&self, table: &LedgerTable) -> Result<AnalysisOutcome> {
        let parsed = parse_ledger(table, self.config.basic_info_row)?;
        self.analyze_parsed(parsed)
    }

    pub fn analyze_parsed(&self, parsed: ParsedLedger) -> Result<AnalysisOutcome> {
        let start = self.config.start()?;
        let end = self.config.end()?;
        let basic_info = parsed.basic_info;

        if parsed.dropped_rows > 0 {
            debug!(
                "{}: {} rows without complete transaction fields were dropped",
                basic_info.display_name(),
                parsed.dropped_rows
            );
        }

        let outcome = SeriesBuilder::new(self.config.net_sales_policy)
            .with_window_policy(self.config.window_policy)
            .build(&parsed.transactions, start, end)?;

        let series = match outcome {
            BuildOutcome::Series(series) => series,
            BuildOutcome::NoSalesRecord => {
                warn!("{} has no inpatient dispense records", basic_info.display_name());
                return Ok(AnalysisOutcome::NoSalesRecord { basic_info });
            }
        };

        let stats = compute_rolling_stats(&series, &self.config.effective_windows())?;
        let classification = classify(&basic_info, &stats, &self.config.tier_table)?;
        let shortage = shortage_rate(&series, None, None)?;

        info!(
            "Analyzed {} over {}..{} ({} days)",
            basic_info.display_name(),
            series.start,
            series.end,
            series.len()
        );

        Ok(AnalysisOutcome::Analyzed(Box::new(DrugAnalysis {
            basic_info,
            series,
            stats,
            classification,
            shortage,
            dropped_rows: parsed.dropped_rows,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::*;
    use chrono::NaiveDate;

    fn headers() -> Vec<String> {
        [
            COL_CUSTOM_CODE,
            COL_DRUG_NAME,
            COL_SPECIFICATION,
            COL_UNIT,
            COL_KIND,
            COL_QUANTITY,
            COL_STOCK,
            COL_OPERATION_DATE,
            COL_PURCHASE_AMOUNT,
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    fn tx(kind: &str, qty: f64, stock: f64, date: &str) -> Vec<Cell> {
        vec![
            Cell::Empty,
            "氯化钠注射液".into(),
            "0.9%*100ml".into(),
            "瓶".into(),
            kind.into(),
            qty.into(),
            stock.into(),
            date.into(),
            Cell::Empty,
        ]
    }

    fn summary(qty: f64, amount: f64) -> Vec<Cell> {
        vec![
            "88".into(),
            "氯化钠注射液".into(),
            "0.9%*100ml".into(),
            "瓶".into(),
            Cell::Empty,
            qty.into(),
            Cell::Empty,
            Cell::Empty,
            amount.into(),
        ]
    }

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    #[test]
    fn test_analyze_small_ledger() {
        let table = LedgerTable::new(
            headers(),
            vec![
                tx(INPATIENT_DISPENSE, -10.0, 90.0, "2024-01-01 08:00:00"),
                tx(INPATIENT_DISPENSE, -5.0, 85.0, "2024-01-03 08:00:00"),
                summary(-15.0, 150.0),
            ],
        );
        let config = AnalysisConfig::new("in", "out");

        let analysis = match LedgerAnalyzer::new(&config).analyze(&table).unwrap() {
            AnalysisOutcome::Analyzed(a) => a,
            other => panic!("expected an analysis, got {:?}", other),
        };

        assert_eq!(analysis.basic_info.custom_code, "88");
        assert_eq!(analysis.series.start, d(1));
        assert_eq!(analysis.series.end, d(3));
        assert_eq!(analysis.series.sales(), vec![10.0, 0.0, 5.0]);
        assert_eq!(
            analysis.series.closing_stock(),
            vec![Some(90.0), Some(90.0), Some(85.0)]
        );

        // 10-day sums 10, 10, 15 -> P95 14.5; unit price 10 -> value 145
        let c = &analysis.classification;
        assert_eq!(c.tier, 1);
        assert!((c.sales_value_10d - 145.0).abs() < 1e-9);
        assert!((c.upper_limit - 21.75).abs() < 1e-9);
        assert!(c.lower_limit <= c.upper_limit);

        assert_eq!(analysis.shortage.on_sale_days, 3);
        assert_eq!(analysis.shortage.rate, ShortageRate::Rate(0.0));
        assert_eq!(analysis.dropped_rows, 1);
    }

    #[test]
    fn test_requested_window_policy_extends_series() {
        let table = LedgerTable::new(
            headers(),
            vec![
                tx(INPATIENT_DISPENSE, -10.0, 90.0, "2024-01-01"),
                tx(INPATIENT_DISPENSE, -5.0, 85.0, "2024-01-03"),
                summary(-15.0, 150.0),
            ],
        );
        let mut config = AnalysisConfig::new("in", "out");
        config.window_policy = WindowPolicy::Requested;
        config.start_date = Some("2024-01-01".to_string());
        config.end_date = Some("2024-01-04".to_string());

        let outcome = LedgerAnalyzer::new(&config).analyze(&table).unwrap();
        let AnalysisOutcome::Analyzed(analysis) = outcome else {
            panic!("expected an analysis");
        };
        assert_eq!(analysis.series.len(), 4);
        assert_eq!(analysis.series.get(&d(4)).unwrap().closing_stock, Some(85.0));
        assert_eq!(analysis.shortage.effective_end, d(4));
    }

    #[test]
    fn test_no_dispenses_is_reported_not_failed() {
        let table = LedgerTable::new(
            headers(),
            vec![tx("采购入库", 100.0, 100.0, "2024-01-01"), summary(100.0, 800.0)],
        );
        let config = AnalysisConfig::new("in", "out");

        match LedgerAnalyzer::new(&config).analyze(&table).unwrap() {
            AnalysisOutcome::NoSalesRecord { basic_info } => {
                assert_eq!(basic_info.custom_code, "88")
            }
            other => panic!("expected NoSalesRecord, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_quantity_is_degenerate() {
        let table = LedgerTable::new(
            headers(),
            vec![
                tx(INPATIENT_DISPENSE, -3.0, 10.0, "2024-01-01"),
                summary(0.0, 150.0),
            ],
        );
        let config = AnalysisConfig::new("in", "out");
        let result = LedgerAnalyzer::new(&config).analyze(&table);
        assert!(matches!(
            result,
            Err(StockLimitsError::DegenerateStatistic(_))
        ));
    }
}
