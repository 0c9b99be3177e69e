//! Directory-level runs. Each ledger file is processed end to end on its
//! own; a failing file is logged and skipped while the rest continue.
//! Results are merged and ordered by drug code only after every file is done.

use crate::chart::{render_drug_chart, ChartInput};
use crate::engine::SeriesBuilder;
use crate::error::{Result, StockLimitsError};
use crate::export::{AnalysisRecord, Exporter, ScreeningRecord};
use crate::ingestion::{discover_ledger_files, read_ledger};
use crate::ledger::parse_ledger;
use crate::schema::AnalysisConfig;
use crate::shortage::{screen_shortage_records, shortage_rate, Screening, ShortageReport};
use crate::{AnalysisOutcome, LedgerAnalyzer};
use log::{error, info};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedFile {
    pub file_name: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct BatchSummary {
    pub processed: usize,
    pub no_sales: Vec<String>,
    pub skipped: Vec<SkippedFile>,
    /// Summary rows ordered by custom code, then file name.
    pub records: Vec<AnalysisRecord>,
    pub charts: Vec<PathBuf>,
    pub exported: Vec<PathBuf>,
}

#[derive(Debug)]
enum FileOutcome {
    Analyzed {
        record: AnalysisRecord,
        screening: Vec<ScreeningRecord>,
        is_shortage: bool,
        chart: Option<PathBuf>,
    },
    NoSalesRecord {
        file_name: String,
    },
}

pub fn run_batch(config: &AnalysisConfig) -> Result<BatchSummary> {
    config.validate()?;
    let files = discover_ledger_files(&config.input_dir)?;
    info!(
        "Processing {} ledger files from {}",
        files.len(),
        config.input_dir.display()
    );

    let results: Vec<(String, Result<FileOutcome>)> = if config.parallel {
        files
            .par_iter()
            .map(|path| (file_name_of(path), process_file(path, config)))
            .collect()
    } else {
        files
            .iter()
            .map(|path| (file_name_of(path), process_file(path, config)))
            .collect()
    };

    let mut summary = BatchSummary::default();
    let mut shortage_records = Vec::new();
    let mut control_records = Vec::new();

    for (file_name, result) in results {
        match result {
            Ok(FileOutcome::Analyzed {
                record,
                screening,
                is_shortage,
                chart,
            }) => {
                summary.processed += 1;
                summary.records.push(record);
                summary.charts.extend(chart);
                if is_shortage {
                    shortage_records.extend(screening);
                } else {
                    control_records.extend(screening);
                }
            }
            Ok(FileOutcome::NoSalesRecord { file_name }) => {
                summary.no_sales.push(file_name);
            }
            Err(e) => {
                if e.is_parse_error() {
                    error!("Skipping malformed ledger {}: {}", file_name, e);
                } else {
                    error!("Skipping {}: {}", file_name, e);
                }
                summary.skipped.push(SkippedFile {
                    file_name,
                    reason: e.to_string(),
                });
            }
        }
    }

    sort_records(&mut summary.records);

    let exporter = Exporter::new(&config.export_dir);
    let exports: [(&str, Result<Option<PathBuf>>); 3] = [
        ("summary", write_if_any(&summary.records, |r| exporter.write_summary(r))),
        (
            "shortage records",
            write_if_any(&shortage_records, |r| exporter.write_shortage_records(r)),
        ),
        (
            "control sample",
            write_if_any(&control_records, |r| exporter.write_non_shortage_records(r)),
        ),
    ];
    for (what, result) in exports {
        match result {
            Ok(path) => summary.exported.extend(path),
            // Export failures lose this table for the run but never abort it
            Err(e) => error!("Failed to export {}: {}", what, e),
        }
    }

    info!(
        "Batch finished: {} analyzed, {} without sales, {} skipped",
        summary.processed,
        summary.no_sales.len(),
        summary.skipped.len()
    );

    Ok(summary)
}

fn write_if_any<T>(
    records: &[T],
    write: impl FnOnce(&[T]) -> Result<PathBuf>,
) -> Result<Option<PathBuf>> {
    if records.is_empty() {
        return Ok(None);
    }
    write(records).map(Some)
}

/// Numeric codes in numeric order ahead of any non-numeric ones.
pub fn sort_records(records: &mut [AnalysisRecord]) {
    records.sort_by(|a, b| {
        let key = |r: &AnalysisRecord| {
            (
                r.custom_code.parse::<u64>().map_err(|_| r.custom_code.clone()),
                r.file_name.clone(),
            )
        };
        key(a).cmp(&key(b))
    });
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn process_file(path: &Path, config: &AnalysisConfig) -> Result<FileOutcome> {
    let file_name = file_name_of(path);
    let file_stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    info!("Processing {}", file_name);

    let table = read_ledger(path)?;
    let analysis = match LedgerAnalyzer::new(config).analyze(&table)? {
        AnalysisOutcome::Analyzed(analysis) => analysis,
        AnalysisOutcome::NoSalesRecord { .. } => {
            return Ok(FileOutcome::NoSalesRecord { file_name });
        }
    };

    let screening = screen_shortage_records(
        &analysis.series,
        &analysis.stats,
        config.screening_window,
        config.non_shortage_sample_size,
    )?;
    let (days, is_shortage) = match screening {
        Screening::Shortages(days) => (days, true),
        Screening::ControlSample(days) => (days, false),
    };
    let screening: Vec<ScreeningRecord> = days
        .iter()
        .map(|day| ScreeningRecord::new(&file_name, &analysis.basic_info, day))
        .collect();

    let chart = if config.render_charts {
        let input = ChartInput {
            file_stem: &file_stem,
            basic_info: &analysis.basic_info,
            series: &analysis.series,
            stats: &analysis.stats,
            classification: &analysis.classification,
        };
        match render_drug_chart(&config.export_dir, &input) {
            Ok(path) => Some(path),
            Err(e) => {
                error!("Chart for {} was not written: {}", file_name, e);
                None
            }
        }
    } else {
        None
    };

    let record = AnalysisRecord::new(
        &file_name,
        &analysis.basic_info,
        &analysis.classification,
        &analysis.stats,
        &analysis.shortage,
    );

    Ok(FileOutcome::Analyzed {
        record,
        screening,
        is_shortage,
        chart,
    })
}

/// Shortage report for one ledger file. Skips classification, so ledgers
/// without a usable unit price still get a rate.
pub fn shortage_for_file(path: &Path, config: &AnalysisConfig) -> Result<ShortageReport> {
    let table = read_ledger(path)?;
    let parsed = parse_ledger(&table, config.basic_info_row)?;
    let start = config.start()?;
    let end = config.end()?;

    let series = SeriesBuilder::new(config.net_sales_policy)
        .with_window_policy(config.window_policy)
        .build(&parsed.transactions, start, end)?
        .into_series()
        .ok_or_else(|| {
            StockLimitsError::DegenerateStatistic(format!(
                "{} has no inpatient dispense records",
                parsed.basic_info.display_name()
            ))
        })?;

    shortage_rate(&series, start, end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn record(code: &str, file: &str) -> AnalysisRecord {
        AnalysisRecord {
            file_name: file.to_string(),
            custom_code: code.to_string(),
            name: String::new(),
            specification: String::new(),
            unit: String::new(),
            lower_limit: 0.0,
            upper_limit: 0.0,
            sales_value_10d: 0.0,
            tier: 1,
            tier_label: String::new(),
            relative_std: None,
            days_of_supply: None,
            mean_daily_sales: 0.0,
            planned_quantity_10d: None,
            zero_sales_ratio: 0.0,
            shortage_rate: None,
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        }
    }

    #[test]
    fn test_sort_records_by_code_then_file() {
        let mut records = vec![
            record("10", "a.xls"),
            record("X1", "b.xls"),
            record("2", "z.xls"),
            record("2", "c.xls"),
        ];
        sort_records(&mut records);
        let order: Vec<(&str, &str)> = records
            .iter()
            .map(|r| (r.custom_code.as_str(), r.file_name.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![("2", "c.xls"), ("2", "z.xls"), ("10", "a.xls"), ("X1", "b.xls")]
        );
    }
}
