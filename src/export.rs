//! Append-mode CSV exports. Each table writes its header only when the file
//! is created, so repeated runs accumulate rows in one file.

use crate::error::{Result, StockLimitsError};
use crate::ledger::DrugBasicInfo;
use crate::rolling::RollingStats;
use crate::shortage::{ScreenedDay, ShortageReport};
use crate::tiering::Classification;
use crate::utils::round2;
use chrono::NaiveDate;
use log::info;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

pub const SUMMARY_FILE_NAME: &str = "销量分析结果.csv";
pub const SHORTAGE_RECORDS_FILE_NAME: &str = "shortage_records.csv";
pub const NON_SHORTAGE_RECORDS_FILE_NAME: &str = "random_non_shortage_records.csv";

/// Latest 7-day mean sales scaled to a 10-day order quantity.
const PLAN_WINDOW: usize = 7;
const PLAN_HORIZON_DAYS: u32 = 10;

/// One row of the per-drug summary table. Numbers are rounded to two decimals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    #[serde(rename = "文件名")]
    pub file_name: String,
    #[serde(rename = "自定义码")]
    pub custom_code: String,
    #[serde(rename = "药品名称")]
    pub name: String,
    #[serde(rename = "规格")]
    pub specification: String,
    #[serde(rename = "单位")]
    pub unit: String,
    #[serde(rename = "拟设下限")]
    pub lower_limit: f64,
    #[serde(rename = "拟设上限")]
    pub upper_limit: f64,
    #[serde(rename = "10日销售额P95")]
    pub sales_value_10d: f64,
    #[serde(rename = "销量价值等级")]
    pub tier: u8,
    #[serde(rename = "等级名称")]
    pub tier_label: String,
    #[serde(rename = "销量波动")]
    pub relative_std: Option<f64>,
    #[serde(rename = "库存天数")]
    pub days_of_supply: Option<f64>,
    #[serde(rename = "日均销量")]
    pub mean_daily_sales: f64,
    #[serde(rename = "10日计划量")]
    pub planned_quantity_10d: Option<f64>,
    #[serde(rename = "0销量天数占比")]
    pub zero_sales_ratio: f64,
    #[serde(rename = "缺货率")]
    pub shortage_rate: Option<f64>,
    #[serde(rename = "起始日期")]
    pub start_date: NaiveDate,
    #[serde(rename = "结束日期")]
    pub end_date: NaiveDate,
}

impl AnalysisRecord {
    pub fn new(
        file_name: &str,
        basic_info: &DrugBasicInfo,
        classification: &Classification,
        stats: &RollingStats,
        shortage: &ShortageReport,
    ) -> Self {
        let summary = &stats.summary;
        Self {
            file_name: file_name.to_string(),
            custom_code: basic_info.custom_code.clone(),
            name: basic_info.name.clone(),
            specification: basic_info.specification.clone(),
            unit: basic_info.unit.clone(),
            lower_limit: round2(classification.lower_limit),
            upper_limit: round2(classification.upper_limit),
            sales_value_10d: round2(classification.sales_value_10d),
            tier: classification.tier,
            tier_label: classification.label.clone(),
            relative_std: summary.relative_std.map(round2),
            days_of_supply: summary.days_of_supply.map(round2),
            mean_daily_sales: round2(summary.mean_daily_sales),
            planned_quantity_10d: stats
                .projected_quantity(PLAN_WINDOW, PLAN_HORIZON_DAYS)
                .and_then(|plan| plan.last().copied())
                .map(round2),
            zero_sales_ratio: round2(summary.zero_sales_ratio),
            shortage_rate: shortage.rate.value().map(round2),
            start_date: stats.start,
            end_date: stats.end,
        }
    }
}

/// One screened day tagged with the drug it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreeningRecord {
    #[serde(rename = "操作日期")]
    pub date: NaiveDate,
    #[serde(rename = "当日销量")]
    pub sales: f64,
    #[serde(rename = "当日库存")]
    pub closing_stock: Option<f64>,
    #[serde(rename = "近期日均销量")]
    pub rolling_mean_sales: f64,
    #[serde(rename = "药品名称")]
    pub name: String,
    #[serde(rename = "规格")]
    pub specification: String,
    #[serde(rename = "单位")]
    pub unit: String,
    #[serde(rename = "源文件名")]
    pub file_name: String,
}

impl ScreeningRecord {
    pub fn new(file_name: &str, basic_info: &DrugBasicInfo, day: &ScreenedDay) -> Self {
        Self {
            date: day.date,
            sales: round2(day.sales),
            closing_stock: day.closing_stock.map(round2),
            rolling_mean_sales: round2(day.rolling_mean_sales),
            name: basic_info.name.clone(),
            specification: basic_info.specification.clone(),
            unit: basic_info.unit.clone(),
            file_name: file_name.to_string(),
        }
    }
}

/// Appends `records` to `path`, creating parent directories and writing the
/// header row only when the file does not exist yet.
pub fn append_records<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
    let export_err = |details: String| StockLimitsError::Export {
        path: path.display().to_string(),
        details,
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| export_err(e.to_string()))?;
    }

    let write_header = !path.exists();
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| export_err(e.to_string()))?;

    let mut writer = csv::WriterBuilder::new()
        .has_headers(write_header)
        .from_writer(file);

    for record in records {
        writer
            .serialize(record)
            .map_err(|e| export_err(e.to_string()))?;
    }
    writer.flush().map_err(|e| export_err(e.to_string()))?;

    info!("Appended {} rows to {}", records.len(), path.display());
    Ok(())
}

pub struct Exporter {
    export_dir: PathBuf,
}

impl Exporter {
    pub fn new(export_dir: impl Into<PathBuf>) -> Self {
        Self {
            export_dir: export_dir.into(),
        }
    }

    pub fn export_dir(&self) -> &Path {
        &self.export_dir
    }

    pub fn summary_path(&self) -> PathBuf {
        self.export_dir.join(SUMMARY_FILE_NAME)
    }

    pub fn write_summary(&self, records: &[AnalysisRecord]) -> Result<PathBuf> {
        let path = self.summary_path();
        append_records(&path, records)?;
        Ok(path)
    }

    pub fn write_shortage_records(&self, records: &[ScreeningRecord]) -> Result<PathBuf> {
        let path = self.export_dir.join(SHORTAGE_RECORDS_FILE_NAME);
        append_records(&path, records)?;
        Ok(path)
    }

    pub fn write_non_shortage_records(&self, records: &[ScreeningRecord]) -> Result<PathBuf> {
        let path = self.export_dir.join(NON_SHORTAGE_RECORDS_FILE_NAME);
        append_records(&path, records)?;
        Ok(path)
    }
}
