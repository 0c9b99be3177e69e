use crate::error::{Result, StockLimitsError};
use crate::tiering::SALES_VALUE_WINDOW;
use crate::utils::parse_date_param;
use chrono::NaiveDate;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Which ledger row carries the repeated drug identity fields.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, JsonSchema, Default)]
#[serde(rename_all = "PascalCase")]
pub enum BasicInfoRow {
    #[schemars(
        description = "Use the first data row. Older exports repeat the identity fields on every row."
    )]
    First,

    #[schemars(
        description = "Use the last data row. Current exports end with a summary row holding cumulative quantity and purchase amount."
    )]
    #[default]
    Last,
}

/// How a day whose returns exceed its dispenses is reported.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, JsonSchema, Default)]
#[serde(rename_all = "PascalCase")]
pub enum NetSalesPolicy {
    #[schemars(description = "Net sales below zero are reported as 0.")]
    #[default]
    FloorAtZero,

    #[schemars(description = "Net sales keep their sign, so a return-heavy day can be negative.")]
    AllowNegative,
}

/// How requested analysis bounds relate to the ledger's own date range.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, JsonSchema, Default)]
#[serde(rename_all = "PascalCase")]
pub enum WindowPolicy {
    #[schemars(
        description = "Clamp the requested bounds onto the observed range: start = max(requested, first observed), end = min(requested, last observed)."
    )]
    #[default]
    ClampToObserved,

    #[schemars(
        description = "Cover the requested bounds exactly. Days after the last observation carry its stock forward; days before the first one have unknown stock."
    )]
    Requested,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct LimitFormula {
    #[schemars(description = "Rolling-sum window in days whose P95 feeds this limit (e.g. 5, 7, 10)")]
    pub window: usize,

    #[schemars(description = "Multiplier applied to the P95 of that rolling sum")]
    pub multiplier: f64,
}

impl LimitFormula {
    pub fn new(window: usize, multiplier: f64) -> Self {
        Self { window, multiplier }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct TierRule {
    #[schemars(description = "Tier number; higher means more valuable sales")]
    pub tier: u8,

    #[schemars(
        description = "Inclusive lower bound of the estimated 10-day sales value for this tier, in currency units"
    )]
    pub min_sales_value: f64,

    #[schemars(description = "Formula for the upper reorder limit")]
    pub upper: LimitFormula,

    #[schemars(description = "Formula for the lower reorder limit")]
    pub lower: LimitFormula,

    #[schemars(description = "Human readable tier name used in chart annotations")]
    pub label: String,
}

/// Maps an estimated 10-day sales value onto a tier and its limit formulas.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct TierTable {
    #[schemars(description = "Rules ordered by ascending min_sales_value")]
    pub rules: Vec<TierRule>,
}

impl Default for TierTable {
    fn default() -> Self {
        let rule = |tier, min_sales_value, upper, lower, label: &str| TierRule {
            tier,
            min_sales_value,
            upper,
            lower,
            label: label.to_string(),
        };

        Self {
            rules: vec![
                rule(1, 0.0, LimitFormula::new(10, 1.5), LimitFormula::new(7, 1.5), "极低值"),
                rule(2, 500.0, LimitFormula::new(10, 1.3), LimitFormula::new(7, 1.3), "低值"),
                rule(3, 1000.0, LimitFormula::new(10, 1.1), LimitFormula::new(7, 1.1), "中等值"),
                rule(4, 5000.0, LimitFormula::new(10, 1.0), LimitFormula::new(7, 1.0), "高值"),
                rule(5, 10000.0, LimitFormula::new(7, 1.0), LimitFormula::new(5, 1.0), "极高值"),
            ],
        }
    }
}

impl TierTable {
    pub fn validate(&self) -> Result<()> {
        if self.rules.is_empty() {
            return Err(StockLimitsError::InvalidTierTable(
                "At least one tier rule is required".to_string(),
            ));
        }

        for (idx, rule) in self.rules.iter().enumerate() {
            if !rule.min_sales_value.is_finite() {
                return Err(StockLimitsError::InvalidTierTable(format!(
                    "Rule #{} has a non-finite threshold",
                    idx
                )));
            }
            for formula in [&rule.upper, &rule.lower] {
                if formula.window == 0 {
                    return Err(StockLimitsError::InvalidTierTable(format!(
                        "Rule #{} (tier {}) uses a zero-day window",
                        idx, rule.tier
                    )));
                }
                if !formula.multiplier.is_finite() || formula.multiplier < 0.0 {
                    return Err(StockLimitsError::InvalidTierTable(format!(
                        "Rule #{} (tier {}) has invalid multiplier {}",
                        idx, rule.tier, formula.multiplier
                    )));
                }
            }
        }

        for pair in self.rules.windows(2) {
            if pair[1].min_sales_value <= pair[0].min_sales_value {
                return Err(StockLimitsError::InvalidTierTable(format!(
                    "Thresholds must strictly increase: {} then {}",
                    pair[0].min_sales_value, pair[1].min_sales_value
                )));
            }
            if pair[1].tier <= pair[0].tier {
                return Err(StockLimitsError::InvalidTierTable(format!(
                    "Tier numbers must strictly increase: {} then {}",
                    pair[0].tier, pair[1].tier
                )));
            }
        }

        Ok(())
    }

    /// Every rolling window any rule reads from.
    pub fn required_windows(&self) -> Vec<usize> {
        let mut windows: Vec<usize> = self
            .rules
            .iter()
            .flat_map(|r| [r.upper.window, r.lower.window])
            .collect();
        windows.sort_unstable();
        windows.dedup();
        windows
    }
}

fn default_rolling_windows() -> Vec<usize> {
    vec![5, 7, 10]
}

fn default_screening_window() -> usize {
    7
}

fn default_sample_size() -> usize {
    5
}

fn default_true() -> bool {
    true
}

/// Run-wide settings, built once and passed into every component call.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AnalysisConfig {
    #[schemars(description = "Directory holding one ledger spreadsheet per drug")]
    pub input_dir: PathBuf,

    #[schemars(description = "Directory receiving charts, summary tables and screening records")]
    pub export_dir: PathBuf,

    #[serde(default)]
    #[schemars(description = "Inclusive analysis start in YYYY-MM-DD. Unset means the ledger's own first date.")]
    pub start_date: Option<String>,

    #[serde(default)]
    #[schemars(description = "Inclusive analysis end in YYYY-MM-DD. Unset means the ledger's own last date.")]
    pub end_date: Option<String>,

    #[serde(default)]
    #[schemars(description = "Row holding drug identity fields. Defaults to Last.")]
    pub basic_info_row: BasicInfoRow,

    #[serde(default)]
    #[schemars(description = "Treatment of days where returns exceed dispenses. Defaults to FloorAtZero.")]
    pub net_sales_policy: NetSalesPolicy,

    #[serde(default)]
    #[schemars(description = "Whether the daily series is clamped to observed dates. Defaults to ClampToObserved.")]
    pub window_policy: WindowPolicy,

    #[serde(default = "default_rolling_windows")]
    #[schemars(description = "Rolling windows in days. Defaults to [5, 7, 10].")]
    pub rolling_windows: Vec<usize>,

    #[serde(default)]
    #[schemars(description = "Tier thresholds and limit formulas")]
    pub tier_table: TierTable,

    #[serde(default = "default_screening_window")]
    #[schemars(
        description = "Rolling mean window used to flag shortage records (closing stock below mean daily sales)"
    )]
    pub screening_window: usize,

    #[serde(default = "default_sample_size")]
    #[schemars(description = "Random days exported for drugs without any shortage record")]
    pub non_shortage_sample_size: usize,

    #[serde(default = "default_true")]
    #[schemars(description = "Render one SVG chart per drug")]
    pub render_charts: bool,

    #[serde(default)]
    #[schemars(description = "Process files in parallel, one file per task")]
    pub parallel: bool,
}

impl AnalysisConfig {
    pub fn new(input_dir: impl Into<PathBuf>, export_dir: impl Into<PathBuf>) -> Self {
        Self {
            input_dir: input_dir.into(),
            export_dir: export_dir.into(),
            start_date: None,
            end_date: None,
            basic_info_row: BasicInfoRow::default(),
            net_sales_policy: NetSalesPolicy::default(),
            window_policy: WindowPolicy::default(),
            rolling_windows: default_rolling_windows(),
            tier_table: TierTable::default(),
            screening_window: default_screening_window(),
            non_shortage_sample_size: default_sample_size(),
            render_charts: true,
            parallel: false,
        }
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: AnalysisConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn start(&self) -> Result<Option<NaiveDate>> {
        parse_date_param(self.start_date.as_deref())
    }

    pub fn end(&self) -> Result<Option<NaiveDate>> {
        parse_date_param(self.end_date.as_deref())
    }

    /// Rolling windows plus every window the classifier and screening read,
    /// deduplicated.
    pub fn effective_windows(&self) -> Vec<usize> {
        let mut windows = self.rolling_windows.clone();
        windows.extend(self.tier_table.required_windows());
        windows.push(SALES_VALUE_WINDOW);
        windows.push(self.screening_window);
        windows.sort_unstable();
        windows.dedup();
        windows
    }

    pub fn validate(&self) -> Result<()> {
        let start = self.start()?;
        let end = self.end()?;
        if let (Some(s), Some(e)) = (start, end) {
            if e < s {
                return Err(StockLimitsError::InvalidConfig(format!(
                    "end_date {} is before start_date {}",
                    e, s
                )));
            }
        }

        if self.rolling_windows.iter().any(|&w| w == 0) || self.screening_window == 0 {
            return Err(StockLimitsError::InvalidConfig(
                "Rolling windows must be at least one day".to_string(),
            ));
        }

        self.tier_table.validate()
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(AnalysisConfig)
    }

    pub fn schema_as_json() -> std::result::Result<String, serde_json::Error> {
        let schema = Self::generate_json_schema();
        serde_json::to_string_pretty(&schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_generation() {
        let schema_json = AnalysisConfig::schema_as_json().unwrap();
        assert!(schema_json.contains("input_dir"));
        assert!(schema_json.contains("tier_table"));
        assert!(schema_json.contains("net_sales_policy"));
    }

    #[test]
    fn test_default_tier_table_is_valid() {
        let table = TierTable::default();
        assert!(table.validate().is_ok());
        assert_eq!(table.rules.len(), 5);
        assert_eq!(table.required_windows(), vec![5, 7, 10]);
    }

    #[test]
    fn test_effective_windows_include_sales_value_window() {
        let mut config = AnalysisConfig::new("in", "out");
        config.rolling_windows = vec![5, 7];
        config.tier_table = TierTable {
            rules: vec![TierRule {
                tier: 1,
                min_sales_value: 0.0,
                upper: LimitFormula::new(7, 1.0),
                lower: LimitFormula::new(5, 1.0),
                label: "单档".to_string(),
            }],
        };
        config.validate().unwrap();

        // The classifier always reads the 10-day window
        assert_eq!(config.effective_windows(), vec![5, 7, SALES_VALUE_WINDOW]);
    }

    #[test]
    fn test_tier_table_rejects_unordered_thresholds() {
        let mut table = TierTable::default();
        table.rules[2].min_sales_value = 400.0;
        assert!(matches!(
            table.validate(),
            Err(StockLimitsError::InvalidTierTable(_))
        ));

        let empty = TierTable { rules: vec![] };
        assert!(empty.validate().is_err());
    }

    #[test]
    fn test_minimal_json_uses_defaults() {
        let json = r#"{ "input_dir": "in", "export_dir": "out", "start_date": "2023-04-01" }"#;
        let config: AnalysisConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.basic_info_row, BasicInfoRow::Last);
        assert_eq!(config.net_sales_policy, NetSalesPolicy::FloorAtZero);
        assert_eq!(config.window_policy, WindowPolicy::ClampToObserved);
        assert_eq!(config.rolling_windows, vec![5, 7, 10]);
        assert_eq!(config.tier_table, TierTable::default());
        assert!(config.render_charts);
        assert!(!config.parallel);
        assert_eq!(
            config.start().unwrap(),
            NaiveDate::from_ymd_opt(2023, 4, 1)
        );
        assert_eq!(config.end().unwrap(), None);
    }

    #[test]
    fn test_validate_rejects_inverted_dates() {
        let mut config = AnalysisConfig::new("in", "out");
        config.start_date = Some("2023-11-30".to_string());
        config.end_date = Some("2023-04-01".to_string());
        assert!(matches!(
            config.validate(),
            Err(StockLimitsError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_effective_windows_include_tier_and_screening() {
        let mut config = AnalysisConfig::new("in", "out");
        config.rolling_windows = vec![3];
        config.screening_window = 14;
        assert_eq!(config.effective_windows(), vec![3, 5, 7, 10, 14]);
    }
}
