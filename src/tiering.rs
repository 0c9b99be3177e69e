use crate::error::{Result, StockLimitsError};
use crate::ledger::DrugBasicInfo;
use crate::rolling::RollingStats;
use crate::schema::{LimitFormula, TierRule, TierTable};
use log::info;
use serde::{Deserialize, Serialize};

/// Tier plus both reorder limits; always produced together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub tier: u8,
    pub label: String,
    pub upper_limit: f64,
    pub lower_limit: f64,
    pub upper_window: usize,
    pub lower_window: usize,
    /// `p95(rolling 10-day sum) * unit_price`
    pub sales_value_10d: f64,
    pub unit_price: f64,
}

/// Window whose P95 rolling sum, priced, keys the tier table.
pub const SALES_VALUE_WINDOW: usize = 10;

pub struct TierClassifier<'a> {
    table: &'a TierTable,
}

impl<'a> TierClassifier<'a> {
    pub fn new(table: &'a TierTable) -> Self {
        Self { table }
    }

    /// Highest rule whose threshold the value reaches; values below every
    /// threshold fall into the first rule.
    pub fn rule_for(&self, sales_value: f64) -> Result<&'a TierRule> {
        let first = self.table.rules.first().ok_or_else(|| {
            StockLimitsError::InvalidTierTable("At least one tier rule is required".to_string())
        })?;

        Ok(self
            .table
            .rules
            .iter()
            .rev()
            .find(|rule| sales_value >= rule.min_sales_value)
            .unwrap_or(first))
    }

    pub fn classify(
        &self,
        basic_info: &DrugBasicInfo,
        stats: &RollingStats,
    ) -> Result<Classification> {
        let unit_price = basic_info.unit_price().ok_or_else(|| {
            StockLimitsError::DegenerateStatistic(format!(
                "Unit price of {} is undefined: cumulative quantity is {}",
                basic_info.display_name(),
                basic_info.cumulative_quantity
            ))
        })?;

        let sales_value_10d = stats.p95(SALES_VALUE_WINDOW)? * unit_price;
        let rule = self.rule_for(sales_value_10d)?;

        let limit = |formula: &LimitFormula| -> Result<f64> {
            Ok(stats.p95(formula.window)? * formula.multiplier)
        };

        let classification = Classification {
            tier: rule.tier,
            label: rule.label.clone(),
            upper_limit: limit(&rule.upper)?,
            lower_limit: limit(&rule.lower)?,
            upper_window: rule.upper.window,
            lower_window: rule.lower.window,
            sales_value_10d,
            unit_price,
        };

        info!(
            "{} assigned tier {} ({}): 10-day sales value {:.2}, limits {:.2}..{:.2}",
            basic_info.display_name(),
            classification.tier,
            classification.label,
            classification.sales_value_10d,
            classification.lower_limit,
            classification.upper_limit
        );

        Ok(classification)
    }
}

pub fn classify(
    basic_info: &DrugBasicInfo,
    stats: &RollingStats,
    table: &TierTable,
) -> Result<Classification> {
    TierClassifier::new(table).classify(basic_info, stats)
}
