//! Rolling sums and means over the dense daily series, plus whole-window statistics.
//!
//! Windows use minimum-one-observation semantics: the first `w - 1` days
//! aggregate over however many days exist so far instead of producing gaps.

use crate::engine::DailySeries;
use crate::error::{Result, StockLimitsError};
use crate::utils::percentile;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollingWindow {
    pub window: usize,
    /// Rolling sum ending on each day, aligned with `RollingStats::dates`.
    pub sums: Vec<f64>,
    /// Rolling mean ending on each day.
    pub means: Vec<f64>,
    pub p50_sum: f64,
    pub p95_sum: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalesSummary {
    pub days: usize,
    pub mean_daily_sales: f64,
    /// Sample standard deviation; `None` with fewer than two days.
    pub std_daily_sales: Option<f64>,
    /// `std / mean`; `None` when mean sales is zero or the deviation is undefined.
    pub relative_std: Option<f64>,
    pub zero_sales_days: usize,
    pub zero_sales_ratio: f64,
    /// Mean over days with known stock.
    pub mean_closing_stock: Option<f64>,
    /// Mean closing stock divided by mean daily sales.
    pub days_of_supply: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollingStats {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub dates: Vec<NaiveDate>,
    pub windows: BTreeMap<usize, RollingWindow>,
    pub summary: SalesSummary,
}

impl RollingStats {
    pub fn window(&self, window: usize) -> Option<&RollingWindow> {
        self.windows.get(&window)
    }

    pub fn p95(&self, window: usize) -> Result<f64> {
        self.window(window).map(|w| w.p95_sum).ok_or_else(|| {
            StockLimitsError::DegenerateStatistic(format!(
                "No {}-day rolling window was computed",
                window
            ))
        })
    }

    /// Rolling mean over `window` days scaled to a `horizon`-day plan quantity.
    pub fn projected_quantity(&self, window: usize, horizon: u32) -> Option<Vec<f64>> {
        self.window(window).map(|w| {
            w.means
                .iter()
                .map(|m| m * f64::from(horizon))
                .collect()
        })
    }
}

/// Trailing sums with at least one observation per window. Each window is
/// summed afresh so an all-zero window is exactly zero.
pub fn rolling_sums(values: &[f64], window: usize) -> Vec<f64> {
    (0..values.len())
        .map(|i| {
            let start = (i + 1).saturating_sub(window);
            values[start..=i].iter().sum()
        })
        .collect()
}

pub fn rolling_means(values: &[f64], window: usize) -> Vec<f64> {
    rolling_sums(values, window)
        .into_iter()
        .enumerate()
        .map(|(i, sum)| sum / (i + 1).min(window) as f64)
        .collect()
}

pub fn compute_rolling_stats(series: &DailySeries, windows: &[usize]) -> Result<RollingStats> {
    if series.is_empty() {
        return Err(StockLimitsError::DegenerateStatistic(
            "Cannot compute statistics over an empty series".to_string(),
        ));
    }
    if windows.iter().any(|&w| w == 0) {
        return Err(StockLimitsError::InvalidConfig(
            "Rolling windows must be at least one day".to_string(),
        ));
    }

    let sales = series.sales();

    let mut computed = BTreeMap::new();
    for &window in windows {
        let sums = rolling_sums(&sales, window);
        let means = rolling_means(&sales, window);
        // Non-empty series, so both percentiles exist
        let p50_sum = percentile(&sums, 0.5).unwrap_or(0.0);
        let p95_sum = percentile(&sums, 0.95).unwrap_or(0.0);

        computed.insert(
            window,
            RollingWindow {
                window,
                sums,
                means,
                p50_sum,
                p95_sum,
            },
        );
    }

    Ok(RollingStats {
        start: series.start,
        end: series.end,
        dates: series.dates(),
        windows: computed,
        summary: summarize(series),
    })
}

fn summarize(series: &DailySeries) -> SalesSummary {
    let sales = series.sales();
    let days = sales.len();
    let n = days as f64;

    let mean_daily_sales = sales.iter().sum::<f64>() / n;

    let std_daily_sales = if days > 1 {
        let variance = sales
            .iter()
            .map(|s| (s - mean_daily_sales).powi(2))
            .sum::<f64>()
            / (n - 1.0);
        Some(variance.sqrt())
    } else {
        None
    };

    let relative_std = match std_daily_sales {
        Some(std) if mean_daily_sales != 0.0 => Some(std / mean_daily_sales),
        _ => None,
    };

    let zero_sales_days = sales.iter().filter(|&&s| s == 0.0).count();

    let known_stock: Vec<f64> = series.closing_stock().into_iter().flatten().collect();
    let mean_closing_stock = if known_stock.is_empty() {
        None
    } else {
        Some(known_stock.iter().sum::<f64>() / known_stock.len() as f64)
    };

    let days_of_supply = match mean_closing_stock {
        Some(stock) if mean_daily_sales > 0.0 => Some(stock / mean_daily_sales),
        _ => None,
    };

    SalesSummary {
        days,
        mean_daily_sales,
        std_daily_sales,
        relative_std,
        zero_sales_days,
        zero_sales_ratio: zero_sales_days as f64 / n,
        mean_closing_stock,
        days_of_supply,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{DailyPoint, StockOrigin};

    fn series_from(sales: &[f64], stock: &[Option<f64>]) -> DailySeries {
        let start = NaiveDate::from_ymd_opt(2023, 4, 1).unwrap();
        let points = sales
            .iter()
            .zip(stock)
            .enumerate()
            .map(|(i, (&s, &c))| {
                (
                    start + chrono::Days::new(i as u64),
                    DailyPoint {
                        sales: s,
                        closing_stock: c,
                        stock_origin: if c.is_some() {
                            StockOrigin::Observed
                        } else {
                            StockOrigin::Unknown
                        },
                    },
                )
            })
            .collect::<BTreeMap<_, _>>();
        let end = *points.keys().next_back().unwrap();
        DailySeries { start, end, points }
    }

    #[test]
    fn test_rolling_sum_partial_windows_at_start() {
        let values = vec![3.0, 1.0, 4.0, 1.0, 5.0, 9.0, 2.0];
        let sums = rolling_sums(&values, 5);
        assert_eq!(sums[0], 3.0);
        assert_eq!(sums[1], 4.0);
        assert_eq!(sums[4], 14.0);
        assert_eq!(sums[5], 20.0);
        assert_eq!(sums[6], 21.0);

        let means = rolling_means(&values, 5);
        assert_eq!(means[0], 3.0);
        assert_eq!(means[1], 2.0);
        assert!((means[6] - 21.0 / 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_idle_window_after_fractional_sales_is_zero() {
        let sums = rolling_sums(&[0.1, 0.2, 0.0, 0.0, 0.0], 2);
        assert_eq!(&sums[3..], &[0.0, 0.0]);

        let means = rolling_means(&[0.1, 0.2, 0.0, 0.0, 0.0], 2);
        assert_eq!(means[4], 0.0);
    }

    #[test]
    fn test_compute_rolling_stats_windows_and_percentiles() {
        let sales = vec![10.0, 0.0, 5.0, 0.0, 2.0, 8.0, 0.0, 1.0, 4.0, 6.0];
        let stock = vec![Some(90.0); 10];
        let stats = compute_rolling_stats(&series_from(&sales, &stock), &[5, 7, 10]).unwrap();

        assert_eq!(stats.windows.len(), 3);
        let w10 = stats.window(10).unwrap();
        assert_eq!(w10.sums[0], 10.0);
        assert_eq!(*w10.sums.last().unwrap(), 36.0);

        let expected_p95 = percentile(&w10.sums, 0.95).unwrap();
        assert_eq!(stats.p95(10).unwrap(), expected_p95);
        assert!(stats.p95(3).is_err());

        let summary = &stats.summary;
        assert_eq!(summary.days, 10);
        assert!((summary.mean_daily_sales - 3.6).abs() < 1e-12);
        assert_eq!(summary.zero_sales_days, 3);
        assert!((summary.zero_sales_ratio - 0.3).abs() < 1e-12);
        assert!((summary.days_of_supply.unwrap() - 25.0).abs() < 1e-12);
        let rsd = summary.relative_std.unwrap();
        assert!((rsd - summary.std_daily_sales.unwrap() / 3.6).abs() < 1e-12);
    }

    #[test]
    fn test_zero_sales_has_no_relative_std() {
        let stats = compute_rolling_stats(
            &series_from(&[0.0, 0.0, 0.0], &[Some(5.0), Some(5.0), None]),
            &[5],
        )
        .unwrap();

        assert_eq!(stats.summary.relative_std, None);
        assert_eq!(stats.summary.days_of_supply, None);
        assert_eq!(stats.summary.zero_sales_ratio, 1.0);
        assert_eq!(stats.summary.mean_closing_stock, Some(5.0));
    }

    #[test]
    fn test_single_day_has_no_std() {
        let stats =
            compute_rolling_stats(&series_from(&[4.0], &[Some(10.0)]), &[5, 7, 10]).unwrap();
        assert_eq!(stats.summary.std_daily_sales, None);
        assert_eq!(stats.summary.relative_std, None);
        assert_eq!(stats.window(5).unwrap().sums, vec![4.0]);
        assert_eq!(stats.p95(10).unwrap(), 4.0);
    }

    #[test]
    fn test_projected_quantity_scales_rolling_mean() {
        let stats = compute_rolling_stats(
            &series_from(&[7.0, 0.0, 7.0], &[Some(1.0), Some(1.0), Some(1.0)]),
            &[7],
        )
        .unwrap();
        let projected = stats.projected_quantity(7, 10).unwrap();
        assert!((projected[0] - 70.0).abs() < 1e-9);
        assert!((projected[1] - 35.0).abs() < 1e-9);
        assert!(stats.projected_quantity(5, 10).is_none());
    }

    #[test]
    fn test_zero_window_rejected() {
        let result = compute_rolling_stats(&series_from(&[1.0], &[Some(1.0)]), &[0]);
        assert!(matches!(result, Err(StockLimitsError::InvalidConfig(_))));
    }
}
