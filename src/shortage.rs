//! Shortage/on-sale day flags, the shortage rate over a window, and the
//! per-day screening records exported for review.

use crate::engine::{DailyPoint, DailySeries};
use crate::error::{Result, StockLimitsError};
use crate::rolling::RollingStats;
use chrono::NaiveDate;
use log::debug;
use rand::seq::SliceRandom;
use rand::{thread_rng, Rng};
use serde::{Deserialize, Serialize};

/// Closing stock strictly below the day's sales. Unknown stock is never a shortage.
pub fn is_shortage_day(point: &DailyPoint) -> bool {
    point
        .closing_stock
        .map(|stock| stock < point.sales)
        .unwrap_or(false)
}

/// Non-zero activity on either axis. Unknown stock contributes no signal.
pub fn is_on_sale_day(point: &DailyPoint) -> bool {
    point.sales != 0.0 || point.closing_stock.is_some_and(|stock| stock != 0.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ShortageRate {
    Rate(f64),
    /// Nothing was on sale in the window, so the rate is undefined.
    NoOnSaleDays,
}

impl ShortageRate {
    pub fn value(&self) -> Option<f64> {
        match self {
            ShortageRate::Rate(rate) => Some(*rate),
            ShortageRate::NoOnSaleDays => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShortageReport {
    pub shortage_days: usize,
    pub on_sale_days: usize,
    pub rate: ShortageRate,
    pub effective_start: NaiveDate,
    pub effective_end: NaiveDate,
}

pub fn shortage_rate(
    series: &DailySeries,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Result<ShortageReport> {
    if series.is_empty() {
        return Err(StockLimitsError::DegenerateStatistic(
            "Cannot compute a shortage rate over an empty series".to_string(),
        ));
    }

    let window = series.restrict(start, end)?;

    let on_sale_days = window.points.values().filter(|p| is_on_sale_day(p)).count();
    let shortage_days = window.points.values().filter(|p| is_shortage_day(p)).count();

    let rate = if on_sale_days == 0 {
        ShortageRate::NoOnSaleDays
    } else {
        ShortageRate::Rate(shortage_days as f64 / on_sale_days as f64)
    };

    debug!(
        "Shortage rate {}..{}: {} of {} on-sale days short",
        window.start, window.end, shortage_days, on_sale_days
    );

    Ok(ShortageReport {
        shortage_days,
        on_sale_days,
        rate,
        effective_start: window.start,
        effective_end: window.end,
    })
}

/// One day of the dense series alongside the rolling mean it was screened against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenedDay {
    pub date: NaiveDate,
    pub sales: f64,
    pub closing_stock: Option<f64>,
    pub rolling_mean_sales: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Screening {
    /// Days whose closing stock fell below the rolling mean sales.
    Shortages(Vec<ScreenedDay>),
    /// No shortage found; a random control sample sorted by date.
    ControlSample(Vec<ScreenedDay>),
}

pub fn screen_shortage_records(
    series: &DailySeries,
    stats: &RollingStats,
    window: usize,
    sample_size: usize,
) -> Result<Screening> {
    screen_shortage_records_with_rng(series, stats, window, sample_size, &mut thread_rng())
}

pub fn screen_shortage_records_with_rng<R: Rng + ?Sized>(
    series: &DailySeries,
    stats: &RollingStats,
    window: usize,
    sample_size: usize,
    rng: &mut R,
) -> Result<Screening> {
    let rolling = stats.window(window).ok_or_else(|| {
        StockLimitsError::DegenerateStatistic(format!(
            "No {}-day rolling window was computed for screening",
            window
        ))
    })?;

    let days: Vec<ScreenedDay> = series
        .points
        .iter()
        .zip(rolling.means.iter())
        .map(|((date, point), &mean)| ScreenedDay {
            date: *date,
            sales: point.sales,
            closing_stock: point.closing_stock,
            rolling_mean_sales: mean,
        })
        .collect();

    let shortages: Vec<ScreenedDay> = days
        .iter()
        .filter(|d| d.closing_stock.is_some_and(|s| s < d.rolling_mean_sales))
        .cloned()
        .collect();

    if !shortages.is_empty() {
        return Ok(Screening::Shortages(shortages));
    }

    let mut sample: Vec<ScreenedDay> = days
        .choose_multiple(rng, sample_size.min(days.len()))
        .cloned()
        .collect();
    sample.sort_by_key(|d| d.date);

    Ok(Screening::ControlSample(sample))
}
