use crate::error::{Result, StockLimitsError};
use crate::ledger::TransactionRow;
use crate::schema::{NetSalesPolicy, WindowPolicy};
use crate::utils::{effective_bounds, get_days_in_period};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockOrigin {
    /// Last transaction of this very day
    Observed,
    /// Carried forward from an earlier day's closing stock
    CarriedForward,
    /// No observation on or before this day
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyPoint {
    /// Net inpatient-dispense quantity for the day; zero when nothing was dispensed.
    pub sales: f64,
    /// Stock on hand after the day's last transaction. `None` means unknown, never zero.
    pub closing_stock: Option<f64>,
    pub stock_origin: StockOrigin,
}

pub type DenseSeries = BTreeMap<NaiveDate, DailyPoint>;

/// One row per calendar day over `start..=end`, no gaps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySeries {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub points: DenseSeries,
}

impl DailySeries {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.points.keys().copied().collect()
    }

    pub fn sales(&self) -> Vec<f64> {
        self.points.values().map(|p| p.sales).collect()
    }

    pub fn closing_stock(&self) -> Vec<Option<f64>> {
        self.points.values().map(|p| p.closing_stock).collect()
    }

    pub fn get(&self, date: &NaiveDate) -> Option<&DailyPoint> {
        self.points.get(date)
    }

    /// A copy restricted to `start..=end`, clamped to this series' own bounds.
    pub fn restrict(
        &self,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<DailySeries> {
        let (start, end) = effective_bounds(start, end, self.start, self.end)?;
        Ok(DailySeries {
            start,
            end,
            points: self
                .points
                .range(start..=end)
                .map(|(d, p)| (*d, p.clone()))
                .collect(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BuildOutcome {
    Series(DailySeries),
    /// The ledger has no inpatient dispense rows at all.
    NoSalesRecord,
}

impl BuildOutcome {
    pub fn into_series(self) -> Option<DailySeries> {
        match self {
            BuildOutcome::Series(series) => Some(series),
            BuildOutcome::NoSalesRecord => None,
        }
    }
}

pub struct SeriesBuilder {
    net_sales_policy: NetSalesPolicy,
    window_policy: WindowPolicy,
}

impl SeriesBuilder {
    pub fn new(net_sales_policy: NetSalesPolicy) -> Self {
        Self {
            net_sales_policy,
            window_policy: WindowPolicy::default(),
        }
    }

    pub fn with_window_policy(mut self, window_policy: WindowPolicy) -> Self {
        self.window_policy = window_policy;
        self
    }

    pub fn build(
        &self,
        transactions: &[TransactionRow],
        requested_start: Option<NaiveDate>,
        requested_end: Option<NaiveDate>,
    ) -> Result<BuildOutcome> {
        if !transactions.iter().any(|t| t.kind.is_dispense()) {
            return Ok(BuildOutcome::NoSalesRecord);
        }

        let daily_sales = self.daily_net_sales(transactions);
        let daily_stock = daily_closing_stock(transactions);

        // Every transaction carries a stock value, so the stock dates are the outer join
        let (observed_start, observed_end) =
            match (first_key(&daily_stock), last_key(&daily_stock)) {
                (Some(s), Some(e)) => (s, e),
                _ => return Ok(BuildOutcome::NoSalesRecord),
            };

        let (start, end) = match self.window_policy {
            WindowPolicy::ClampToObserved => {
                effective_bounds(requested_start, requested_end, observed_start, observed_end)?
            }
            WindowPolicy::Requested => {
                let start = requested_start.unwrap_or(observed_start);
                let end = requested_end.unwrap_or(observed_end);
                if end < start {
                    return Err(StockLimitsError::EmptyWindow { start, end });
                }
                (start, end)
            }
        };

        // Forward fill starts from the last close strictly before the window, if any
        let mut carried: Option<f64> = daily_stock
            .range(..start)
            .next_back()
            .map(|(_, &stock)| stock);

        let mut points = BTreeMap::new();
        for date in get_days_in_period(start, end) {
            let (closing_stock, stock_origin) = match daily_stock.get(&date) {
                Some(&stock) => {
                    carried = Some(stock);
                    (Some(stock), StockOrigin::Observed)
                }
                None => match carried {
                    Some(stock) => (Some(stock), StockOrigin::CarriedForward),
                    None => (None, StockOrigin::Unknown),
                },
            };

            points.insert(
                date,
                DailyPoint {
                    sales: daily_sales.get(&date).copied().unwrap_or(0.0),
                    closing_stock,
                    stock_origin,
                },
            );
        }

        Ok(BuildOutcome::Series(DailySeries { start, end, points }))
    }

    /// Negated sum of the day's dispense deltas, so dispensing reads as positive sales.
    fn daily_net_sales(&self, transactions: &[TransactionRow]) -> BTreeMap<NaiveDate, f64> {
        let mut sums: BTreeMap<NaiveDate, f64> = BTreeMap::new();
        for t in transactions.iter().filter(|t| t.kind.is_dispense()) {
            *sums.entry(t.date).or_default() += t.quantity;
        }

        sums.into_iter()
            .map(|(date, sum)| {
                let net = -sum;
                let net = match self.net_sales_policy {
                    NetSalesPolicy::FloorAtZero => net.max(0.0),
                    NetSalesPolicy::AllowNegative => net,
                };
                // Avoid -0.0 leaking into exports
                (date, if net == 0.0 { 0.0 } else { net })
            })
            .collect()
    }
}

/// Stock after the last transaction of each day, of any type, in ledger order.
fn daily_closing_stock(transactions: &[TransactionRow]) -> BTreeMap<NaiveDate, f64> {
    let mut closing = BTreeMap::new();
    for t in transactions {
        closing.insert(t.date, t.stock);
    }
    closing
}

fn first_key<V>(map: &BTreeMap<NaiveDate, V>) -> Option<NaiveDate> {
    map.keys().next().copied()
}

fn last_key<V>(map: &BTreeMap<NaiveDate, V>) -> Option<NaiveDate> {
    map.keys().next_back().copied()
}

pub fn build_daily_series(
    transactions: &[TransactionRow],
    requested_start: Option<NaiveDate>,
    requested_end: Option<NaiveDate>,
    net_sales_policy: NetSalesPolicy,
    window_policy: WindowPolicy,
) -> Result<BuildOutcome> {
    SeriesBuilder::new(net_sales_policy)
        .with_window_policy(window_policy)
        .build(transactions, requested_start, requested_end)
}
