use crate::error::{Result, StockLimitsError};
use chrono::{Days, NaiveDate, NaiveDateTime};

pub fn next_day(date: NaiveDate) -> Option<NaiveDate> {
    date.checked_add_days(Days::new(1))
}

/// Every calendar day in `start..=end`. Empty when `end < start`.
pub fn get_days_in_period(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    let mut dates = Vec::new();

    let mut current = start;
    while current <= end {
        dates.push(current);
        match next_day(current) {
            Some(next) => current = next,
            None => break,
        }
    }

    dates
}

/// Number of calendar days in `start..=end`, or 0 when the range is empty.
pub fn days_inclusive(start: NaiveDate, end: NaiveDate) -> usize {
    let span = (end - start).num_days();
    if span < 0 {
        0
    } else {
        span as usize + 1
    }
}

/// Parses an optional `YYYY-MM-DD` bound. Empty strings count as unset.
pub fn parse_date_param(value: Option<&str>) -> Result<Option<NaiveDate>> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map(Some)
            .map_err(|_| {
                StockLimitsError::DateError(format!(
                    "Invalid date '{}'. Expected YYYY-MM-DD",
                    s
                ))
            }),
    }
}

/// Clamps the requested window onto the observed one.
///
/// `start = max(requested_start, observed_start)` and
/// `end = min(requested_end, observed_end)`; unset bounds fall back to the
/// observed extremes.
pub fn effective_bounds(
    requested_start: Option<NaiveDate>,
    requested_end: Option<NaiveDate>,
    observed_start: NaiveDate,
    observed_end: NaiveDate,
) -> Result<(NaiveDate, NaiveDate)> {
    let start = requested_start.map_or(observed_start, |d| d.max(observed_start));
    let end = requested_end.map_or(observed_end, |d| d.min(observed_end));

    if end < start {
        return Err(StockLimitsError::EmptyWindow { start, end });
    }

    Ok((start, end))
}

/// Converts an Excel serial day number to a calendar date, dropping the time part.
pub fn excel_serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() || serial < 0.0 {
        return None;
    }
    // Excel epoch is 1899-12-30 (accounting for the 1900 leap year bug)
    let base = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    base.checked_add_days(Days::new(serial.floor() as u64))
}

/// Parses the date forms seen in exported ledgers into a calendar date.
pub fn parse_ledger_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y/%m/%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.date());
        }
    }

    for fmt in ["%Y-%m-%d", "%Y/%m/%d", "%Y%m%d"] {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some(d);
        }
    }

    // Fractional seconds and other trailing noise after a valid date prefix
    s.get(..10)
        .and_then(|prefix| NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok())
}

/// Linear-interpolation percentile (`q` in `0.0..=1.0`), the same definition
/// spreadsheet tools use by default. `None` for an empty input.
pub fn percentile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }

    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(|a, b| a.total_cmp(b));

    let q = q.clamp(0.0, 1.0);
    let rank = q * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;

    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Replaces characters that are illegal in Windows file names with `_`.
pub fn sanitize_file_stem(stem: &str) -> String {
    stem.chars()
        .map(|c| match c {
            '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            other => other,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_get_days_in_period() {
        let days = get_days_in_period(d(2024, 2, 27), d(2024, 3, 1));
        assert_eq!(
            days,
            vec![d(2024, 2, 27), d(2024, 2, 28), d(2024, 2, 29), d(2024, 3, 1)]
        );

        assert!(get_days_in_period(d(2024, 3, 2), d(2024, 3, 1)).is_empty());
        assert_eq!(days_inclusive(d(2024, 1, 1), d(2024, 1, 1)), 1);
        assert_eq!(days_inclusive(d(2024, 1, 2), d(2024, 1, 1)), 0);
    }

    #[test]
    fn test_effective_bounds() {
        let observed = (d(2023, 4, 3), d(2023, 11, 20));

        let (start, end) = effective_bounds(None, None, observed.0, observed.1).unwrap();
        assert_eq!((start, end), observed);

        let (start, end) =
            effective_bounds(Some(d(2023, 4, 1)), Some(d(2023, 11, 30)), observed.0, observed.1)
                .unwrap();
        assert_eq!((start, end), observed);

        let (start, end) =
            effective_bounds(Some(d(2023, 5, 1)), Some(d(2023, 6, 30)), observed.0, observed.1)
                .unwrap();
        assert_eq!((start, end), (d(2023, 5, 1), d(2023, 6, 30)));

        let result = effective_bounds(Some(d(2024, 1, 1)), None, observed.0, observed.1);
        assert!(matches!(result, Err(StockLimitsError::EmptyWindow { .. })));
    }

    #[test]
    fn test_parse_date_param() {
        assert_eq!(parse_date_param(None).unwrap(), None);
        assert_eq!(parse_date_param(Some("")).unwrap(), None);
        assert_eq!(
            parse_date_param(Some("2023-04-01")).unwrap(),
            Some(d(2023, 4, 1))
        );
        assert!(parse_date_param(Some("2023/04/01")).is_err());
    }

    #[test]
    fn test_parse_ledger_date_variants() {
        assert_eq!(parse_ledger_date("2024-01-03 14:22:05"), Some(d(2024, 1, 3)));
        assert_eq!(parse_ledger_date("2024/01/03"), Some(d(2024, 1, 3)));
        assert_eq!(parse_ledger_date("2024-01-03"), Some(d(2024, 1, 3)));
        assert_eq!(parse_ledger_date("2024-01-03 14:22:05.123"), Some(d(2024, 1, 3)));
        assert_eq!(parse_ledger_date("   "), None);
        assert_eq!(parse_ledger_date("合计"), None);
    }

    #[test]
    fn test_excel_serial_to_date() {
        assert_eq!(excel_serial_to_date(45292.0), Some(d(2024, 1, 1)));
        assert_eq!(excel_serial_to_date(45292.75), Some(d(2024, 1, 1)));
        assert_eq!(excel_serial_to_date(-1.0), None);
    }

    #[test]
    fn test_percentile_linear_interpolation() {
        let values = vec![1.0, 2.0, 3.0, 4.0];
        assert!((percentile(&values, 0.5).unwrap() - 2.5).abs() < 1e-12);
        // rank = 0.95 * 3 = 2.85 -> 3 + 0.85 * (4 - 3)
        assert!((percentile(&values, 0.95).unwrap() - 3.85).abs() < 1e-12);
        assert_eq!(percentile(&[7.0], 0.95), Some(7.0));
        assert_eq!(percentile(&[], 0.95), None);
    }

    #[test]
    fn test_sanitize_file_stem() {
        assert_eq!(
            sanitize_file_stem("12_头孢曲松_1g*10支/盒"),
            "12_头孢曲松_1g_10支_盒"
        );
    }
}
