// Utility helpers for parsing, month arithmetic and basic statistics.
//
// This module centralizes all the "dirty" extract handling so the rest of
// the code can assume clean, typed values.
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use num_format::{Locale, ToFormattedString};

/// Outcome of coercing one numeric cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Numeric {
    Value(f64),
    Missing,
    Malformed,
}

/// Parse a string-like value into `f64` while being forgiving about
/// formatting issues that are common in spreadsheet exports.
///
/// - Blank cells and the usual textual nulls (`NA`, `NaN`, `null`) are `Missing`.
/// - Thousands separators like `","` are stripped before parsing.
/// - Anything else that does not parse, or parses to a non-finite or
///   negative number, is `Malformed`.
pub fn parse_numeric(s: Option<&str>) -> Numeric {
    let Some(s) = s else { return Numeric::Missing };
    let s = s.trim();
    if s.is_empty() {
        return Numeric::Missing;
    }
    let lower = s.to_ascii_lowercase();
    if matches!(lower.as_str(), "na" | "nan" | "null" | "none" | "n/a") {
        return Numeric::Missing;
    }
    match s.replace(',', "").parse::<f64>() {
        Ok(v) if v.is_finite() && v >= 0.0 => Numeric::Value(v),
        _ => Numeric::Malformed,
    }
}

/// Parse a reporting-period cell into the first day of its month.
///
/// Accepts ISO dates (with or without a time part), `YYYY-MM`, and the NHSN
/// `2023M01` summary form.
pub fn parse_month(s: Option<&str>) -> Option<NaiveDate> {
    let s = s?.trim();
    if s.is_empty() {
        return None;
    }
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|dt| dt.date())
        })
        .or_else(|| NaiveDate::parse_from_str(&format!("{}-01", s), "%Y-%m-%d").ok())
        .or_else(|| {
            let (year, month) = s.split_once(|c| c == 'M' || c == 'm')?;
            NaiveDate::from_ymd_opt(year.parse().ok()?, month.parse().ok()?, 1)
        })?;
    first_of_month(date)
}

pub fn first_of_month(date: NaiveDate) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(date.year(), date.month(), 1)
}

/// Months since year 0, so consecutive months differ by exactly one.
pub fn month_index(date: NaiveDate) -> i32 {
    date.year() * 12 + date.month0() as i32
}

/// Inverse of [`month_index`], always landing on the first of the month.
pub fn from_month_index(index: i32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(index.div_euclid(12), index.rem_euclid(12) as u32 + 1, 1)
}

/// `(year, month)` of `date` shifted back by `months`, without building a
/// date for the shifted value.
pub fn shifted_year_month(date: NaiveDate, months: i32) -> (i32, u32) {
    let idx = month_index(date) - months;
    (idx.div_euclid(12), idx.rem_euclid(12) as u32 + 1)
}

pub fn average(v: &[f64]) -> f64 {
    // Standard arithmetic mean; returns 0 for an empty slice to avoid NaNs.
    if v.is_empty() {
        return 0.0;
    }
    let sum: f64 = v.iter().copied().sum();
    sum / v.len() as f64
}

/// Ratio that is defined as 0 for a zero divisor instead of infinity/NaN.
pub fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

/// Round half to even, matching how the scorecard has always rounded
/// points and residuals.
pub fn round_half_even(x: f64) -> f64 {
    let r = x.round();
    if (x - x.trunc()).abs() == 0.5 {
        2.0 * (x / 2.0).round()
    } else {
        r
    }
}

pub fn format_number(n: f64, decimals: usize) -> String {
    // Fixed decimal places with locale-aware thousands separators
    // (e.g., `1,234,567.89`).
    let neg = n.is_sign_negative() && n != 0.0;
    let s = format!("{:.*}", decimals, n.abs());
    let mut parts = s.split('.');
    let int_part = parts.next().unwrap_or("0");
    let frac_part = parts.next();
    let int_val: i64 = int_part.parse().unwrap_or(0);
    let mut res = int_val.to_formatted_string(&Locale::en);
    if let Some(frac) = frac_part {
        if decimals > 0 {
            res.push('.');
            res.push_str(frac);
        }
    }
    if neg {
        format!("-{}", res)
    } else {
        res
    }
}

/// Same as [`format_number`] but renders undefined values as `-`.
pub fn format_optional(n: Option<f64>, decimals: usize) -> String {
    n.map(|v| format_number(v, decimals))
        .unwrap_or_else(|| "-".to_string())
}

pub fn format_int<T>(n: T) -> String
where
    T: ToFormattedString,
{
    // Used for counts in console messages (e.g., `9,855 rows loaded`).
    n.to_formatted_string(&Locale::en)
}
