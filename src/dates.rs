// Date handling for the form: lenient parsing of what people type into PDF
// fields, and the compact digit-only formats the form expects on output.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Local, NaiveDate};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::MonthError;

lazy_static! {
    static ref DOTTED: Regex = Regex::new(r"([0-9]{1,2})\.([0-9]{1,2})\.([0-9]{4})").unwrap();
    static ref SLASHED: Regex = Regex::new(r"([0-9]{1,2})/([0-9]{1,2})/([0-9]{4})").unwrap();
    static ref ISO: Regex = Regex::new(r"^[0-9]{4}-[0-9]{2}-[0-9]{2}$").unwrap();
    static ref COMPACT: Regex = Regex::new(r"^([0-9]{2})([0-9]{2})([0-9]{4})$").unwrap();
}

/// Normalize a date typed into a form field to `YYYY-MM-DD`.
///
/// Recognized, in order: `DD.MM.YYYY`, `DD/MM/YYYY`, `YYYY-MM-DD`,
/// `DDMMYYYY` and `DDMMYYYY` with whitespace between digits. Anything else
/// is returned trimmed but otherwise unchanged.
pub fn normalize_date(raw: &str) -> String {
    let value = raw.trim();
    if value.is_empty() {
        return String::new();
    }

    for pattern in [&*DOTTED, &*SLASHED] {
        if let Some(caps) = pattern.captures(value) {
            return format!("{}-{:0>2}-{:0>2}", &caps[3], &caps[2], &caps[1]);
        }
    }

    if ISO.is_match(value) {
        return value.to_string();
    }

    if let Some(caps) = COMPACT.captures(value) {
        return format!("{}-{}-{}", &caps[3], &caps[2], &caps[1]);
    }

    let digits: String = value.chars().filter(|c| !c.is_whitespace()).collect();
    if digits.len() == 8 && digits.chars().all(|c| c.is_ascii_digit()) {
        return format!("{}-{}-{}", &digits[4..8], &digits[2..4], &digits[0..2]);
    }

    value.to_string()
}

/// `YYYY-MM-DD` to the form's `DDMMYYYY`; `None` when not an ISO date.
pub fn compact_date(iso: &str) -> Option<String> {
    NaiveDate::parse_from_str(iso.trim(), "%Y-%m-%d")
        .ok()
        .map(|d| d.format("%d%m%Y").to_string())
}

/// Signature date as typed (`DD.MM.YYYY`) with its separators removed.
pub fn compact_signature_date(dotted: &str) -> String {
    dotted
        .chars()
        .filter(|c| !matches!(c, '.' | '/') && !c.is_whitespace())
        .collect()
}

pub fn today_compact() -> String {
    Local::now().date_naive().format("%d%m%Y").to_string()
}

/// Number of days in `month` of `year`, computed from the first of the
/// following month.
pub fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|d| d.pred_opt())
        .map(|d| d.day())
        .unwrap_or(31)
}

// ============================================================================
// Target month
// ============================================================================

/// The calendar month a form is filled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetMonth {
    pub year: i32,
    pub month: u32,
}

impl TargetMonth {
    pub fn new(year: i32, month: u32) -> Result<Self, MonthError> {
        if !(1..=12).contains(&month) {
            return Err(MonthError(format!("{year:04}-{month:02}")));
        }
        Ok(Self { year, month })
    }

    pub fn current() -> Self {
        let today = Local::now().date_naive();
        Self { year: today.year(), month: today.month() }
    }

    pub fn days(&self) -> u32 {
        days_in_month(self.year, self.month)
    }

    /// `MMYYYY`, as printed in the form header.
    pub fn month_year(&self) -> String {
        format!("{:02}{:04}", self.month, self.year)
    }

    /// ISO key of `day` in this month.
    pub fn day_key(&self, day: u32) -> String {
        format!("{:04}-{:02}-{:02}", self.year, self.month, day)
    }

    pub fn first_day(&self) -> String {
        self.day_key(1)
    }

    pub fn last_day(&self) -> String {
        self.day_key(self.days())
    }

    /// Whether an ISO date string falls in this month.
    pub fn contains(&self, iso_date: &str) -> bool {
        iso_date.starts_with(&self.to_string())
    }
}

impl fmt::Display for TargetMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for TargetMonth {
    type Err = MonthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (year, month) = s
            .trim()
            .split_once('-')
            .ok_or_else(|| MonthError(s.to_string()))?;
        if year.len() != 4 || month.len() != 2 {
            return Err(MonthError(s.to_string()));
        }
        let year: i32 = year.parse().map_err(|_| MonthError(s.to_string()))?;
        let month: u32 = month.parse().map_err(|_| MonthError(s.to_string()))?;
        Self::new(year, month).map_err(|_| MonthError(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_supported_formats_normalize_to_iso() {
        for raw in ["05.03.2024", "05/03/2024", "05032024", "2024-03-05", "05 03 2024", " 0 5 0 3 2 0 2 4 "] {
            assert_eq!(normalize_date(raw), "2024-03-05", "input {raw:?}");
        }
    }

    #[test]
    fn single_digit_day_and_month_are_padded() {
        assert_eq!(normalize_date("5.3.2024"), "2024-03-05");
        assert_eq!(normalize_date("1/12/2023"), "2023-12-01");
    }

    #[test]
    fn unrecognized_dates_pass_through() {
        assert_eq!(normalize_date("March 5th"), "March 5th");
        assert_eq!(normalize_date("  2024 "), "2024");
        assert_eq!(normalize_date(""), "");
    }

    #[test]
    fn only_ascii_digits_are_dates() {
        assert_eq!(normalize_date("٠٥.03.2024"), "٠٥.03.2024");
        assert_eq!(normalize_date("٠٥٠٣٢٠٢٤"), "٠٥٠٣٢٠٢٤");
    }

    #[test]
    fn days_in_month_handles_leap_years() {
        assert_eq!(days_in_month(2025, 2), 28);
        assert_eq!(days_in_month(2024, 2), 29);
        assert_eq!(days_in_month(2025, 6), 30);
        assert_eq!(days_in_month(2025, 12), 31);
    }

    #[test]
    fn compact_formats() {
        assert_eq!(compact_date("2025-06-14"), Some("14062025".to_string()));
        assert_eq!(compact_date("14.06.2025"), None);
        assert_eq!(compact_signature_date("03.07.2025"), "03072025");
    }

    #[test]
    fn target_month_parsing() {
        let month: TargetMonth = "2025-02".parse().unwrap();
        assert_eq!(month, TargetMonth { year: 2025, month: 2 });
        assert_eq!(month.month_year(), "022025");
        assert_eq!(month.days(), 28);
        assert_eq!(month.last_day(), "2025-02-28");
        assert!(month.contains("2025-02-14"));
        assert!(!month.contains("2025-03-01"));
        assert!("2025-13".parse::<TargetMonth>().is_err());
        assert!("2025/02".parse::<TargetMonth>().is_err());
        assert!("not-a-month".parse::<TargetMonth>().is_err());
    }
}
