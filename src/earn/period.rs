//! Period keys derived from capture dates.
//!
//! A quarter key renders as `YYYY-Qn` and a year key as `YYYY`. Both order
//! chronologically, so a `BTreeMap` keyed by either iterates oldest first.

use crate::error::EarnError;
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QuarterKey {
    year: i32,
    quarter: u8,
}

impl QuarterKey {
    pub fn new(year: i32, quarter: u8) -> Option<Self> {
        (1..=4).contains(&quarter).then_some(Self { year, quarter })
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            quarter: (date.month0() / 3 + 1) as u8,
        }
    }
}

impl fmt::Display for QuarterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-Q{}", self.year, self.quarter)
    }
}

impl FromStr for QuarterKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (year, quarter) = trimmed
            .split_once("-Q")
            .ok_or_else(|| format!("invalid quarter key `{trimmed}`"))?;
        let year = year
            .parse::<i32>()
            .map_err(|_| format!("invalid year in quarter key `{trimmed}`"))?;
        let quarter = quarter
            .parse::<u8>()
            .map_err(|_| format!("invalid quarter in quarter key `{trimmed}`"))?;
        Self::new(year, quarter).ok_or_else(|| format!("quarter out of range in `{trimmed}`"))
    }
}

impl TryFrom<String> for QuarterKey {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<QuarterKey> for String {
    fn from(value: QuarterKey) -> Self {
        value.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct YearKey(i32);

impl YearKey {
    pub fn new(year: i32) -> Self {
        Self(year)
    }

    pub fn year(self) -> i32 {
        self.0
    }

    /// The fourth quarter of this year, used to pick the year-end real rate.
    pub fn fourth_quarter(self) -> QuarterKey {
        QuarterKey {
            year: self.0,
            quarter: 4,
        }
    }
}

impl fmt::Display for YearKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for YearKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        trimmed
            .parse::<i32>()
            .map(Self)
            .map_err(|_| format!("invalid year key `{trimmed}`"))
    }
}

impl TryFrom<String> for YearKey {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<YearKey> for String {
    fn from(value: YearKey) -> Self {
        value.to_string()
    }
}

fn is_date_separator(byte: u8) -> bool {
    matches!(byte, b'-' | b'_' | b'.' | b' ')
}

fn digits(bytes: &[u8]) -> Option<u32> {
    if bytes.is_empty() || !bytes.iter().all(u8::is_ascii_digit) {
        return None;
    }
    Some(
        bytes
            .iter()
            .fold(0u32, |acc, b| acc * 10 + u32::from(b - b'0')),
    )
}

/// Extracts the first `YYYY-MM-DD` capture date embedded in a file name.
///
/// Any of `-`, `_`, `.` or a space may separate the fields, so
/// `sp-500-eps-est 2024 05 15.xlsx` and `sp-500-eps-est 2024-05-15.xlsx`
/// both yield 2024-05-15.
pub fn capture_date_from_name(name: &str) -> Result<NaiveDate, EarnError> {
    let bytes = name.as_bytes();
    let mut start = 0usize;
    while start + 10 <= bytes.len() {
        let window = &bytes[start..start + 10];
        let preceded_by_digit = start > 0 && bytes[start - 1].is_ascii_digit();
        let followed_by_digit = bytes.get(start + 10).is_some_and(u8::is_ascii_digit);
        if !preceded_by_digit
            && !followed_by_digit
            && is_date_separator(window[4])
            && is_date_separator(window[7])
        {
            let parsed = match (digits(&window[0..4]), digits(&window[5..7]), digits(&window[8..10]))
            {
                (Some(y), Some(m), Some(d)) => NaiveDate::from_ymd_opt(y as i32, m, d),
                _ => None,
            };
            if let Some(date) = parsed {
                return Ok(date);
            }
        }
        start += 1;
    }
    Err(EarnError::UnparseableDate {
        name: name.to_string(),
    })
}

pub fn quarter_key_for_name(name: &str) -> Result<QuarterKey, EarnError> {
    capture_date_from_name(name).map(QuarterKey::from_date)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn quarter_boundaries_follow_calendar_months() {
        assert_eq!(QuarterKey::from_date(date(2024, 1, 1)).to_string(), "2024-Q1");
        assert_eq!(QuarterKey::from_date(date(2024, 3, 31)).to_string(), "2024-Q1");
        assert_eq!(QuarterKey::from_date(date(2024, 4, 1)).to_string(), "2024-Q2");
        assert_eq!(QuarterKey::from_date(date(2024, 9, 30)).to_string(), "2024-Q3");
        assert_eq!(QuarterKey::from_date(date(2024, 12, 31)).to_string(), "2024-Q4");
    }

    #[test]
    fn year_key_renders_plain_year() {
        assert_eq!(YearKey::new(1999).to_string(), "1999");
        assert_eq!("2023".parse::<YearKey>(), Ok(YearKey::new(2023)));
    }

    #[test]
    fn quarter_keys_order_chronologically() {
        let a: QuarterKey = "2023-Q4".parse().expect("parse");
        let b: QuarterKey = "2024-Q1".parse().expect("parse");
        assert!(a < b);
        assert_eq!(YearKey::new(2023).fourth_quarter(), a);
    }

    #[test]
    fn quarter_key_rejects_garbage() {
        assert!("2024-Q5".parse::<QuarterKey>().is_err());
        assert!("2024Q1".parse::<QuarterKey>().is_err());
        assert!("x-Q1".parse::<QuarterKey>().is_err());
    }

    #[test]
    fn capture_date_accepts_mixed_separators() {
        assert_eq!(
            capture_date_from_name("sp-500-eps-est 2024-05-15.xlsx").expect("date"),
            date(2024, 5, 15)
        );
        assert_eq!(
            capture_date_from_name("sp-500-eps-est 2024 05 15.xlsx").expect("date"),
            date(2024, 5, 15)
        );
        assert_eq!(
            capture_date_from_name("sp-500-eps-est_2019_12_02.xlsx").expect("date"),
            date(2019, 12, 2)
        );
    }

    #[test]
    fn capture_date_skips_the_500_in_the_prefix() {
        // "500-eps-e" must not be mistaken for a date window
        assert_eq!(
            quarter_key_for_name("sp-500-eps-est 2017-11-30.xlsx")
                .expect("key")
                .to_string(),
            "2017-Q4"
        );
    }

    #[test]
    fn capture_date_missing_is_unparseable() {
        let err = capture_date_from_name("sp-500-eps-est latest.xlsx").expect_err("no date");
        assert!(matches!(err, EarnError::UnparseableDate { .. }));
        assert!(capture_date_from_name("sp-500-eps-est 2024-13-40.xlsx").is_err());
    }

    #[test]
    fn keys_round_trip_through_serde_as_strings() {
        let key = QuarterKey::new(2024, 2).expect("key");
        let json = serde_json::to_string(&key).expect("serialize");
        assert_eq!(json, "\"2024-Q2\"");
        let back: QuarterKey = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, key);
    }
}
