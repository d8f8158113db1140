//! Trading calendar: weekend rule plus an exchange holiday list.
//!
//! Holidays come from an external dated feed (a file or URL with one
//! `YYYY-MM-DD` per line). When the feed cannot be loaded the calendar runs
//! in degraded mode on the fixed recurring holidays only. The recurring set
//! is always unioned with the feed.

use crate::error::PipelineError;
use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Fixed month/day exchange holidays observed every year.
pub const RECURRING_HOLIDAYS: [(u32, u32, &str); 5] = [
    (1, 26, "Republic Day"),
    (5, 1, "Labour Day"),
    (8, 15, "Independence Day"),
    (10, 2, "Gandhi Jayanti"),
    (12, 25, "Christmas"),
];

/// Where the historical holiday list is read from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HolidayFeed {
    File(PathBuf),
    Url(String),
    None,
}

impl HolidayFeed {
    /// Interpret a config string: `http(s)://` is a URL, anything else a path.
    pub fn parse(feed: &str) -> Self {
        let feed = feed.trim();
        if feed.is_empty() {
            HolidayFeed::None
        } else if feed.starts_with("http://") || feed.starts_with("https://") {
            HolidayFeed::Url(feed.to_string())
        } else {
            HolidayFeed::File(PathBuf::from(feed))
        }
    }
}

/// Why a date is not a trading day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionReason {
    Weekend,
    Holiday,
}

impl ExclusionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExclusionReason::Weekend => "skipped_weekend",
            ExclusionReason::Holiday => "skipped_holiday",
        }
    }
}

/// Immutable business-day calendar, loaded once per run.
#[derive(Debug, Clone)]
pub struct TradingCalendar {
    holidays: BTreeSet<NaiveDate>,
    degraded: bool,
}

impl TradingCalendar {
    /// Calendar built from an explicit holiday set (recurring holidays still apply).
    pub fn new(holidays: impl IntoIterator<Item = NaiveDate>) -> Self {
        Self {
            holidays: holidays.into_iter().collect(),
            degraded: false,
        }
    }

    /// Calendar with only the fixed recurring holidays.
    pub fn recurring_only() -> Self {
        Self {
            holidays: BTreeSet::new(),
            degraded: true,
        }
    }

    /// Load the holiday feed, falling back to recurring holidays on any failure.
    pub fn load(feed: &HolidayFeed) -> Self {
        let loaded = match feed {
            HolidayFeed::File(path) => load_holiday_file(path),
            HolidayFeed::Url(url) => load_holiday_url(url),
            HolidayFeed::None => Err(PipelineError::CalendarUnavailable(
                "no holiday feed configured".into(),
            )),
        };

        match loaded {
            Ok(holidays) => {
                info!(count = holidays.len(), "loaded exchange holidays");
                Self::new(holidays)
            }
            Err(e) => {
                warn!(
                    error = %e,
                    "holiday feed unavailable, falling back to recurring holidays only"
                );
                Self::recurring_only()
            }
        }
    }

    /// True when the feed failed to load and only recurring holidays are known.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn holiday_count(&self) -> usize {
        self.holidays.len()
    }

    pub fn is_weekend(date: NaiveDate) -> bool {
        matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
    }

    pub fn is_holiday(&self, date: NaiveDate) -> bool {
        self.holidays.contains(&date) || recurring_holiday_name(date).is_some()
    }

    /// Reason the date is excluded, or `None` for a trading day.
    pub fn exclusion(&self, date: NaiveDate) -> Option<ExclusionReason> {
        if Self::is_weekend(date) {
            Some(ExclusionReason::Weekend)
        } else if self.is_holiday(date) {
            Some(ExclusionReason::Holiday)
        } else {
            None
        }
    }

    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        self.exclusion(date).is_none()
    }

    /// Trading days in `[start, end]`, ascending. Empty when `start > end`.
    pub fn trading_days(&self, start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
        calendar_days(start, end)
            .into_iter()
            .filter(|d| self.is_trading_day(*d))
            .collect()
    }
}

/// Every calendar date in `[start, end]`, ascending. Empty when `start > end`.
pub fn calendar_days(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    if start > end {
        return Vec::new();
    }
    start.iter_days().take_while(|d| *d <= end).collect()
}

/// Name of the recurring holiday falling on this date, if any.
pub fn recurring_holiday_name(date: NaiveDate) -> Option<&'static str> {
    RECURRING_HOLIDAYS
        .iter()
        .find(|(m, d, _)| date.month() == *m && date.day() == *d)
        .map(|(_, _, name)| *name)
}

fn load_holiday_file(path: &Path) -> Result<BTreeSet<NaiveDate>, PipelineError> {
    let file = std::fs::File::open(path).map_err(|e| {
        PipelineError::CalendarUnavailable(format!("open {}: {e}", path.display()))
    })?;
    parse_holiday_feed(file)
}

fn load_holiday_url(url: &str) -> Result<BTreeSet<NaiveDate>, PipelineError> {
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(15))
        .build()
        .map_err(|e| PipelineError::CalendarUnavailable(format!("http client: {e}")))?;
    let resp = client
        .get(url)
        .send()
        .map_err(|e| PipelineError::CalendarUnavailable(format!("GET {url}: {e}")))?;
    if !resp.status().is_success() {
        return Err(PipelineError::CalendarUnavailable(format!(
            "GET {url}: HTTP {}",
            resp.status()
        )));
    }
    let body = resp
        .bytes()
        .map_err(|e| PipelineError::CalendarUnavailable(format!("read body: {e}")))?;
    parse_holiday_feed(body.as_ref())
}

/// Parse a dated feed: first field of each record must be `YYYY-MM-DD`.
/// Headers, blank lines and malformed rows are skipped.
pub fn parse_holiday_feed<R: std::io::Read>(
    reader: R,
) -> Result<BTreeSet<NaiveDate>, PipelineError> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut holidays = BTreeSet::new();
    for record in rdr.records() {
        let record =
            record.map_err(|e| PipelineError::CalendarUnavailable(format!("read feed: {e}")))?;
        if let Some(field) = record.get(0) {
            if let Ok(date) = NaiveDate::parse_from_str(field, "%Y-%m-%d") {
                holidays.insert(date);
            }
        }
    }

    if holidays.is_empty() {
        return Err(PipelineError::CalendarUnavailable(
            "feed contains no parseable dates".into(),
        ));
    }
    Ok(holidays)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn weekends_are_excluded() {
        let cal = TradingCalendar::new([]);
        assert_eq!(cal.exclusion(d(2025, 1, 4)), Some(ExclusionReason::Weekend));
        assert_eq!(cal.exclusion(d(2025, 1, 5)), Some(ExclusionReason::Weekend));
        assert!(cal.is_trading_day(d(2025, 1, 6)));
    }

    #[test]
    fn trading_days_first_week_of_2025() {
        let cal = TradingCalendar::new([]);
        let days = cal.trading_days(d(2025, 1, 1), d(2025, 1, 7));
        assert_eq!(
            days,
            vec![d(2025, 1, 1), d(2025, 1, 2), d(2025, 1, 3), d(2025, 1, 6), d(2025, 1, 7)]
        );
    }

    #[test]
    fn inverted_range_is_empty() {
        let cal = TradingCalendar::new([]);
        assert!(cal.trading_days(d(2025, 1, 7), d(2025, 1, 1)).is_empty());
        assert_eq!(calendar_days(d(2025, 1, 1), d(2025, 1, 1)), vec![d(2025, 1, 1)]);
    }

    #[test]
    fn feed_holidays_and_recurring_are_unioned() {
        let cal = TradingCalendar::new([d(2025, 2, 26)]);
        assert_eq!(cal.exclusion(d(2025, 2, 26)), Some(ExclusionReason::Holiday));
        // Republic Day falls on a Monday in 2026
        assert_eq!(cal.exclusion(d(2026, 1, 26)), Some(ExclusionReason::Holiday));
        assert!(!cal.is_degraded());
    }

    #[test]
    fn missing_feed_degrades_to_recurring() {
        let cal = TradingCalendar::load(&HolidayFeed::File(PathBuf::from(
            "/nonexistent/holidays.csv",
        )));
        assert!(cal.is_degraded());
        assert!(!cal.is_trading_day(d(2026, 1, 26)));
        assert!(cal.is_trading_day(d(2026, 1, 27)));
    }

    #[test]
    fn feed_parser_skips_header_and_garbage() {
        let feed = "date\n2025-02-26\n\nnot-a-date\n2025-03-14,Holi\n";
        let parsed = parse_holiday_feed(feed.as_bytes()).unwrap();
        assert_eq!(parsed.len(), 2);
        assert!(parsed.contains(&d(2025, 3, 14)));
    }

    #[test]
    fn empty_feed_is_unavailable() {
        let err = parse_holiday_feed("header only\n".as_bytes()).unwrap_err();
        assert_eq!(err.kind(), "calendar_unavailable");
    }

    #[test]
    fn feed_spec_parsing() {
        assert_eq!(
            HolidayFeed::parse("https://example.com/h.csv"),
            HolidayFeed::Url("https://example.com/h.csv".into())
        );
        assert_eq!(
            HolidayFeed::parse("data/nse_holidays.csv"),
            HolidayFeed::File(PathBuf::from("data/nse_holidays.csv"))
        );
        assert_eq!(HolidayFeed::parse("  "), HolidayFeed::None);
    }
}
