//! Calendar helpers for period identifiers and day boundaries.
//!
//! All boundaries are computed in UTC.

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, TimeDelta, Utc};

/// ISO week identifier, e.g. `2025-W01`.
pub fn week_id(at: DateTime<Utc>) -> String {
  let week = at.iso_week();
  format!("{}-W{:02}", week.year(), week.week())
}

/// Month identifier, e.g. `2025-01`.
pub fn month_id(at: DateTime<Utc>) -> String {
  format!("{:04}-{:02}", at.year(), at.month())
}

/// Day identifier, e.g. `2025-01-15`. Also the Tier 1 day file stem.
pub fn day_id(date: NaiveDate) -> String { date.format("%Y-%m-%d").to_string() }

/// First and last instant of `date`, both inclusive.
pub fn day_bounds(date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
  let start = date.and_time(NaiveTime::MIN).and_utc();
  let end = start + TimeDelta::days(1) - TimeDelta::nanoseconds(1);
  (start, end)
}

/// Parse a `YYYY-MM-DD` day identifier.
pub fn parse_day_id(s: &str) -> Option<NaiveDate> {
  NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  #[test]
  fn iso_week_spans_year_boundary() {
    // 2024-12-30 is the Monday of ISO week 2025-W01.
    let at = Utc.with_ymd_and_hms(2024, 12, 30, 12, 0, 0).unwrap();
    assert_eq!(week_id(at), "2025-W01");
    assert_eq!(month_id(at), "2024-12");
  }

  #[test]
  fn day_bounds_cover_the_whole_day() {
    let date = NaiveDate::from_ymd_opt(2025, 1, 15).unwrap();
    let (start, end) = day_bounds(date);
    assert_eq!(start, Utc.with_ymd_and_hms(2025, 1, 15, 0, 0, 0).unwrap());
    assert_eq!(end.date_naive(), date);
    assert_eq!(
      end + TimeDelta::nanoseconds(1),
      Utc.with_ymd_and_hms(2025, 1, 16, 0, 0, 0).unwrap()
    );
  }

  #[test]
  fn day_id_round_trips() {
    let date = NaiveDate::from_ymd_opt(2025, 3, 7).unwrap();
    assert_eq!(day_id(date), "2025-03-07");
    assert_eq!(parse_day_id("2025-03-07"), Some(date));
    assert_eq!(parse_day_id("2025-W10"), None);
  }
}
