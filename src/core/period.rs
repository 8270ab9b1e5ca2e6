//! Reporting windows.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Serialize, Serializer};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PeriodError {
    #[error("period must look like 2026, 2026-Q3 or 2026-09, got {0:?}")]
    Malformed(String),
    #[error("period start {start} must be before end {end}")]
    Empty { start: NaiveDate, end: NaiveDate },
}

/// Half-open date range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Period {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Period {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, PeriodError> {
        if start < end {
            Ok(Self { start, end })
        } else {
            Err(PeriodError::Empty { start, end })
        }
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    /// The equally long window that ends where this one starts.
    pub fn prior(&self) -> Period {
        Period {
            start: self.start - Duration::days(self.days()),
            end: self.start,
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date < self.end
    }
}

/// A window paired with the baseline its trend is measured against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ComparisonWindow {
    pub current: Period,
    pub prior: Period,
}

impl ComparisonWindow {
    /// Ad hoc ranges compare against the equally long range before them.
    pub fn trailing(current: Period) -> Self {
        Self {
            current,
            prior: current.prior(),
        }
    }

    /// Calendar periods compare against the previous calendar period.
    pub fn calendar(period: ReportingPeriod) -> Self {
        Self {
            current: period.to_period(),
            prior: period.previous().to_period(),
        }
    }

    /// Smallest range covering both windows.
    pub fn span(&self) -> Period {
        Period {
            start: self.current.start.min(self.prior.start),
            end: self.current.end.max(self.prior.end),
        }
    }
}

/// Calendar period used by quality reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReportingPeriod {
    Year(i32),
    Quarter(i32, u32),
    Month(i32, u32),
}

impl ReportingPeriod {
    pub fn previous(&self) -> ReportingPeriod {
        match *self {
            ReportingPeriod::Year(y) => ReportingPeriod::Year(y - 1),
            ReportingPeriod::Quarter(y, 1) => ReportingPeriod::Quarter(y - 1, 4),
            ReportingPeriod::Quarter(y, q) => ReportingPeriod::Quarter(y, q - 1),
            ReportingPeriod::Month(y, 1) => ReportingPeriod::Month(y - 1, 12),
            ReportingPeriod::Month(y, m) => ReportingPeriod::Month(y, m - 1),
        }
    }

    pub fn next(&self) -> ReportingPeriod {
        match *self {
            ReportingPeriod::Year(y) => ReportingPeriod::Year(y + 1),
            ReportingPeriod::Quarter(y, 4) => ReportingPeriod::Quarter(y + 1, 1),
            ReportingPeriod::Quarter(y, q) => ReportingPeriod::Quarter(y, q + 1),
            ReportingPeriod::Month(y, 12) => ReportingPeriod::Month(y + 1, 1),
            ReportingPeriod::Month(y, m) => ReportingPeriod::Month(y, m + 1),
        }
    }

    fn first_day(&self) -> NaiveDate {
        let (y, m) = match *self {
            ReportingPeriod::Year(y) => (y, 1),
            ReportingPeriod::Quarter(y, q) => (y, (q - 1) * 3 + 1),
            ReportingPeriod::Month(y, m) => (y, m),
        };
        // Components are range-checked on construction.
        NaiveDate::from_ymd_opt(y, m, 1).unwrap_or(NaiveDate::MIN)
    }

    pub fn to_period(&self) -> Period {
        Period {
            start: self.first_day(),
            end: self.next().first_day(),
        }
    }

    pub fn month_of(date: NaiveDate) -> ReportingPeriod {
        ReportingPeriod::Month(date.year(), date.month())
    }

    pub fn quarter_of(date: NaiveDate) -> ReportingPeriod {
        ReportingPeriod::Quarter(date.year(), (date.month() - 1) / 3 + 1)
    }
}

fn digits(v: &str, len: usize) -> bool {
    v.len() == len && v.bytes().all(|b| b.is_ascii_digit())
}

impl FromStr for ReportingPeriod {
    type Err = PeriodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || PeriodError::Malformed(s.to_string());
        let s = s.trim();
        let mut parts = s.splitn(2, '-');
        let year: i32 = parts
            .next()
            .filter(|y| digits(y, 4))
            .and_then(|y| y.parse().ok())
            .ok_or_else(malformed)?;

        match parts.next() {
            None => Ok(ReportingPeriod::Year(year)),
            Some(rest) if rest.starts_with(['Q', 'q']) => {
                let q: u32 = Some(&rest[1..])
                    .filter(|q| digits(q, 1))
                    .and_then(|q| q.parse().ok())
                    .ok_or_else(malformed)?;
                if (1..=4).contains(&q) {
                    Ok(ReportingPeriod::Quarter(year, q))
                } else {
                    Err(malformed())
                }
            }
            Some(rest) => {
                let m: u32 = Some(rest)
                    .filter(|m| digits(m, 2))
                    .and_then(|m| m.parse().ok())
                    .ok_or_else(malformed)?;
                if (1..=12).contains(&m) {
                    Ok(ReportingPeriod::Month(year, m))
                } else {
                    Err(malformed())
                }
            }
        }
    }
}

impl fmt::Display for ReportingPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportingPeriod::Year(y) => write!(f, "{}", y),
            ReportingPeriod::Quarter(y, q) => write!(f, "{}-Q{}", y, q),
            ReportingPeriod::Month(y, m) => write!(f, "{}-{:02}", y, m),
        }
    }
}

impl Serialize for ReportingPeriod {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test_case("2026", ReportingPeriod::Year(2026))]
    #[test_case("2026-Q3", ReportingPeriod::Quarter(2026, 3))]
    #[test_case("2026-q1", ReportingPeriod::Quarter(2026, 1))]
    #[test_case("2026-09", ReportingPeriod::Month(2026, 9))]
    fn parses_calendar_periods(input: &str, expected: ReportingPeriod) {
        assert_eq!(input.parse::<ReportingPeriod>().unwrap(), expected);
    }

    #[test_case("26-09")]
    #[test_case("2026-Q5")]
    #[test_case("2026-13")]
    #[test_case("2026-9")]
    #[test_case("last-month")]
    #[test_case("+026")]
    #[test_case("-026")]
    #[test_case("2026-Q+1")]
    #[test_case("2026-+9")]
    fn rejects_malformed_periods(input: &str) {
        assert!(input.parse::<ReportingPeriod>().is_err());
    }

    #[test]
    fn quarter_boundaries_roll_over_years() {
        let q1 = ReportingPeriod::Quarter(2026, 1);
        assert_eq!(q1.previous(), ReportingPeriod::Quarter(2025, 4));
        assert_eq!(
            ReportingPeriod::Quarter(2025, 4).to_period(),
            Period { start: date(2025, 10, 1), end: date(2026, 1, 1) }
        );
    }

    #[test]
    fn calendar_period_of_a_date() {
        assert_eq!(ReportingPeriod::quarter_of(date(2026, 10, 16)), ReportingPeriod::Quarter(2026, 4));
        assert_eq!(ReportingPeriod::quarter_of(date(2026, 3, 31)), ReportingPeriod::Quarter(2026, 1));
        assert_eq!(ReportingPeriod::month_of(date(2026, 10, 16)).to_string(), "2026-10");
    }

    #[test]
    fn display_round_trips_for_months() {
        let p = ReportingPeriod::Month(2026, 2);
        assert_eq!(p.to_string(), "2026-02");
        assert_eq!(p.to_period().days(), 28);
    }

    #[test]
    fn prior_window_has_equal_length() {
        let window = Period::new(date(2026, 7, 1), date(2026, 10, 1)).unwrap();
        let prior = window.prior();
        assert_eq!(prior.end, window.start);
        assert_eq!(prior.days(), window.days());
        assert!(!prior.contains(window.start));
    }

    #[test_case(ReportingPeriod::Quarter(2026, 3), date(2026, 4, 1), date(2026, 7, 1) ; "quarter")]
    #[test_case(ReportingPeriod::Quarter(2026, 1), date(2025, 10, 1), date(2026, 1, 1) ; "first quarter")]
    #[test_case(ReportingPeriod::Month(2026, 3), date(2026, 2, 1), date(2026, 3, 1) ; "month after february")]
    #[test_case(ReportingPeriod::Year(2026), date(2025, 1, 1), date(2026, 1, 1) ; "year")]
    fn calendar_baseline_is_the_previous_period(period: ReportingPeriod, start: NaiveDate, end: NaiveDate) {
        let window = ComparisonWindow::calendar(period);
        assert_eq!(window.prior, Period { start, end });
        assert_eq!(window.span(), Period { start, end: period.to_period().end });
    }

    #[test]
    fn trailing_baseline_has_equal_length() {
        let current = Period::new(date(2026, 7, 18), date(2026, 10, 16)).unwrap();
        let window = ComparisonWindow::trailing(current);
        assert_eq!(window.prior, current.prior());
        assert_eq!(window.span().days(), 2 * current.days());
    }

    #[test]
    fn empty_window_is_rejected() {
        assert!(Period::new(date(2026, 7, 1), date(2026, 7, 1)).is_err());
    }
}
