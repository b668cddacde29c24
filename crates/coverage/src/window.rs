//! Calendar-aware bucketing of wall-clock time into refresh windows.
//!
//! Window boundaries are computed in a configured IANA time zone so that
//! day, week, and month windows start at local midnight. Everything here
//! is pure: no I/O and no clock reads (callers pass `now` explicitly).

use chrono::{DateTime, Datelike, Days, Duration, Months, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use common::{Error, Result, TimeRange};

pub const MINUTE_SECONDS: u64 = 60;
pub const DAY_SECONDS: u64 = 86_400;
pub const WEEK_SECONDS: u64 = 604_800;
pub const MONTH_APPROX_SECONDS: u64 = 2_592_000;

/// Direction for window navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Prev,
    Next,
}

/// How a window length maps onto the calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    /// Whole minutes below one day, anchored at local midnight.
    SubDay(u64),
    Day,
    /// Sunday to Sunday.
    Week,
    /// First of the month to first of the month.
    Month,
}

impl Granularity {
    /// Classify a window length, rejecting lengths that cannot be bucketed.
    pub fn classify(refresh_seconds: u64) -> Result<Self> {
        match refresh_seconds {
            0 => Err(Error::Config("refresh_seconds must be > 0".into())),
            secs if secs < DAY_SECONDS => {
                if secs % MINUTE_SECONDS != 0 {
                    Err(Error::Config(format!(
                        "refresh_seconds={secs} must be a multiple of 60 for intervals shorter than a day"
                    )))
                } else {
                    Ok(Self::SubDay(secs))
                }
            }
            DAY_SECONDS => Ok(Self::Day),
            WEEK_SECONDS => Ok(Self::Week),
            secs if secs <= MONTH_APPROX_SECONDS => Ok(Self::Month),
            secs => Err(Error::Config(format!(
                "refresh_seconds={secs} exceeds the longest supported window ({MONTH_APPROX_SECONDS}s)"
            ))),
        }
    }
}

/// A canonical window: `start` is always a value produced by
/// [`WindowCalculator::window_start`] for `length`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub length: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct WindowCalculator {
    tz: Tz,
}

impl Default for WindowCalculator {
    fn default() -> Self {
        Self::new(Tz::UTC)
    }
}

impl WindowCalculator {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    /// Build from an IANA zone name such as "Europe/Berlin".
    pub fn from_timezone_name(name: &str) -> Result<Self> {
        let tz = name
            .trim()
            .parse::<Tz>()
            .map_err(|e| Error::Config(format!("unknown time zone '{name}': {e}")))?;
        Ok(Self::new(tz))
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// Start of the window of length `refresh_seconds` containing `timestamp`.
    pub fn window_start(
        &self,
        timestamp: DateTime<Utc>,
        refresh_seconds: u64,
    ) -> Result<DateTime<Utc>> {
        let granularity = Granularity::classify(refresh_seconds)?;
        let local_date = timestamp.with_timezone(&self.tz).date_naive();

        match granularity {
            Granularity::SubDay(len) => {
                let anchor = self.local_midnight(local_date)?;
                let len = len as i64;
                let elapsed = (timestamp - anchor).num_seconds();
                Ok(anchor + Duration::seconds(elapsed.div_euclid(len) * len))
            }
            Granularity::Day => self.local_midnight(local_date),
            Granularity::Week => self.local_midnight(week_start(local_date)?),
            Granularity::Month => self.local_midnight(month_start(local_date)?),
        }
    }

    pub fn window_for(&self, timestamp: DateTime<Utc>, refresh_seconds: u64) -> Result<TimeWindow> {
        Ok(TimeWindow {
            start: self.window_start(timestamp, refresh_seconds)?,
            length: refresh_seconds,
        })
    }

    /// The live window start as of `now`.
    pub fn current_window_start(
        &self,
        refresh_seconds: u64,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>> {
        self.window_start(now, refresh_seconds)
    }

    /// Snap both ends of `range` onto window starts.
    pub fn normalize_range(&self, range: &TimeRange, refresh_seconds: u64) -> Result<TimeRange> {
        Ok(TimeRange {
            from: self.window_start(range.from, refresh_seconds)?,
            to: self.window_start(range.to, refresh_seconds)?,
        })
    }

    /// Step to the adjacent window. Moving forward past the live window
    /// (as of `now`) is refused by returning `window_start` unchanged.
    pub fn navigate(
        &self,
        window_start: DateTime<Utc>,
        direction: Direction,
        refresh_seconds: u64,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>> {
        let candidate = self.step(window_start, direction, refresh_seconds)?;
        if direction == Direction::Next
            && candidate > self.current_window_start(refresh_seconds, now)?
        {
            return Ok(window_start);
        }
        Ok(candidate)
    }

    /// Whether `navigate(.., Direction::Next, ..)` would move.
    pub fn can_navigate_next(
        &self,
        window_start: DateTime<Utc>,
        refresh_seconds: u64,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let next = self.step(window_start, Direction::Next, refresh_seconds)?;
        Ok(next <= self.current_window_start(refresh_seconds, now)?)
    }

    /// Start of the canonical window following the one starting at `window_start`.
    pub fn next_window_start(
        &self,
        window_start: DateTime<Utc>,
        refresh_seconds: u64,
    ) -> Result<DateTime<Utc>> {
        let stepped = self.step(window_start, Direction::Next, refresh_seconds)?;
        self.window_start(stepped, refresh_seconds)
    }

    /// Last millisecond covered by the window starting at `window_start`.
    pub fn window_end(
        &self,
        window_start: DateTime<Utc>,
        refresh_seconds: u64,
    ) -> Result<DateTime<Utc>> {
        Ok(self.next_window_start(window_start, refresh_seconds)? - Duration::milliseconds(1))
    }

    /// Every window start whose window intersects `[from, to]`, oldest first.
    pub fn windows_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        refresh_seconds: u64,
    ) -> Result<Vec<DateTime<Utc>>> {
        let last = self.window_start(to, refresh_seconds)?;
        let mut current = self.window_start(from, refresh_seconds)?;
        let mut windows = Vec::new();

        while current <= last {
            windows.push(current);
            current = self.next_window_start(current, refresh_seconds)?;
        }

        Ok(windows)
    }

    fn step(
        &self,
        window_start: DateTime<Utc>,
        direction: Direction,
        refresh_seconds: u64,
    ) -> Result<DateTime<Utc>> {
        let local_date = window_start.with_timezone(&self.tz).date_naive();

        match Granularity::classify(refresh_seconds)? {
            Granularity::SubDay(len) => {
                let len = Duration::seconds(len as i64);
                Ok(match direction {
                    Direction::Next => window_start + len,
                    Direction::Prev => window_start - len,
                })
            }
            Granularity::Day => self.local_midnight(shift_days(local_date, direction, 1)?),
            Granularity::Week => {
                let sunday = week_start(local_date)?;
                self.local_midnight(shift_days(sunday, direction, 7)?)
            }
            Granularity::Month => {
                let first = month_start(local_date)?;
                let shifted = match direction {
                    Direction::Next => first.checked_add_months(Months::new(1)),
                    Direction::Prev => first.checked_sub_months(Months::new(1)),
                }
                .ok_or_else(|| Error::Other(format!("month out of range from {first}")))?;
                self.local_midnight(shifted)
            }
        }
    }

    /// First instant of `date` in the configured zone. A DST gap can
    /// swallow midnight itself; the first local time that exists wins.
    fn local_midnight(&self, date: NaiveDate) -> Result<DateTime<Utc>> {
        let midnight = date.and_time(NaiveTime::MIN);
        (0..=8)
            .find_map(|quarter_hours| {
                self.tz
                    .from_local_datetime(&(midnight + Duration::minutes(15 * quarter_hours)))
                    .earliest()
            })
            .map(|local| local.with_timezone(&Utc))
            .ok_or_else(|| Error::Other(format!("no valid local midnight on {date} in {}", self.tz)))
    }
}

fn week_start(date: NaiveDate) -> Result<NaiveDate> {
    let back = u64::from(date.weekday().num_days_from_sunday());
    date.checked_sub_days(Days::new(back))
        .ok_or_else(|| Error::Other(format!("date out of range: {date}")))
}

fn month_start(date: NaiveDate) -> Result<NaiveDate> {
    date.with_day(1)
        .ok_or_else(|| Error::Other(format!("date out of range: {date}")))
}

fn shift_days(date: NaiveDate, direction: Direction, days: u64) -> Result<NaiveDate> {
    match direction {
        Direction::Next => date.checked_add_days(Days::new(days)),
        Direction::Prev => date.checked_sub_days(Days::new(days)),
    }
    .ok_or_else(|| Error::Other(format!("date out of range: {date}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw)
            .expect("valid timestamp")
            .with_timezone(&Utc)
    }

    fn utc() -> WindowCalculator {
        WindowCalculator::default()
    }

    #[test]
    fn test_sub_day_window_floors_from_midnight() {
        let start = utc()
            .window_start(ts("2026-03-10T10:47:13Z"), 900)
            .unwrap();
        assert_eq!(start, ts("2026-03-10T10:45:00Z"));

        let start = utc()
            .window_start(ts("2026-03-10T10:47:13Z"), 7_200)
            .unwrap();
        assert_eq!(start, ts("2026-03-10T10:00:00Z"));
    }

    #[test]
    fn test_sub_day_window_uses_local_midnight() {
        let berlin = WindowCalculator::new(chrono_tz::Europe::Berlin);
        // 00:30 local on Jan 16 (UTC+1).
        let start = berlin
            .window_start(ts("2026-01-15T23:30:00Z"), 3_600)
            .unwrap();
        assert_eq!(start, ts("2026-01-15T23:00:00Z"));
    }

    #[test]
    fn test_sub_day_window_on_dst_start_day() {
        // New York springs forward at 02:00 local on 2026-03-08, so local
        // midnight is 05:00Z and that day has only 23 hours.
        let ny = WindowCalculator::new(chrono_tz::America::New_York);
        let start = ny.window_start(ts("2026-03-08T12:30:00Z"), 3_600).unwrap();
        assert_eq!(start, ts("2026-03-08T12:00:00Z"));

        let day = ny.window_start(ts("2026-03-08T12:30:00Z"), DAY_SECONDS).unwrap();
        assert_eq!(day, ts("2026-03-08T05:00:00Z"));
    }

    #[test]
    fn test_rejects_invalid_lengths() {
        let at = ts("2026-03-10T10:47:13Z");
        assert!(matches!(utc().window_start(at, 0), Err(Error::Config(_))));
        assert!(matches!(utc().window_start(at, 90), Err(Error::Config(_))));
        assert!(matches!(utc().window_start(at, 45), Err(Error::Config(_))));
        assert!(matches!(
            utc().window_start(at, MONTH_APPROX_SECONDS + 60),
            Err(Error::Config(_))
        ));
        assert!(utc().window_start(at, 120).is_ok());
    }

    #[test]
    fn test_week_window_starts_on_sunday() {
        // 2026-03-11 is a Wednesday.
        let start = utc()
            .window_start(ts("2026-03-11T15:00:00Z"), WEEK_SECONDS)
            .unwrap();
        assert_eq!(start, ts("2026-03-08T00:00:00Z"));

        let sunday = utc()
            .window_start(ts("2026-03-08T23:59:59Z"), WEEK_SECONDS)
            .unwrap();
        assert_eq!(sunday, ts("2026-03-08T00:00:00Z"));
    }

    #[test]
    fn test_multi_day_window_starts_on_first_of_month() {
        let start = utc()
            .window_start(ts("2026-03-11T15:00:00Z"), 2 * DAY_SECONDS)
            .unwrap();
        assert_eq!(start, ts("2026-03-01T00:00:00Z"));

        let start = utc()
            .window_start(ts("2026-03-11T15:00:00Z"), MONTH_APPROX_SECONDS)
            .unwrap();
        assert_eq!(start, ts("2026-03-01T00:00:00Z"));
    }

    #[test]
    fn test_window_start_is_idempotent() {
        let zones = [
            WindowCalculator::default(),
            WindowCalculator::new(chrono_tz::Europe::Berlin),
            WindowCalculator::new(chrono_tz::America::New_York),
            WindowCalculator::new(chrono_tz::Asia::Kolkata),
        ];
        let stamps = [
            "2026-01-01T00:00:00Z",
            "2026-03-08T06:59:59Z",
            "2026-03-29T01:30:00Z",
            "2026-07-15T13:14:15.678Z",
            "2026-10-25T00:45:00Z",
            "2026-11-01T05:30:00Z",
            "2026-12-31T23:59:59.999Z",
        ];
        let lengths = [
            60,
            900,
            3_600,
            25_200,
            DAY_SECONDS,
            3 * DAY_SECONDS,
            WEEK_SECONDS,
            MONTH_APPROX_SECONDS,
        ];

        for calc in &zones {
            for raw in stamps {
                for len in lengths {
                    let once = calc.window_start(ts(raw), len).unwrap();
                    let twice = calc.window_start(once, len).unwrap();
                    assert_eq!(once, twice, "tz={} t={raw} len={len}", calc.timezone());
                    assert!(once <= ts(raw), "tz={} t={raw} len={len}", calc.timezone());
                }
            }
        }
    }

    #[test]
    fn test_navigate_day_clamps_at_live_edge() {
        let now = ts("2026-03-11T15:00:00Z");
        let today = ts("2026-03-11T00:00:00Z");
        let calc = utc();

        assert_eq!(
            calc.navigate(today, Direction::Next, DAY_SECONDS, now).unwrap(),
            today
        );
        assert!(!calc.can_navigate_next(today, DAY_SECONDS, now).unwrap());

        let yesterday = calc.navigate(today, Direction::Prev, DAY_SECONDS, now).unwrap();
        assert_eq!(yesterday, ts("2026-03-10T00:00:00Z"));
        assert!(calc.can_navigate_next(yesterday, DAY_SECONDS, now).unwrap());
        assert_eq!(
            calc.navigate(yesterday, Direction::Next, DAY_SECONDS, now).unwrap(),
            today
        );
    }

    #[test]
    fn test_navigate_week_and_month() {
        let now = ts("2026-03-11T15:00:00Z");
        let calc = utc();

        let prev_week = calc
            .navigate(ts("2026-03-08T00:00:00Z"), Direction::Prev, WEEK_SECONDS, now)
            .unwrap();
        assert_eq!(prev_week, ts("2026-03-01T00:00:00Z"));
        assert_eq!(
            calc.navigate(prev_week, Direction::Next, WEEK_SECONDS, now).unwrap(),
            ts("2026-03-08T00:00:00Z")
        );

        let month_len = 2 * DAY_SECONDS;
        let feb = calc
            .navigate(ts("2026-03-01T00:00:00Z"), Direction::Prev, month_len, now)
            .unwrap();
        assert_eq!(feb, ts("2026-02-01T00:00:00Z"));
        assert_eq!(
            calc.navigate(feb, Direction::Next, month_len, now).unwrap(),
            ts("2026-03-01T00:00:00Z")
        );
        assert_eq!(
            calc.navigate(ts("2026-03-01T00:00:00Z"), Direction::Next, month_len, now)
                .unwrap(),
            ts("2026-03-01T00:00:00Z")
        );
    }

    #[test]
    fn test_navigate_sub_day_is_plain_arithmetic() {
        let now = ts("2026-03-11T15:00:00Z");
        let calc = utc();
        let start = ts("2026-03-11T10:45:00Z");

        assert_eq!(
            calc.navigate(start, Direction::Prev, 900, now).unwrap(),
            ts("2026-03-11T10:30:00Z")
        );
        assert_eq!(
            calc.navigate(start, Direction::Next, 900, now).unwrap(),
            ts("2026-03-11T11:00:00Z")
        );
        assert_eq!(
            calc.navigate(ts("2026-03-11T15:00:00Z"), Direction::Next, 900, now)
                .unwrap(),
            ts("2026-03-11T15:00:00Z")
        );
    }

    #[test]
    fn test_windows_between_restarts_at_midnight() {
        // 7h windows: 00:00, 07:00, 14:00, 21:00, then the next day restarts.
        let windows = utc()
            .windows_between(ts("2026-03-10T22:10:00Z"), ts("2026-03-11T03:00:00Z"), 25_200)
            .unwrap();
        assert_eq!(
            windows,
            vec![ts("2026-03-10T21:00:00Z"), ts("2026-03-11T00:00:00Z")]
        );

        let end = utc()
            .window_end(ts("2026-03-10T21:00:00Z"), 25_200)
            .unwrap();
        assert_eq!(end, ts("2026-03-10T23:59:59.999Z"));
    }

    #[test]
    fn test_normalize_range_snaps_both_ends() {
        let range = TimeRange::new(ts("2026-03-10T10:47:13Z"), ts("2026-03-10T11:59:59Z"));
        let normalized = utc().normalize_range(&range, 3_600).unwrap();
        assert_eq!(normalized.from, ts("2026-03-10T10:00:00Z"));
        assert_eq!(normalized.to, ts("2026-03-10T11:00:00Z"));
    }

    #[test]
    fn test_window_for_carries_start_and_length() {
        let window = utc().window_for(ts("2026-03-10T10:47:13Z"), 3_600).unwrap();
        assert_eq!(window.start, ts("2026-03-10T10:00:00Z"));
        assert_eq!(window.length, 3_600);
        assert!(utc().window_for(ts("2026-03-10T10:47:13Z"), 90).is_err());
    }

    #[test]
    fn test_unknown_timezone_is_config_error() {
        assert!(matches!(
            WindowCalculator::from_timezone_name("Mars/Olympus"),
            Err(Error::Config(_))
        ));
        assert_eq!(
            WindowCalculator::from_timezone_name("Europe/Berlin")
                .unwrap()
                .timezone(),
            chrono_tz::Europe::Berlin
        );
    }
}
