use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;

/// Horizons, in minutes, of the online-visitor counts.
pub const ONLINE_MINUTES: [i64; 3] = [1, 5, 15];

/// Flat calendar approximations used for the weekly and monthly averages.
pub const DAYS_PER_WEEK: f64 = 7.0;
pub const DAYS_PER_MONTH: f64 = 30.0;

/// A half-open `[start, end)` interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl Window {
    pub const fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, ts: NaiveDateTime) -> bool {
        self.start <= ts && ts < self.end
    }
}

/// The named windows of a statistics request, all relative to `now`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Windows {
    pub today: Window,
    pub yesterday: Window,
    pub this_week: Window,
    pub last_week: Window,
    pub this_month: Window,
    pub total: Window,
}

impl Windows {
    pub fn at(now: NaiveDateTime, tracking_start: NaiveDateTime) -> Self {
        let today = now.date();
        let today_start = start_of_day(today);
        let yesterday_start = today_start - Duration::days(1);
        let monday = start_of_day(week_start(today));
        let month_start = start_of_day(today.with_day(1).unwrap_or(today));

        Self {
            today: Window::new(today_start, now),
            yesterday: Window::new(yesterday_start, today_start),
            this_week: Window::new(monday, now),
            last_week: Window::new(monday - Duration::days(7), monday),
            this_month: Window::new(month_start, now),
            total: Window::new(tracking_start, now),
        }
    }
}

pub fn start_of_day(day: NaiveDate) -> NaiveDateTime {
    day.and_time(NaiveTime::MIN)
}

/// Monday of the week containing `day`. Sunday counts as day 7, so it
/// belongs to the week that started six days earlier.
pub fn week_start(day: NaiveDate) -> NaiveDate {
    let offset = i64::from(day.weekday().number_from_monday()) - 1;
    day - Duration::days(offset)
}

/// Start of the online-N-minutes horizon; the boundary instant itself counts.
pub fn online_since(now: NaiveDateTime, minutes: i64) -> NaiveDateTime {
    now - Duration::minutes(minutes)
}

/// Whole days between tracking start and `now`, never less than one.
pub fn days_elapsed(tracking_start: NaiveDateTime, now: NaiveDateTime) -> i64 {
    (now - tracking_start).num_days().max(1)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Averages {
    pub daily: f64,
    pub weekly: f64,
    pub monthly: f64,
}

impl Averages {
    #[allow(clippy::cast_precision_loss)]
    pub fn over(total: u64, days_elapsed: i64) -> Self {
        let daily = total as f64 / days_elapsed.max(1) as f64;
        Self {
            daily,
            weekly: daily * DAYS_PER_WEEK,
            monthly: daily * DAYS_PER_MONTH,
        }
    }
}
