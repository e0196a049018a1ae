//! Time sources and calendar arithmetic.
//!
//! Timestamps throughout the crate are milliseconds since the Unix epoch.
//! Calendar-dependent rules (the start of "today", whether two instants fall
//! on the same day) go through [`Calendar`] so they can be pinned in tests.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{Datelike, FixedOffset, NaiveDate, Offset, Utc};

pub const HOUR_MS: i64 = 60 * 60 * 1000;
pub const DAY_MS: i64 = 24 * HOUR_MS;

/// Days between 0001-01-01 (day 1 of the common era) and 1970-01-01.
const UNIX_EPOCH_DAYS_FROM_CE: i64 = 719_163;

pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(now_ms: i64) -> Self {
        Self {
            now: AtomicI64::new(now_ms),
        }
    }

    pub fn set(&self, now_ms: i64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: i64) {
        self.now.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Calendar used to map instants to days, at a fixed UTC offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Calendar {
    offset: FixedOffset,
}

impl Default for Calendar {
    fn default() -> Self {
        Self::utc()
    }
}

impl Calendar {
    pub fn utc() -> Self {
        Self {
            offset: Utc.fix(),
        }
    }

    /// Returns `None` when the offset is outside +/- 24 hours.
    pub fn from_offset_minutes(minutes: i32) -> Option<Self> {
        FixedOffset::east_opt(minutes.checked_mul(60)?).map(|offset| Self { offset })
    }

    pub fn offset_minutes(&self) -> i32 {
        self.offset.local_minus_utc() / 60
    }

    fn offset_ms(&self) -> i64 {
        i64::from(self.offset.local_minus_utc()) * 1000
    }

    /// Calendar day containing the instant.
    pub fn day_of(&self, ms: i64) -> NaiveDate {
        let days = (ms + self.offset_ms()).div_euclid(DAY_MS) + UNIX_EPOCH_DAYS_FROM_CE;
        i32::try_from(days)
            .ok()
            .and_then(NaiveDate::from_num_days_from_ce_opt)
            .unwrap_or(NaiveDate::MIN)
    }

    /// First millisecond of the given day.
    pub fn start_of_day(&self, date: NaiveDate) -> i64 {
        (i64::from(date.num_days_from_ce()) - UNIX_EPOCH_DAYS_FROM_CE) * DAY_MS - self.offset_ms()
    }

    /// Last millisecond of the given day.
    pub fn end_of_day(&self, date: NaiveDate) -> i64 {
        self.start_of_day(date) + DAY_MS - 1
    }

    pub fn start_of_today(&self, now_ms: i64) -> i64 {
        self.start_of_day(self.day_of(now_ms))
    }

    pub fn same_day(&self, a_ms: i64, b_ms: i64) -> bool {
        self.day_of(a_ms) == self.day_of(b_ms)
    }

    /// `YYYY-MM-DD` form of the day containing the instant.
    pub fn iso_date(&self, ms: i64) -> String {
        self.day_of(ms).format("%Y-%m-%d").to_string()
    }
}
