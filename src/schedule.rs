//! Day/hour schedule table (§10 "schedule" per-camera setting), polled
//! once per tick by the Watchdog's health loop.

use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};

/// One `start..end` hour range, inclusive of `start`, exclusive of `end`,
/// on a 24-hour clock. `start == end` means "all day".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HourRange {
    pub start: u8,
    pub end: u8,
}

impl HourRange {
    pub fn contains(&self, hour: u8) -> bool {
        if self.start == self.end {
            return true;
        }
        if self.start < self.end {
            hour >= self.start && hour < self.end
        } else {
            // wraps past midnight, e.g. 22..6
            hour >= self.start || hour < self.end
        }
    }
}

/// A per-weekday set of active hour ranges. An empty `Vec` for a day means
/// the camera is inactive that entire day.
#[derive(Debug, Clone, Default)]
pub struct Schedule {
    days: [Vec<HourRange>; 7],
}

fn weekday_index(w: Weekday) -> usize {
    w.num_days_from_monday() as usize
}

impl Schedule {
    pub fn new() -> Self {
        Schedule::default()
    }

    pub fn always_on() -> Self {
        let mut s = Schedule::new();
        for day in s.days.iter_mut() {
            day.push(HourRange { start: 0, end: 0 });
        }
        s
    }

    pub fn set_day(&mut self, day: Weekday, ranges: Vec<HourRange>) {
        self.days[weekday_index(day)] = ranges;
    }

    /// Checked once per watchdog tick: is recording active right now?
    pub fn is_active(&self, at: DateTime<Utc>) -> bool {
        let ranges = &self.days[weekday_index(at.weekday())];
        let hour = at.hour() as u8;
        ranges.iter().any(|r| r.contains(hour))
    }
}
