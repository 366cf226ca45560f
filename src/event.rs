//! Event data model (§3 "Event"): a contiguous period of motion, identified
//! by a timestamp-derived id, narrowed to the fields the Camera Pipeline
//! and Metadata Store need.

use chrono::{DateTime, Utc};

/// A contiguous period of detected motion, bounded by `event_gap`.
#[derive(Debug, Clone)]
pub struct Event {
    pub id: String,
    pub device_id: u32,
    pub start: DateTime<Utc>,
    pub last_motion: DateTime<Utc>,
    pub frame_count: u64,
    pub movie_handles: Vec<String>,
}

impl Event {
    /// `id` is timestamp-derived (`%Y%m%d%H%M%S`-style string), doubling
    /// as the movie filename stem.
    pub fn open(device_id: u32, start: DateTime<Utc>) -> Self {
        let id = start.format("%Y%m%d%H%M%S").to_string();
        Event {
            id,
            device_id,
            start,
            last_motion: start,
            frame_count: 0,
            movie_handles: Vec::new(),
        }
    }

    pub fn record_motion(&mut self, at: DateTime<Utc>) {
        self.last_motion = at;
        self.frame_count += 1;
    }

    /// Event closes when no motion for `event_gap` seconds (§3).
    pub fn should_close(&self, now: DateTime<Utc>, event_gap_secs: i64) -> bool {
        (now - self.last_motion).num_seconds() >= event_gap_secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn closes_after_gap_elapses() {
        let start = Utc::now();
        let ev = Event::open(1, start);
        assert!(!ev.should_close(start + Duration::seconds(1), 2));
        assert!(ev.should_close(start + Duration::seconds(2), 2));
    }
}
