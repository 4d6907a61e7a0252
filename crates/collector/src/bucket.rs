use chrono::{DateTime, TimeDelta, Utc};
use std::time::Duration;

/// Maps observation timestamps onto fixed-width bucket starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bucketing {
    width_us: i64,
}

impl Bucketing {
    /// Widths below one microsecond are clamped to one microsecond.
    pub fn new(width: Duration) -> Self {
        let width_us = i64::try_from(width.as_micros()).unwrap_or(i64::MAX);
        Self {
            width_us: width_us.max(1),
        }
    }

    pub fn width(&self) -> TimeDelta {
        TimeDelta::microseconds(self.width_us)
    }

    /// Floor of `t` to the bucket width, on the microsecond epoch.
    pub fn bucket_of(&self, t: DateTime<Utc>) -> DateTime<Utc> {
        let ts = t.timestamp_micros();
        let start = ts - ts.rem_euclid(self.width_us);
        DateTime::from_timestamp_micros(start).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Whether the bucket starting at `start` has aged past `eligibility` at `now`.
    pub fn is_closed(&self, start: DateTime<Utc>, now: DateTime<Utc>, eligibility: TimeDelta) -> bool {
        now.signed_duration_since(start) > eligibility
    }
}

impl Default for Bucketing {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}
