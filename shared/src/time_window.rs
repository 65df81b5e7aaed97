use chrono::{DateTime, Duration, LocalResult, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{BookingError, BookingResult};

const ACCEPTED_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%d %H:%M:%S",
];

/// Half-open interval `[start, end)` in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Slot {
    pub fn overlaps(&self, other: &Slot) -> bool {
        self.start < other.end && self.end > other.start
    }
}

#[derive(Debug, Clone)]
pub struct TimeWindowResolver {
    pub timezone: Tz,
    pub travel_buffer_minutes: u32,
}

impl TimeWindowResolver {
    pub fn new(timezone: Tz, travel_buffer_minutes: u32) -> Self {
        Self { timezone, travel_buffer_minutes }
    }

    pub fn resolve(&self, local_start: &str, duration_minutes: u32) -> BookingResult<Slot> {
        let civil = parse_civil(local_start)?;
        let start = civil_to_instant(self.timezone, civil)?;
        let length = i64::from(duration_minutes) + i64::from(self.travel_buffer_minutes);
        Ok(Slot {
            start,
            end: start + Duration::minutes(length),
        })
    }
}

pub fn parse_civil(input: &str) -> BookingResult<NaiveDateTime> {
    let trimmed = input.trim();
    ACCEPTED_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
        .ok_or_else(|| {
            BookingError::InvalidTimeFormat(format!(
                "'{}' is not a date-time like 2024-07-15T10:00",
                input
            ))
        })
}

/// Uses the offset in force at the civil time itself. A repeated hour
/// resolves to its first occurrence; a skipped hour is rejected.
pub fn civil_to_instant(tz: Tz, civil: NaiveDateTime) -> BookingResult<DateTime<Utc>> {
    match tz.from_local_datetime(&civil) {
        LocalResult::Single(dt) => Ok(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(earliest, _) => Ok(earliest.with_timezone(&Utc)),
        LocalResult::None => Err(BookingError::InvalidTimeFormat(format!(
            "{} does not exist in {} because the clocks go forward",
            civil.format("%Y-%m-%d %H:%M"),
            tz
        ))),
    }
}
