use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use chrono_tz::Tz;

use crate::error::{BookingError, BookingResult};

#[derive(Debug, Clone)]
pub struct BusinessHours {
    pub timezone: Tz,
    pub open_minute: u32,
    pub close_minute: u32,
    /// Time kept free before closing. Zero means "use the fallback margin".
    pub reserved_buffer_minutes: u32,
    pub fallback_margin_minutes: u32,
    pub after_hours_open_minute: u32,
    pub after_hours_close_minute: u32,
}

impl BusinessHours {
    pub fn reserved_buffer(&self) -> u32 {
        if self.reserved_buffer_minutes != 0 {
            self.reserved_buffer_minutes
        } else {
            self.fallback_margin_minutes
        }
    }

    pub fn latest_start_minute(&self) -> u32 {
        self.close_minute.saturating_sub(self.reserved_buffer())
    }

    fn latest_after_hours_start_minute(&self) -> u32 {
        self.after_hours_close_minute.saturating_sub(self.reserved_buffer())
    }

    pub fn check(&self, start: DateTime<Utc>, after_hours_allowed: bool) -> BookingResult<bool> {
        let local = start.with_timezone(&self.timezone);
        let weekday = local.weekday();
        if matches!(weekday, Weekday::Sat | Weekday::Sun) {
            return Err(BookingError::ClosedDay {
                date: local.date_naive(),
                weekday,
            });
        }

        let minute = local.hour() * 60 + local.minute();
        if (self.open_minute..=self.latest_start_minute()).contains(&minute) {
            return Ok(false);
        }

        if after_hours_allowed
            && (self.after_hours_open_minute..=self.latest_after_hours_start_minute()).contains(&minute)
        {
            return Ok(true);
        }

        let (earliest, latest) = if after_hours_allowed {
            (self.after_hours_open_minute, self.latest_after_hours_start_minute())
        } else {
            (self.open_minute, self.latest_start_minute())
        };
        Err(BookingError::OutsideBusinessHours {
            requested: local.format("%H:%M").to_string(),
            earliest: clock(earliest),
            latest: clock(latest),
        })
    }
}

impl Default for BusinessHours {
    fn default() -> Self {
        Self {
            timezone: chrono_tz::Europe::London,
            open_minute: 8 * 60,
            close_minute: 18 * 60,
            reserved_buffer_minutes: 0,
            fallback_margin_minutes: 60,
            after_hours_open_minute: 6 * 60,
            after_hours_close_minute: 21 * 60,
        }
    }
}

fn clock(minute: u32) -> String {
    format!("{:02}:{:02}", minute / 60, minute % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time_window::TimeWindowResolver;

    fn start(local: &str) -> DateTime<Utc> {
        TimeWindowResolver::new(chrono_tz::Europe::London, 0)
            .resolve(local, 60)
            .unwrap()
            .start
    }

    #[test]
    fn weekday_morning_is_regular_hours() {
        let hours = BusinessHours::default();
        assert_eq!(hours.check(start("2024-07-15T10:00"), false).unwrap(), false);
        assert_eq!(hours.check(start("2024-07-15T08:00"), false).unwrap(), false);
    }

    #[test]
    fn weekends_are_closed() {
        let hours = BusinessHours::default();
        let err = hours.check(start("2024-07-13T10:00"), true).unwrap_err();
        assert!(matches!(err, BookingError::ClosedDay { weekday: Weekday::Sat, .. }));
        let err = hours.check(start("2024-07-14T10:00"), false).unwrap_err();
        assert!(matches!(err, BookingError::ClosedDay { weekday: Weekday::Sun, .. }));
    }

    #[test]
    fn fallback_margin_applies_when_buffer_is_zero() {
        let hours = BusinessHours::default();
        assert_eq!(hours.latest_start_minute(), 17 * 60);
        assert!(hours.check(start("2024-07-15T17:00"), false).is_ok());
        let err = hours.check(start("2024-07-15T17:01"), false).unwrap_err();
        match err {
            BookingError::OutsideBusinessHours { requested, earliest, latest } => {
                assert_eq!(requested, "17:01");
                assert_eq!(earliest, "08:00");
                assert_eq!(latest, "17:00");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn configured_buffer_overrides_fallback() {
        let hours = BusinessHours {
            reserved_buffer_minutes: 120,
            ..BusinessHours::default()
        };
        assert!(hours.check(start("2024-07-15T16:00"), false).is_ok());
        assert!(hours.check(start("2024-07-15T16:30"), false).is_err());
    }

    #[test]
    fn after_hours_only_for_allowed_services() {
        let hours = BusinessHours::default();
        assert_eq!(hours.check(start("2024-07-15T19:00"), true).unwrap(), true);
        assert_eq!(hours.check(start("2024-07-15T07:00"), true).unwrap(), true);
        assert!(matches!(
            hours.check(start("2024-07-15T19:00"), false),
            Err(BookingError::OutsideBusinessHours { .. })
        ));
        assert!(matches!(
            hours.check(start("2024-07-15T05:30"), true),
            Err(BookingError::OutsideBusinessHours { .. })
        ));
    }

    #[test]
    fn hours_are_judged_in_local_time_in_winter_too() {
        let hours = BusinessHours::default();
        // 08:00 GMT in January is 08:00 local; 07:30 is before opening.
        assert!(hours.check(start("2024-01-15T08:00"), false).is_ok());
        assert!(hours.check(start("2024-01-15T07:30"), false).is_err());
    }
}
