use chrono::{Datelike, NaiveDate, Weekday};
use serde::Serialize;

use crate::error::InvalidRangeError;

/// The weekly non-instructional day.
pub const REST_DAY: Weekday = Weekday::Sun;

/// An inclusive course calendar range with `end >= start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CourseRange {
    #[serde(rename = "course_start_date")]
    start: NaiveDate,
    #[serde(rename = "course_end_date")]
    end: NaiveDate,
}

impl CourseRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, InvalidRangeError> {
        if end < start {
            return Err(InvalidRangeError { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Calendar days in the range, both endpoints included.
    pub fn calendar_days(&self) -> u32 {
        // end >= start, so the difference is never negative
        (self.end - self.start).num_days() as u32 + 1
    }

    /// Instructional days in the range: every day except [`REST_DAY`].
    ///
    /// Every run of seven consecutive days holds exactly one rest day, so only the
    /// trailing partial week needs inspecting.
    pub fn working_days(&self) -> u32 {
        let days = self.calendar_days();
        let full_weeks = days / 7;
        let remainder = days % 7;

        let offset = days_after_rest_day(self.start.weekday());
        let rest_in_remainder = remainder > 0 && (offset == 0 || offset + remainder > 7);

        full_weeks * 6 + remainder - u32::from(rest_in_remainder)
    }
}

/// Counts working days in `[start, end]`.
pub fn working_days(start: NaiveDate, end: NaiveDate) -> Result<u32, InvalidRangeError> {
    Ok(CourseRange::new(start, end)?.working_days())
}

fn days_after_rest_day(day: Weekday) -> u32 {
    (day.num_days_from_monday() + 7 - REST_DAY.num_days_from_monday()) % 7
}
