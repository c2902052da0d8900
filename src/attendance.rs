use chrono::NaiveDate;

use crate::calendar::CourseRange;
use crate::error::InvalidRangeError;

/// Attendance below this percentage makes a student eligible for a warning.
pub const WARNING_THRESHOLD: f64 = 90.0;

/// Percentage of working days attended, rounded half-up to two decimals.
///
/// Returns `0.0` when the range has no working days. Counts above the number of
/// working days are not clamped and yield values over 100, which callers should
/// treat as a data-quality problem in the snapshot.
pub fn percentage(range: &CourseRange, classes_attended: u32) -> f64 {
    let working_days = range.working_days();
    if working_days == 0 {
        return 0.0;
    }
    round_2dp(f64::from(classes_attended) / f64::from(working_days) * 100.0)
}

pub fn attendance_percentage(
    start: NaiveDate,
    end: NaiveDate,
    classes_attended: u32,
) -> Result<f64, InvalidRangeError> {
    Ok(percentage(&CourseRange::new(start, end)?, classes_attended))
}

/// Whether a low-attendance warning may be sent right now.
pub fn warning_eligible(percentage: f64, medical_reason: bool) -> bool {
    percentage < WARNING_THRESHOLD && !medical_reason
}

fn round_2dp(value: f64) -> f64 {
    // f64::round rounds halves away from zero; percentages are never negative
    (value * 100.0).round() / 100.0
}
