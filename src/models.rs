use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::attendance;
use crate::calendar::CourseRange;
use crate::snapshot::ValidatedRow;

/// Canonical per-student attendance record, keyed by `email_id`.
///
/// The derived fields are computed in [`StudentAttendanceRecord::new`] and there is
/// no way to change an input field without going through it again.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudentAttendanceRecord {
    email_id: String,
    student_name: String,
    phone_no: String,
    #[serde(flatten)]
    course: CourseRange,
    classes_attended: u32,
    medical_reason: bool,
    working_days_total: u32,
    attendance_percentage: f64,
}

impl StudentAttendanceRecord {
    pub fn new(
        email_id: String,
        student_name: String,
        phone_no: String,
        course: CourseRange,
        classes_attended: u32,
        medical_reason: bool,
    ) -> Self {
        Self {
            email_id,
            student_name,
            phone_no,
            course,
            classes_attended,
            medical_reason,
            working_days_total: course.working_days(),
            attendance_percentage: attendance::percentage(&course, classes_attended),
        }
    }

    pub fn from_row(row: &ValidatedRow) -> Self {
        Self::new(
            row.email_id.clone(),
            row.student_name.clone(),
            row.phone_no.clone(),
            row.course,
            row.classes_attended,
            row.medical_reason,
        )
    }

    pub fn email_id(&self) -> &str {
        &self.email_id
    }

    pub fn student_name(&self) -> &str {
        &self.student_name
    }

    pub fn phone_no(&self) -> &str {
        &self.phone_no
    }

    pub fn course(&self) -> CourseRange {
        self.course
    }

    pub fn classes_attended(&self) -> u32 {
        self.classes_attended
    }

    pub fn medical_reason(&self) -> bool {
        self.medical_reason
    }

    pub fn working_days_total(&self) -> u32 {
        self.working_days_total
    }

    pub fn attendance_percentage(&self) -> f64 {
        self.attendance_percentage
    }

    pub fn eligible(&self) -> bool {
        attendance::warning_eligible(self.attendance_percentage, self.medical_reason)
    }

    /// Attendance above 100% means the snapshot counted more classes than working days.
    pub fn exceeds_working_days(&self) -> bool {
        self.classes_attended > self.working_days_total
    }
}

/// A record as returned to callers, with eligibility evaluated at read time.
#[derive(Debug, Clone, Serialize)]
pub struct RecordView {
    #[serde(flatten)]
    pub record: StudentAttendanceRecord,
    pub eligible: bool,
}

impl From<StudentAttendanceRecord> for RecordView {
    fn from(record: StudentAttendanceRecord) -> Self {
        let eligible = record.eligible();
        Self { record, eligible }
    }
}

/// Who is calling a boundary operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    Admin,
    /// A student linked to the record with this `email_id`.
    Student(String),
}

impl FromStr for Principal {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().split_once(':') {
            None if s.trim().eq_ignore_ascii_case("admin") => Ok(Principal::Admin),
            Some((role, key))
                if role.eq_ignore_ascii_case("student") && !key.trim().is_empty() =>
            {
                Ok(Principal::Student(key.trim().to_lowercase()))
            }
            _ => Err(format!(
                "invalid principal `{s}`: expected `admin` or `student:<email_id>`"
            )),
        }
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Principal::Admin => write!(f, "admin"),
            Principal::Student(key) => write!(f, "student:{key}"),
        }
    }
}
