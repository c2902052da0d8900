//! Tabular attendance snapshots.
//!
//! A snapshot is a CSV file with one row per student and the columns
//! `slno, student_name, phone_no, email_id, course_start_date, course_end_date,
//! classes_attended, medical_reason`. Rows are read loosely, every column optional,
//! and then validated one at a time so a bad row never stops the rest of the file.

use std::io::Read;
use std::path::Path;

use chrono::NaiveDate;
use csv::ByteRecord;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;

use crate::calendar::CourseRange;
use crate::error::RowError;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// One snapshot row as it appears in the file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SnapshotRow {
    pub slno: Option<String>,
    pub student_name: Option<String>,
    pub phone_no: Option<String>,
    pub email_id: Option<String>,
    pub course_start_date: Option<String>,
    pub course_end_date: Option<String>,
    pub classes_attended: Option<String>,
    pub medical_reason: Option<String>,
    /// Set when the record could not be decoded into the columns above.
    #[serde(skip)]
    pub read_error: Option<String>,
}

/// A row that passed validation and can be handed to the reconciler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedRow {
    pub email_id: String,
    pub student_name: String,
    pub phone_no: String,
    pub course: CourseRange,
    pub classes_attended: u32,
    pub medical_reason: bool,
}

impl SnapshotRow {
    pub fn validate(&self) -> Result<ValidatedRow, RowError> {
        if let Some(detail) = &self.read_error {
            return Err(RowError::MalformedRecord {
                detail: detail.clone(),
            });
        }

        let student_name = required("student_name", &self.student_name)?.to_string();
        let phone_no = required("phone_no", &self.phone_no)?.to_string();
        let email_id = parse_email(required("email_id", &self.email_id)?)?;
        let start = parse_date(
            "course_start_date",
            required("course_start_date", &self.course_start_date)?,
        )?;
        let end = parse_date(
            "course_end_date",
            required("course_end_date", &self.course_end_date)?,
        )?;
        let classes_attended =
            parse_count(required("classes_attended", &self.classes_attended)?)?;
        let medical_reason =
            parse_medical_reason(required("medical_reason", &self.medical_reason)?)?;
        let course = CourseRange::new(start, end)?;

        Ok(ValidatedRow {
            email_id,
            student_name,
            phone_no,
            course,
            classes_attended,
            medical_reason,
        })
    }

    /// The row's email as written, for reporting rows that failed validation.
    pub fn email_hint(&self) -> Option<String> {
        self.email_id
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_lowercase)
    }
}

/// Reads every record of a snapshot.
///
/// Only an unreadable input fails the whole file. A record that cannot be decoded,
/// such as one with bytes that are not UTF-8, comes back as a row carrying
/// `read_error` so it is reported alongside the others.
pub fn read_snapshot<R: Read>(input: R) -> csv::Result<Vec<SnapshotRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(input);

    let headers = reader.byte_headers()?.clone();
    let mut record = ByteRecord::new();
    let mut rows = Vec::new();
    while reader.read_byte_record(&mut record)? {
        let row = record
            .deserialize::<SnapshotRow>(Some(&headers))
            .unwrap_or_else(|e| undecodable(&headers, &record, &e));
        rows.push(row);
    }
    Ok(rows)
}

pub fn read_snapshot_file(path: &Path) -> csv::Result<Vec<SnapshotRow>> {
    let file = std::fs::File::open(path)?;
    read_snapshot(file)
}

/// Keeps the identifying cells, lossily decoded, so the failure can still be traced
/// back to a student.
fn undecodable(headers: &ByteRecord, record: &ByteRecord, error: &csv::Error) -> SnapshotRow {
    let cell = |name: &str| {
        headers
            .iter()
            .position(|h| h == name.as_bytes())
            .and_then(|i| record.get(i))
            .map(|v| String::from_utf8_lossy(v).into_owned())
    };
    SnapshotRow {
        slno: cell("slno"),
        email_id: cell("email_id"),
        read_error: Some(error.to_string()),
        ..SnapshotRow::default()
    }
}

fn required<'a>(field: &'static str, value: &'a Option<String>) -> Result<&'a str, RowError> {
    let value = value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(RowError::MissingField { field })?;
    if value.chars().any(char::is_control) {
        return Err(RowError::ControlCharacter { field });
    }
    Ok(value)
}

fn parse_email(value: &str) -> Result<String, RowError> {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    if EMAIL_RE.is_match(value) {
        Ok(value.to_lowercase())
    } else {
        Err(RowError::MalformedEmail {
            value: value.to_string(),
        })
    }
}

fn parse_date(field: &'static str, value: &str) -> Result<NaiveDate, RowError> {
    NaiveDate::parse_from_str(value, DATE_FORMAT).map_err(|_| RowError::MalformedDate {
        field,
        value: value.to_string(),
    })
}

fn parse_count(value: &str) -> Result<u32, RowError> {
    // bounded to what the store's INTEGER column holds
    value
        .parse::<u32>()
        .ok()
        .filter(|n| i32::try_from(*n).is_ok())
        .ok_or_else(|| RowError::MalformedCount {
            value: value.to_string(),
        })
}

fn parse_medical_reason(value: &str) -> Result<bool, RowError> {
    if value.eq_ignore_ascii_case("yes") {
        Ok(true)
    } else if value.eq_ignore_ascii_case("no") {
        Ok(false)
    } else {
        Err(RowError::MalformedMedicalReason {
            value: value.to_string(),
        })
    }
}
