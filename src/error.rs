use chrono::NaiveDate;
use serde::Serialize;
use thiserror::Error;

/// Course end date falls before the start date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize)]
#[error("course_end_date {end} is before course_start_date {start}")]
pub struct InvalidRangeError {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Row-level validation failure. Never fatal to a batch.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RowError {
    #[error("missing required field `{field}`")]
    MissingField { field: &'static str },
    #[error("field `{field}` has malformed date `{value}` (expected YYYY-MM-DD)")]
    MalformedDate { field: &'static str, value: String },
    #[error("classes_attended `{value}` is not a non-negative integer")]
    MalformedCount { value: String },
    #[error("medical_reason `{value}` must be Yes or No")]
    MalformedMedicalReason { value: String },
    #[error("email_id `{value}` is not a valid email address")]
    MalformedEmail { value: String },
    #[error("field `{field}` contains a control character")]
    ControlCharacter { field: &'static str },
    #[error("record could not be decoded: {detail}")]
    MalformedRecord { detail: String },
    #[error(transparent)]
    InvalidRange(#[from] InvalidRangeError),
}

/// Failure of the record store.
///
/// `Rejected` concerns the one record being written; the other variants are
/// infrastructure failures and fatal to an in-flight batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("record store unavailable: {0}")]
    Unavailable(String),
    #[error("record store returned invalid data: {0}")]
    InvalidData(String),
    #[error("record store rejected the record: {0}")]
    Rejected(String),
}

impl StoreError {
    pub fn is_row_level(&self) -> bool {
        matches!(self, StoreError::Rejected(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            // SQLSTATE class 22 (data exception) and 23 (integrity constraint violation)
            sqlx::Error::Database(db) if db.code().is_some_and(|c| is_data_error(&c)) => {
                StoreError::Rejected(db.message().to_string())
            }
            _ => StoreError::Unavailable(e.to_string()),
        }
    }
}

fn is_data_error(sqlstate: &str) -> bool {
    sqlstate.starts_with("22") || sqlstate.starts_with("23")
}

/// Failures surfaced by the boundary operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("principal is not allowed to perform this operation")]
    Forbidden,
    #[error("no attendance record for `{0}`")]
    NotFound(String),
    #[error(
        "`{email_id}` is not eligible for a warning (attendance {percentage:.2}%, medical reason: {medical_reason})"
    )]
    NotEligible {
        email_id: String,
        percentage: f64,
        medical_reason: bool,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}
