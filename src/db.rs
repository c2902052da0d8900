use anyhow::Context;
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{postgres::PgRow, PgPool, Row};

use crate::calendar::CourseRange;
use crate::error::StoreError;
use crate::models::{Principal, StudentAttendanceRecord};
use crate::snapshot::SnapshotRow;
use crate::store::RecordStore;

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("failed to run migrations")?;
    Ok(())
}

/// Looks up the role and linked student of an account managed by the auth layer.
pub async fn resolve_principal(
    pool: &PgPool,
    username: &str,
) -> anyhow::Result<Option<Principal>> {
    let row = sqlx::query(
        "SELECT role, student_email_id FROM attendance_warning.user_accounts WHERE username = $1",
    )
    .bind(username)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };
    let role: String = row.get("role");
    let linked: Option<String> = row.get("student_email_id");

    match (role.as_str(), linked) {
        ("admin", _) => Ok(Some(Principal::Admin)),
        ("student", Some(email_id)) => {
            Ok(Some(Principal::Student(email_id.trim().to_lowercase())))
        }
        (other, _) => anyhow::bail!("account `{username}` has unusable role `{other}`"),
    }
}

/// A small demo snapshot: one warning-eligible student, one exempt on medical
/// grounds, one with full attendance.
pub fn seed_rows() -> Vec<SnapshotRow> {
    let students = [
        ("1", "Avery Lee", "555-0101", "avery.lee@example.com", "52", "No"),
        ("2", "Jules Moreno", "555-0102", "jules.moreno@example.com", "40", "Yes"),
        ("3", "Kiara Patel", "555-0103", "kiara.patel@example.com", "60", "No"),
    ];

    students
        .into_iter()
        .map(|(slno, name, phone, email, attended, medical)| SnapshotRow {
            slno: Some(slno.to_string()),
            student_name: Some(name.to_string()),
            phone_no: Some(phone.to_string()),
            email_id: Some(email.to_string()),
            course_start_date: Some("2026-01-05".to_string()),
            course_end_date: Some("2026-03-15".to_string()),
            classes_attended: Some(attended.to_string()),
            medical_reason: Some(medical.to_string()),
            read_error: None,
        })
        .collect()
}

/// PostgreSQL-backed [`RecordStore`].
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const SELECT_RECORD: &str = "SELECT email_id, student_name, phone_no, course_start_date, \
     course_end_date, classes_attended, medical_reason \
     FROM attendance_warning.student_attendance";

#[async_trait]
impl RecordStore for PgStore {
    async fn get(&self, email_id: &str) -> Result<Option<StudentAttendanceRecord>, StoreError> {
        let row = sqlx::query(&format!("{SELECT_RECORD} WHERE email_id = $1"))
            .bind(email_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn upsert(&self, record: &StudentAttendanceRecord) -> Result<bool, StoreError> {
        let classes_attended = to_column("classes_attended", record.classes_attended())?;
        let working_days_total = to_column("working_days_total", record.working_days_total())?;

        // One statement, so every column including the derived ones changes together.
        let inserted: bool = sqlx::query(
            r#"
            INSERT INTO attendance_warning.student_attendance
            (email_id, student_name, phone_no, course_start_date, course_end_date,
             classes_attended, medical_reason, working_days_total, attendance_percentage)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (email_id) DO UPDATE
            SET student_name = EXCLUDED.student_name,
                phone_no = EXCLUDED.phone_no,
                course_start_date = EXCLUDED.course_start_date,
                course_end_date = EXCLUDED.course_end_date,
                classes_attended = EXCLUDED.classes_attended,
                medical_reason = EXCLUDED.medical_reason,
                working_days_total = EXCLUDED.working_days_total,
                attendance_percentage = EXCLUDED.attendance_percentage,
                updated_at = now()
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(record.email_id())
        .bind(record.student_name())
        .bind(record.phone_no())
        .bind(record.course().start())
        .bind(record.course().end())
        .bind(classes_attended)
        .bind(record.medical_reason())
        .bind(working_days_total)
        .bind(record.attendance_percentage())
        .fetch_one(&self.pool)
        .await?
        .try_get("inserted")?;

        Ok(inserted)
    }

    async fn list(&self) -> Result<Vec<StudentAttendanceRecord>, StoreError> {
        let rows = sqlx::query(&format!("{SELECT_RECORD} ORDER BY email_id"))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(record_from_row).collect()
    }
}

/// Counts beyond the INTEGER column's range belong to the row, not the connection.
fn to_column(column: &str, value: u32) -> Result<i32, StoreError> {
    i32::try_from(value)
        .map_err(|_| StoreError::Rejected(format!("{column} {value} out of range")))
}

/// Rebuilds a record from its stored inputs; derived columns are recomputed rather
/// than trusted.
fn record_from_row(row: &PgRow) -> Result<StudentAttendanceRecord, StoreError> {
    let email_id: String = row.try_get("email_id")?;
    let start: NaiveDate = row.try_get("course_start_date")?;
    let end: NaiveDate = row.try_get("course_end_date")?;
    let classes_attended: i32 = row.try_get("classes_attended")?;

    let course = CourseRange::new(start, end)
        .map_err(|e| StoreError::InvalidData(format!("{email_id}: {e}")))?;
    let classes_attended = u32::try_from(classes_attended).map_err(|_| {
        StoreError::InvalidData(format!("{email_id}: negative classes_attended {classes_attended}"))
    })?;

    Ok(StudentAttendanceRecord::new(
        email_id,
        row.try_get("student_name")?,
        row.try_get("phone_no")?,
        course,
        classes_attended,
        row.try_get("medical_reason")?,
    ))
}
