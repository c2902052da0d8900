use std::fmt::Write;

use chrono::NaiveDate;

use crate::attendance::WARNING_THRESHOLD;
use crate::import::{BatchReport, RowStatus};
use crate::models::RecordView;

#[derive(Debug, Clone, PartialEq)]
pub struct AttendanceSummary {
    pub students: usize,
    pub eligible: usize,
    pub medical_exempt: usize,
    pub over_working_days: usize,
    pub avg_percentage: f64,
}

pub fn summarize(views: &[RecordView]) -> AttendanceSummary {
    let students = views.len();
    let total: f64 = views.iter().map(|v| v.record.attendance_percentage()).sum();

    AttendanceSummary {
        students,
        eligible: views.iter().filter(|v| v.eligible).count(),
        medical_exempt: views
            .iter()
            .filter(|v| {
                v.record.medical_reason() && v.record.attendance_percentage() < WARNING_THRESHOLD
            })
            .count(),
        over_working_days: views.iter().filter(|v| v.record.exceeds_working_days()).count(),
        avg_percentage: if students == 0 {
            0.0
        } else {
            total / students as f64
        },
    }
}

pub fn build_report(generated_on: NaiveDate, views: &[RecordView]) -> String {
    let summary = summarize(views);
    let mut output = String::new();

    let _ = writeln!(output, "# Attendance Warning Report");
    let _ = writeln!(output, "Generated on {generated_on}");
    let _ = writeln!(output);
    let _ = writeln!(output, "## Summary");
    let _ = writeln!(output, "- Students: {}", summary.students);
    let _ = writeln!(output, "- Average attendance: {:.2}%", summary.avg_percentage);
    let _ = writeln!(
        output,
        "- Eligible for a warning (below {WARNING_THRESHOLD:.0}%): {}",
        summary.eligible
    );
    let _ = writeln!(output, "- Below threshold with medical reason: {}", summary.medical_exempt);

    let mut eligible: Vec<&RecordView> = views.iter().filter(|v| v.eligible).collect();
    eligible.sort_by(|a, b| {
        a.record
            .attendance_percentage()
            .partial_cmp(&b.record.attendance_percentage())
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let _ = writeln!(output);
    let _ = writeln!(output, "## Warning Eligible");
    if eligible.is_empty() {
        let _ = writeln!(output, "No students are currently eligible for a warning.");
    } else {
        for view in eligible {
            let r = &view.record;
            let _ = writeln!(
                output,
                "- {} ({}) {:.2}% across {} of {} working days",
                r.student_name(),
                r.email_id(),
                r.attendance_percentage(),
                r.classes_attended(),
                r.working_days_total()
            );
        }
    }

    let flagged: Vec<&RecordView> = views
        .iter()
        .filter(|v| v.record.exceeds_working_days())
        .collect();
    let _ = writeln!(output);
    let _ = writeln!(output, "## Data Quality");
    if flagged.is_empty() {
        let _ = writeln!(output, "No records report more classes than working days.");
    } else {
        for view in flagged {
            let r = &view.record;
            let _ = writeln!(
                output,
                "- {} ({}) reports {} classes over {} working days ({:.2}%)",
                r.student_name(),
                r.email_id(),
                r.classes_attended(),
                r.working_days_total(),
                r.attendance_percentage()
            );
        }
    }

    output
}

/// Plain-text rendering of an import result for the terminal.
pub fn render_batch(report: &BatchReport) -> String {
    let mut output = String::new();
    let _ = writeln!(
        output,
        "Processed {} rows: {} succeeded ({} created, {} updated), {} failed.",
        report.total, report.succeeded, report.created, report.updated, report.failed
    );
    if let Some(fatal) = &report.fatal {
        let _ = writeln!(output, "Import aborted: {fatal}");
    }
    if report.cancelled {
        let _ = writeln!(output, "Import cancelled before all rows were processed.");
    }
    for outcome in report.failures() {
        if let RowStatus::Failure { error } = &outcome.status {
            let _ = writeln!(
                output,
                "- row {} ({}): {}",
                outcome.row_index,
                outcome.email_id.as_deref().unwrap_or("no email_id"),
                error
            );
        }
    }
    output
}
