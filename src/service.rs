use std::sync::Arc;

use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::error::ServiceError;
use crate::import::{BatchReport, ImportBatchProcessor, ImportControl};
use crate::models::{Principal, RecordView, StudentAttendanceRecord};
use crate::reconcile::RecordReconciler;
use crate::snapshot::SnapshotRow;
use crate::store::RecordStore;

/// A low-attendance warning the caller should deliver.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WarningNotice {
    pub email_id: String,
    pub student_name: String,
    pub attendance_percentage: f64,
    pub classes_attended: u32,
    pub working_days_total: u32,
}

impl From<&StudentAttendanceRecord> for WarningNotice {
    fn from(record: &StudentAttendanceRecord) -> Self {
        Self {
            email_id: record.email_id().to_string(),
            student_name: record.student_name().to_string(),
            attendance_percentage: record.attendance_percentage(),
            classes_attended: record.classes_attended(),
            working_days_total: record.working_days_total(),
        }
    }
}

/// Boundary operations, authorized by matching on the caller's [`Principal`].
pub struct AttendanceService {
    store: Arc<dyn RecordStore>,
    importer: ImportBatchProcessor,
}

impl AttendanceService {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        let reconciler = Arc::new(RecordReconciler::new(store.clone()));
        Self {
            store,
            importer: ImportBatchProcessor::new(reconciler),
        }
    }

    #[instrument(skip(self, rows, control), fields(rows = rows.len()))]
    pub async fn import(
        &self,
        principal: &Principal,
        rows: Vec<SnapshotRow>,
        control: &ImportControl,
    ) -> Result<BatchReport, ServiceError> {
        require_admin(principal)?;
        Ok(self.importer.process(rows, control).await)
    }

    pub async fn list_records(
        &self,
        principal: &Principal,
    ) -> Result<Vec<RecordView>, ServiceError> {
        require_admin(principal)?;
        let records = self.store.list().await?;
        Ok(records.into_iter().map(RecordView::from).collect())
    }

    /// The calling student's own record.
    pub async fn own_record(&self, principal: &Principal) -> Result<RecordView, ServiceError> {
        let Principal::Student(email_id) = principal else {
            return Err(ServiceError::Forbidden);
        };
        let record = self
            .store
            .get(email_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(email_id.clone()))?;
        Ok(record.into())
    }

    /// Checks the eligibility gate against the currently stored record.
    ///
    /// Nothing is recorded about prior sends, so an unchanged eligible student can be
    /// warned again on every call.
    #[instrument(skip(self))]
    pub async fn send_warning(
        &self,
        principal: &Principal,
        email_id: &str,
    ) -> Result<WarningNotice, ServiceError> {
        require_admin(principal)?;
        let email_id = email_id.trim().to_lowercase();
        let record = self
            .store
            .get(&email_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(email_id.clone()))?;

        if !record.eligible() {
            warn!(
                %email_id,
                attendance_percentage = record.attendance_percentage(),
                medical_reason = record.medical_reason(),
                "warning rejected, student not eligible"
            );
            return Err(ServiceError::NotEligible {
                email_id,
                percentage: record.attendance_percentage(),
                medical_reason: record.medical_reason(),
            });
        }

        info!(
            %email_id,
            attendance_percentage = record.attendance_percentage(),
            "warning approved"
        );
        Ok(WarningNotice::from(&record))
    }
}

fn require_admin(principal: &Principal) -> Result<(), ServiceError> {
    match principal {
        Principal::Admin => Ok(()),
        Principal::Student(_) => Err(ServiceError::Forbidden),
    }
}
