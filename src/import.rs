use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::RowError;
use crate::reconcile::RecordReconciler;
use crate::snapshot::SnapshotRow;

/// Why a row was not committed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum RowFailure {
    Validation(RowError),
    /// The store refused this row's values; the batch carried on.
    Rejected(String),
    /// The store failed while committing this row; the rest of the batch was aborted.
    StoreUnavailable(String),
    /// The batch was cancelled or ran out of time while this row was being written.
    /// The store may or may not have committed it.
    Interrupted,
    /// Not attempted because an earlier row hit a store failure.
    Aborted,
    /// Not attempted because the batch was cancelled or ran out of time.
    Cancelled,
}

impl fmt::Display for RowFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowFailure::Validation(e) => write!(f, "{e}"),
            RowFailure::Rejected(msg) => write!(f, "{msg}"),
            RowFailure::StoreUnavailable(msg) => write!(f, "{msg}"),
            RowFailure::Interrupted => write!(f, "interrupted while writing, outcome unknown"),
            RowFailure::Aborted => write!(f, "aborted after an earlier store failure"),
            RowFailure::Cancelled => write!(f, "cancelled before processing"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RowStatus {
    Success { created: bool },
    Failure { error: RowFailure },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowOutcome {
    /// 1-based position of the row in the snapshot, header excluded.
    pub row_index: usize,
    pub slno: Option<String>,
    pub email_id: Option<String>,
    #[serde(flatten)]
    pub status: RowStatus,
}

impl RowOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self.status, RowStatus::Success { .. })
    }
}

/// What a batch import actually committed, row by row.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub created: usize,
    pub updated: usize,
    pub cancelled: bool,
    /// Store failure that aborted the batch, if any.
    pub fatal: Option<String>,
    pub outcomes: Vec<RowOutcome>,
}

impl BatchReport {
    fn push(&mut self, outcome: RowOutcome) {
        self.total += 1;
        match &outcome.status {
            RowStatus::Success { created: true } => {
                self.succeeded += 1;
                self.created += 1;
            }
            RowStatus::Success { created: false } => {
                self.succeeded += 1;
                self.updated += 1;
            }
            RowStatus::Failure { .. } => self.failed += 1,
        }
        self.outcomes.push(outcome);
    }

    pub fn failures(&self) -> impl Iterator<Item = &RowOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }
}

/// Optional deadline and cancellation signal for a batch.
///
/// Both are checked before each row and raced against the store write in flight,
/// so a store that never answers cannot hold the batch past either of them.
#[derive(Debug, Clone, Default)]
pub struct ImportControl {
    deadline: Option<Instant>,
    cancel: Option<watch::Receiver<bool>>,
}

impl ImportControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    /// Cancels the batch once `true` is sent on the channel.
    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn should_stop(&self) -> bool {
        let timed_out = self.deadline.is_some_and(|d| Instant::now() >= d);
        let cancelled = self.cancel.as_ref().is_some_and(|rx| *rx.borrow());
        timed_out || cancelled
    }

    /// Resolves once the deadline passes or cancellation is signalled.
    async fn stopped(&self) {
        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };
        let cancelled = async {
            let Some(mut rx) = self.cancel.clone() else {
                return std::future::pending().await;
            };
            // a dropped sender can no longer cancel
            let closed = rx.wait_for(|cancelled| *cancelled).await.is_err();
            if closed {
                std::future::pending::<()>().await;
            }
        };

        tokio::select! {
            _ = deadline => {}
            _ = cancelled => {}
        }
    }
}

/// Runs a whole snapshot through validation and the reconciler.
///
/// Rows are applied in snapshot order, so when a key repeats inside one snapshot the
/// later row wins. Row-level failures are recorded and skipped; a store failure stops
/// the batch and every later row is reported as aborted. Rows committed before a
/// failure or cancellation stay committed.
pub struct ImportBatchProcessor {
    reconciler: Arc<RecordReconciler>,
}

impl ImportBatchProcessor {
    pub fn new(reconciler: Arc<RecordReconciler>) -> Self {
        Self { reconciler }
    }

    pub async fn process(&self, rows: Vec<SnapshotRow>, control: &ImportControl) -> BatchReport {
        let mut report = BatchReport::default();
        let mut halt: Option<RowFailure> = None;

        for (i, row) in rows.into_iter().enumerate() {
            let row_index = i + 1;
            if halt.is_none() && control.should_stop() {
                warn!(row_index, "import cancelled");
                report.cancelled = true;
                halt = Some(RowFailure::Cancelled);
            }

            let status = match halt.clone() {
                Some(error) => RowStatus::Failure { error },
                None => self.apply(row_index, &row, control, &mut report, &mut halt).await,
            };

            report.push(RowOutcome {
                row_index,
                slno: row.slno.clone(),
                email_id: row.email_hint(),
                status,
            });
        }

        info!(
            total = report.total,
            succeeded = report.succeeded,
            failed = report.failed,
            created = report.created,
            updated = report.updated,
            cancelled = report.cancelled,
            aborted = report.fatal.is_some(),
            "snapshot import finished"
        );
        report
    }

    async fn apply(
        &self,
        row_index: usize,
        row: &SnapshotRow,
        control: &ImportControl,
        report: &mut BatchReport,
        halt: &mut Option<RowFailure>,
    ) -> RowStatus {
        let validated = match row.validate() {
            Ok(v) => v,
            Err(e) => {
                warn!(row_index, error = %e, "row rejected");
                return RowStatus::Failure {
                    error: RowFailure::Validation(e),
                };
            }
        };

        let result = tokio::select! {
            biased;
            result = self.reconciler.upsert(&validated) => result,
            _ = control.stopped() => {
                warn!(row_index, "import cancelled while a row was being written");
                report.cancelled = true;
                *halt = Some(RowFailure::Cancelled);
                return RowStatus::Failure {
                    error: RowFailure::Interrupted,
                };
            }
        };

        match result {
            Ok(upserted) => {
                debug!(
                    row_index,
                    email_id = %validated.email_id,
                    created = upserted.created,
                    "row committed"
                );
                RowStatus::Success {
                    created: upserted.created,
                }
            }
            Err(e) if e.is_row_level() => {
                warn!(row_index, error = %e, "row refused by store");
                RowStatus::Failure {
                    error: RowFailure::Rejected(e.to_string()),
                }
            }
            Err(e) => {
                error!(row_index, error = %e, "store failure, aborting import");
                report.fatal = Some(e.to_string());
                *halt = Some(RowFailure::Aborted);
                RowStatus::Failure {
                    error: RowFailure::StoreUnavailable(e.to_string()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::models::StudentAttendanceRecord;
    use crate::snapshot::read_snapshot;
    use crate::snapshot::tests::row;
    use crate::store::{MemoryStore, RecordStore};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn processor(store: Arc<dyn RecordStore>) -> ImportBatchProcessor {
        ImportBatchProcessor::new(Arc::new(RecordReconciler::new(store)))
    }

    /// Accepts a fixed number of writes, then reports the store as down.
    struct FailingStore {
        inner: MemoryStore,
        remaining: AtomicUsize,
    }

    #[async_trait]
    impl RecordStore for FailingStore {
        async fn get(&self, email_id: &str) -> Result<Option<StudentAttendanceRecord>, StoreError> {
            self.inner.get(email_id).await
        }

        async fn upsert(&self, record: &StudentAttendanceRecord) -> Result<bool, StoreError> {
            if self
                .remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_err()
            {
                return Err(StoreError::Unavailable("connection refused".to_string()));
            }
            self.inner.upsert(record).await
        }

        async fn list(&self) -> Result<Vec<StudentAttendanceRecord>, StoreError> {
            self.inner.list().await
        }
    }

    /// Never answers an upsert, like a write stuck behind another session's lock.
    struct HangingStore;

    #[async_trait]
    impl RecordStore for HangingStore {
        async fn get(&self, _: &str) -> Result<Option<StudentAttendanceRecord>, StoreError> {
            Ok(None)
        }

        async fn upsert(&self, _: &StudentAttendanceRecord) -> Result<bool, StoreError> {
            std::future::pending().await
        }

        async fn list(&self) -> Result<Vec<StudentAttendanceRecord>, StoreError> {
            Ok(Vec::new())
        }
    }

    /// Signals cancellation from inside its `cancel_after`-th write.
    struct CancellingStore {
        inner: MemoryStore,
        cancel_after: usize,
        writes: AtomicUsize,
        cancel: watch::Sender<bool>,
    }

    #[async_trait]
    impl RecordStore for CancellingStore {
        async fn get(&self, email_id: &str) -> Result<Option<StudentAttendanceRecord>, StoreError> {
            self.inner.get(email_id).await
        }

        async fn upsert(&self, record: &StudentAttendanceRecord) -> Result<bool, StoreError> {
            let created = self.inner.upsert(record).await?;
            if self.writes.fetch_add(1, Ordering::SeqCst) + 1 == self.cancel_after {
                let _ = self.cancel.send(true);
            }
            Ok(created)
        }

        async fn list(&self) -> Result<Vec<StudentAttendanceRecord>, StoreError> {
            self.inner.list().await
        }
    }

    /// Refuses the values of one student, like a check constraint would.
    struct RejectingStore {
        inner: MemoryStore,
        refuse: &'static str,
    }

    #[async_trait]
    impl RecordStore for RejectingStore {
        async fn get(&self, email_id: &str) -> Result<Option<StudentAttendanceRecord>, StoreError> {
            self.inner.get(email_id).await
        }

        async fn upsert(&self, record: &StudentAttendanceRecord) -> Result<bool, StoreError> {
            if record.email_id() == self.refuse {
                return Err(StoreError::Rejected(
                    "invalid byte sequence for encoding \"UTF8\": 0x00".to_string(),
                ));
            }
            self.inner.upsert(record).await
        }

        async fn list(&self) -> Result<Vec<StudentAttendanceRecord>, StoreError> {
            self.inner.list().await
        }
    }

    #[tokio::test]
    async fn missing_email_fails_only_that_row() {
        let store = Arc::new(MemoryStore::new());
        let mut second = row("jules@example.com", "4");
        second.email_id = None;
        let rows = vec![row("avery@example.com", "5"), second, row("kiara@example.com", "6")];

        let report = processor(store.clone()).process(rows, &ImportControl::new()).await;

        assert_eq!(report.total, 3);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(
            report.outcomes[1].status,
            RowStatus::Failure {
                error: RowFailure::Validation(RowError::MissingField { field: "email_id" })
            }
        );
        assert_eq!(report.outcomes[1].row_index, 2);
        assert_eq!(store.list().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn ten_rows_with_two_malformed() {
        let store = Arc::new(MemoryStore::new());
        let mut rows: Vec<_> = (0..10)
            .map(|i| row(&format!("student{i}@example.com"), "3"))
            .collect();
        rows[3].classes_attended = Some("three".to_string());
        rows[7].course_end_date = Some("2023-12-01".to_string());

        let report = processor(store.clone()).process(rows, &ImportControl::new()).await;

        assert_eq!(report.succeeded, 8);
        assert_eq!(report.failed, 2);
        assert_eq!(report.created, 8);
        let stored = store.list().await.unwrap();
        assert_eq!(stored.len(), 8);
        assert!(store.get("student3@example.com").await.unwrap().is_none());
        assert!(store.get("student7@example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reimporting_a_snapshot_does_not_accumulate() {
        let store = Arc::new(MemoryStore::new());
        let processor = processor(store.clone());
        let rows = vec![row("avery@example.com", "5")];

        let first = processor.process(rows.clone(), &ImportControl::new()).await;
        let before = store.get("avery@example.com").await.unwrap().unwrap();
        let second = processor.process(rows, &ImportControl::new()).await;
        let after = store.get("avery@example.com").await.unwrap().unwrap();

        assert_eq!(first.created, 1);
        assert_eq!(second.updated, 1);
        assert_eq!(before, after);
        assert_eq!(after.classes_attended(), 5);
        assert_eq!(after.attendance_percentage(), 83.33);
    }

    #[tokio::test]
    async fn repeated_key_in_one_snapshot_keeps_the_last_row() {
        let store = Arc::new(MemoryStore::new());
        let rows = vec![row("avery@example.com", "2"), row("avery@example.com", "4")];

        let report = processor(store.clone()).process(rows, &ImportControl::new()).await;

        assert_eq!((report.created, report.updated), (1, 1));
        let stored = store.get("avery@example.com").await.unwrap().unwrap();
        assert_eq!(stored.classes_attended(), 4);
    }

    #[tokio::test]
    async fn store_failure_aborts_remaining_rows() {
        let store = Arc::new(FailingStore {
            inner: MemoryStore::new(),
            remaining: AtomicUsize::new(2),
        });
        let rows: Vec<_> = (0..5)
            .map(|i| row(&format!("s{i}@example.com"), "1"))
            .collect();

        let report = processor(store.clone()).process(rows, &ImportControl::new()).await;

        assert_eq!(report.total, 5);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 3);
        assert!(report.fatal.is_some());
        assert!(matches!(
            report.outcomes[2].status,
            RowStatus::Failure {
                error: RowFailure::StoreUnavailable(_)
            }
        ));
        for outcome in &report.outcomes[3..] {
            assert_eq!(
                outcome.status,
                RowStatus::Failure {
                    error: RowFailure::Aborted
                }
            );
        }
        assert_eq!(store.list().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn cancelled_batch_marks_every_row() {
        let store = Arc::new(MemoryStore::new());
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        let rows = vec![row("a@example.com", "1"), row("b@example.com", "1")];

        let report = processor(store.clone())
            .process(rows, &ImportControl::new().with_cancel(rx))
            .await;

        assert!(report.cancelled);
        assert_eq!(report.failed, 2);
        assert!(report.failures().all(|o| o.status
            == RowStatus::Failure {
                error: RowFailure::Cancelled
            }));
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn expired_deadline_cancels() {
        let store = Arc::new(MemoryStore::new());
        let control = ImportControl::new().with_timeout(Duration::ZERO);
        let report = processor(store)
            .process(vec![row("a@example.com", "1")], &control)
            .await;
        assert!(report.cancelled);
        assert_eq!(report.succeeded, 0);
    }

    #[tokio::test]
    async fn undecodable_row_fails_only_that_row() {
        let lines: [&[u8]; 4] = [
            b"slno,student_name,phone_no,email_id,course_start_date,course_end_date,\
classes_attended,medical_reason",
            b"1,Avery Lee,555-0101,avery@example.com,2024-01-01,2024-01-07,5,No",
            b"2,Jos\xE9 Ruiz,555-0102,jose@example.com,2024-01-01,2024-01-07,6,No",
            b"3,Kiara Patel,555-0103,kiara@example.com,2024-01-01,2024-01-07,4,No",
        ];
        let rows = read_snapshot(&lines.join(&b'\n')[..]).unwrap();
        let store = Arc::new(MemoryStore::new());

        let report = processor(store.clone()).process(rows, &ImportControl::new()).await;

        assert_eq!((report.succeeded, report.failed), (2, 1));
        assert!(report.fatal.is_none());
        assert!(matches!(
            &report.outcomes[1].status,
            RowStatus::Failure {
                error: RowFailure::Validation(RowError::MalformedRecord { .. })
            }
        ));
        assert_eq!(report.outcomes[1].email_id.as_deref(), Some("jose@example.com"));
        assert!(store.get("kiara@example.com").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn store_rejection_fails_only_that_row() {
        let store = Arc::new(RejectingStore {
            inner: MemoryStore::new(),
            refuse: "s1@example.com",
        });
        let rows: Vec<_> = (0..3)
            .map(|i| row(&format!("s{i}@example.com"), "1"))
            .collect();

        let report = processor(store.clone()).process(rows, &ImportControl::new()).await;

        assert_eq!((report.succeeded, report.failed), (2, 1));
        assert!(report.fatal.is_none());
        assert!(matches!(
            report.outcomes[1].status,
            RowStatus::Failure {
                error: RowFailure::Rejected(_)
            }
        ));
        assert!(report.outcomes[2].is_success());
        assert_eq!(store.list().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn deadline_interrupts_a_hanging_write() {
        let control = ImportControl::new().with_timeout(Duration::from_millis(100));
        let rows = vec![row("a@example.com", "1"), row("b@example.com", "1")];

        let report = tokio::time::timeout(
            Duration::from_secs(2),
            processor(Arc::new(HangingStore)).process(rows, &control),
        )
        .await
        .expect("import should stop at its deadline");

        assert!(report.cancelled);
        assert_eq!(report.failed, 2);
        assert_eq!(
            report.outcomes[0].status,
            RowStatus::Failure {
                error: RowFailure::Interrupted
            }
        );
        assert_eq!(
            report.outcomes[1].status,
            RowStatus::Failure {
                error: RowFailure::Cancelled
            }
        );
    }

    #[tokio::test]
    async fn cancel_interrupts_a_hanging_write() {
        let (tx, rx) = watch::channel(false);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            let _ = tx.send(true);
        });
        let control = ImportControl::new().with_cancel(rx);

        let report = tokio::time::timeout(
            Duration::from_secs(2),
            processor(Arc::new(HangingStore)).process(vec![row("a@example.com", "1")], &control),
        )
        .await
        .expect("import should stop when cancelled");

        assert!(report.cancelled);
        assert_eq!(
            report.outcomes[0].status,
            RowStatus::Failure {
                error: RowFailure::Interrupted
            }
        );
    }

    #[tokio::test]
    async fn cancel_mid_batch_keeps_committed_rows() {
        let (tx, rx) = watch::channel(false);
        let store = Arc::new(CancellingStore {
            inner: MemoryStore::new(),
            cancel_after: 2,
            writes: AtomicUsize::new(0),
            cancel: tx,
        });
        let rows: Vec<_> = (0..5)
            .map(|i| row(&format!("s{i}@example.com"), "1"))
            .collect();

        let report = processor(store.clone())
            .process(rows, &ImportControl::new().with_cancel(rx))
            .await;

        assert!(report.cancelled);
        assert_eq!((report.succeeded, report.failed), (2, 3));
        assert!(report.outcomes[..2].iter().all(RowOutcome::is_success));
        for outcome in &report.outcomes[2..] {
            assert_eq!(
                outcome.status,
                RowStatus::Failure {
                    error: RowFailure::Cancelled
                }
            );
        }
        assert!(store.get("s0@example.com").await.unwrap().is_some());
        assert!(store.get("s1@example.com").await.unwrap().is_some());
        assert!(store.get("s2@example.com").await.unwrap().is_none());
    }

    #[test]
    fn outcome_serializes_with_status_tag() {
        let outcome = RowOutcome {
            row_index: 2,
            slno: Some("2".to_string()),
            email_id: None,
            status: RowStatus::Failure {
                error: RowFailure::Validation(RowError::MissingField { field: "email_id" }),
            },
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "failure");
        assert_eq!(json["error"]["kind"], "validation");
        assert_eq!(json["error"]["detail"]["kind"], "missing_field");
        assert_eq!(json["error"]["detail"]["field"], "email_id");
    }
}
