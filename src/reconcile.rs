use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::StoreError;
use crate::models::StudentAttendanceRecord;
use crate::snapshot::ValidatedRow;
use crate::store::RecordStore;

/// Result of merging one row into the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Upserted {
    pub record: StudentAttendanceRecord,
    pub created: bool,
}

/// Merges validated snapshot rows into canonical records.
///
/// Every input field of an existing record is replaced by the row's value and the
/// derived fields are recomputed with it; nothing is accumulated. Upserts for the
/// same `email_id` are serialized, different keys proceed independently.
pub struct RecordReconciler {
    store: Arc<dyn RecordStore>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl RecordReconciler {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            locks: DashMap::new(),
        }
    }

    pub async fn upsert(&self, row: &ValidatedRow) -> Result<Upserted, StoreError> {
        let record = StudentAttendanceRecord::from_row(row);

        let lock = self.key_lock(record.email_id());
        let result = {
            let _guard = lock.lock().await;
            self.store.upsert(&record).await
        };
        drop(lock);
        self.release(record.email_id());

        let created = result?;
        debug!(
            email_id = %record.email_id(),
            created,
            attendance_percentage = record.attendance_percentage(),
            "record reconciled"
        );

        Ok(Upserted { record, created })
    }

    fn key_lock(&self, email_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(email_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drops the key's lock from the map once no upsert holds or awaits it. The check
    /// runs under the map's shard lock, so no new handle can be taken meanwhile.
    fn release(&self, email_id: &str) {
        self.locks
            .remove_if(email_id, |_, held| Arc::strong_count(held) == 1);
    }
}
