use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::models::StudentAttendanceRecord;

/// Persistence for canonical attendance records, keyed by `email_id`.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get(&self, email_id: &str) -> Result<Option<StudentAttendanceRecord>, StoreError>;

    /// Inserts or fully replaces the record. Returns `true` when the key was new.
    async fn upsert(&self, record: &StudentAttendanceRecord) -> Result<bool, StoreError>;

    /// All records, ordered by `email_id`.
    async fn list(&self) -> Result<Vec<StudentAttendanceRecord>, StoreError>;
}

/// In-process store, used for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<BTreeMap<String, StudentAttendanceRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get(&self, email_id: &str) -> Result<Option<StudentAttendanceRecord>, StoreError> {
        Ok(self.records.read().await.get(email_id).cloned())
    }

    async fn upsert(&self, record: &StudentAttendanceRecord) -> Result<bool, StoreError> {
        let previous = self
            .records
            .write()
            .await
            .insert(record.email_id().to_string(), record.clone());
        Ok(previous.is_none())
    }

    async fn list(&self) -> Result<Vec<StudentAttendanceRecord>, StoreError> {
        Ok(self.records.read().await.values().cloned().collect())
    }
}
