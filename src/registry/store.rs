use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::error::{AppError, Result};
use crate::registry::{RunRecord, RunStatus};

/// Key-value store collaborator backing the run registry. `put_if_absent`
/// must be atomic at the store level: a plain read-then-write is a race
/// under concurrent duplicate triggers.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<RunRecord>>;
    /// Create-if-absent. Returns true when this call created the record.
    async fn put_if_absent(&self, key: &str, record: RunRecord) -> Result<bool>;
    async fn update(
        &self,
        key: &str,
        status: RunStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<()>;
}

/// In-process store. One mutex spans the check-and-insert, which gives
/// `put_if_absent` its compare-and-swap semantics.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, RunRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<RunRecord>> {
        Ok(self.records.lock().await.get(key).cloned())
    }

    async fn put_if_absent(&self, key: &str, record: RunRecord) -> Result<bool> {
        let mut records = self.records.lock().await;
        if records.contains_key(key) {
            return Ok(false);
        }
        records.insert(key.to_string(), record);
        Ok(true)
    }

    async fn update(
        &self,
        key: &str,
        status: RunStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut records = self.records.lock().await;
        let record = records
            .get_mut(key)
            .ok_or_else(|| AppError::Registry(format!("No record for key: {key}")))?;
        record.status = status;
        record.updated_at = updated_at;
        Ok(())
    }
}
