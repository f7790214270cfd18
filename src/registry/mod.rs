pub mod store;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, Result};
use store::KvStore;

/// Lifecycle of a run. Transitions are forward-only; Failed is reachable
/// from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Created,
    Planning,
    PlanReady,
    Approved,
    Implementing,
    Completed,
    Failed,
    Interrupted,
}

impl RunStatus {
    fn rank(self) -> u8 {
        match self {
            RunStatus::Created => 0,
            RunStatus::Planning => 1,
            RunStatus::PlanReady => 2,
            RunStatus::Approved => 3,
            RunStatus::Implementing => 4,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Interrupted => 5,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Interrupted
        )
    }

    pub fn can_transition_to(self, next: RunStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        if matches!(next, RunStatus::Failed | RunStatus::Interrupted) {
            return true;
        }
        next.rank() > self.rank()
    }
}

/// Persisted idempotency and status record for one external trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub key: String,
    pub run_id: String,
    pub thread_id: String,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub owner: String,
    pub repo: String,
    pub issue_number: u64,
    pub issue_title: Option<String>,
}

impl RunRecord {
    pub fn new(
        key: impl Into<String>,
        owner: impl Into<String>,
        repo: impl Into<String>,
        issue_number: u64,
        issue_title: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            key: key.into(),
            run_id: Uuid::new_v4().to_string(),
            thread_id: Uuid::new_v4().to_string(),
            status: RunStatus::Created,
            created_at: now,
            updated_at: now,
            owner: owner.into(),
            repo: repo.into(),
            issue_number,
            issue_title,
        }
    }
}

/// Deterministic composite key for one external trigger scope.
pub fn create_key(owner: &str, repo: &str, issue_number: u64) -> String {
    format!("{owner}/{repo}/{issue_number}")
}

/// Inverse of [`create_key`], for debugging and operator tooling.
pub fn parse_key(key: &str) -> Result<(String, String, u64)> {
    let mut parts = key.splitn(3, '/');
    let (owner, repo, issue) = match (parts.next(), parts.next(), parts.next()) {
        (Some(o), Some(r), Some(i)) if !o.is_empty() && !r.is_empty() => (o, r, i),
        _ => {
            return Err(AppError::Registry(format!("Malformed run key: {key}")));
        }
    };
    let issue_number = issue
        .parse::<u64>()
        .map_err(|_| AppError::Registry(format!("Malformed issue number in key: {key}")))?;
    Ok((owner.to_string(), repo.to_string(), issue_number))
}

/// Store-backed idempotency lock and status ledger, keyed by trigger scope.
pub struct RunRegistry {
    store: Arc<dyn KvStore>,
}

impl RunRegistry {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    pub async fn get(&self, key: &str) -> Result<Option<RunRecord>> {
        self.store.get(key).await
    }

    /// Create-once. Returns false (and logs) when a record for this key
    /// already exists; losing the race to a concurrent duplicate trigger
    /// is a normal outcome, not an error.
    pub async fn create(&self, record: RunRecord) -> Result<bool> {
        let key = record.key.clone();
        let created = self.store.put_if_absent(&key, record).await?;
        if created {
            tracing::info!(key = %key, "Registered run");
        } else {
            tracing::info!(key = %key, "Run already registered, dropping duplicate");
        }
        Ok(created)
    }

    pub async fn update_status(&self, key: &str, status: RunStatus) -> Result<()> {
        let current = self
            .store
            .get(key)
            .await?
            .ok_or_else(|| AppError::Registry(format!("No record for key: {key}")))?;

        if !current.status.can_transition_to(status) {
            return Err(AppError::Registry(format!(
                "Invalid status transition for {key}: {:?} -> {:?}",
                current.status, status
            )));
        }

        self.store.update(key, status, Utc::now()).await?;
        tracing::info!(key = %key, status = ?status, "Updated run status");
        Ok(())
    }
}
