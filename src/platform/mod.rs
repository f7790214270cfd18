pub mod github;
pub mod types;

use async_trait::async_trait;

use crate::error::Result;
use types::Issue;

/// Hosting-platform collaborator. The orchestrator only needs to read the
/// triggering issue and report progress back on it.
#[async_trait]
pub trait Platform: Send + Sync {
    /// Get an installation-scoped access token.
    async fn get_access_token(&self, installation_id: u64) -> Result<String>;

    /// Fetch a full issue with comments.
    async fn get_issue(
        &self,
        installation_id: u64,
        repo_full_name: &str,
        issue_number: u64,
    ) -> Result<Issue>;

    /// Post a comment on an issue.
    async fn post_comment(
        &self,
        installation_id: u64,
        repo_full_name: &str,
        issue_number: u64,
        body: &str,
    ) -> Result<()>;
}
