use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use octocrab::Octocrab;
use tokio::sync::RwLock;

use crate::config::GitHubConfig;
use crate::error::{AppError, Result};
use crate::platform::types::{Comment, Issue};
use crate::platform::Platform;

use super::auth::generate_app_jwt;

pub struct GitHubPlatform {
    config: GitHubConfig,
    /// Installation tokens by id, with their expiry.
    token_cache: Arc<RwLock<HashMap<u64, (String, chrono::DateTime<chrono::Utc>)>>>,
}

impl GitHubPlatform {
    pub async fn new(config: &GitHubConfig) -> Result<Self> {
        if !config.private_key_path.exists() {
            return Err(AppError::Config(format!(
                "GitHub App private key not found at: {}",
                config.private_key_path.display()
            )));
        }

        Ok(Self {
            config: config.clone(),
            token_cache: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// An octocrab instance authenticated as an installation.
    async fn installation_client(&self, installation_id: u64) -> Result<Octocrab> {
        let token = self.get_access_token(installation_id).await?;
        Octocrab::builder()
            .personal_token(token)
            .build()
            .map_err(|e| AppError::GitHubApi(format!("Failed to build octocrab client: {e}")))
    }

    fn parse_repo(repo_full_name: &str) -> Result<(&str, &str)> {
        repo_full_name.split_once('/').ok_or_else(|| {
            AppError::GitHubApi(format!("Invalid repo name: {repo_full_name}"))
        })
    }
}

#[async_trait]
impl Platform for GitHubPlatform {
    async fn get_access_token(&self, installation_id: u64) -> Result<String> {
        {
            let cache = self.token_cache.read().await;
            if let Some((token, expiry)) = cache.get(&installation_id) {
                if *expiry > chrono::Utc::now() + chrono::Duration::minutes(5) {
                    return Ok(token.clone());
                }
            }
        }

        let jwt = generate_app_jwt(self.config.app_id, &self.config.private_key_path)?;

        let client = Octocrab::builder()
            .personal_token(jwt)
            .build()
            .map_err(|e| AppError::GitHubApi(format!("Failed to build JWT client: {e}")))?;

        let url = format!("/app/installations/{installation_id}/access_tokens");
        let response: serde_json::Value = client.post(&url, None::<&()>).await.map_err(|e| {
            AppError::GitHubApi(format!("Failed to create installation token: {e}"))
        })?;

        let token = response["token"]
            .as_str()
            .ok_or_else(|| AppError::GitHubApi("No token in response".to_string()))?
            .to_string();

        let expires_at = response["expires_at"]
            .as_str()
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&chrono::Utc))
            .unwrap_or_else(|| chrono::Utc::now() + chrono::Duration::hours(1));

        let mut cache = self.token_cache.write().await;
        cache.insert(installation_id, (token.clone(), expires_at));

        Ok(token)
    }

    async fn get_issue(
        &self,
        installation_id: u64,
        repo_full_name: &str,
        issue_number: u64,
    ) -> Result<Issue> {
        let client = self.installation_client(installation_id).await?;
        let (owner, repo) = Self::parse_repo(repo_full_name)?;

        let issue = client.issues(owner, repo).get(issue_number).await?;

        let comments_page = client
            .issues(owner, repo)
            .list_comments(issue_number)
            .per_page(100)
            .send()
            .await?;

        Ok(Issue {
            number: issue.number,
            title: issue.title,
            body: issue.body.unwrap_or_default(),
            labels: issue.labels.into_iter().map(|l| l.name).collect(),
            comments: comments_page
                .items
                .into_iter()
                .map(|c| Comment {
                    id: c.id.into_inner(),
                    author: c.user.login,
                    body: c.body.unwrap_or_default(),
                })
                .collect(),
        })
    }

    async fn post_comment(
        &self,
        installation_id: u64,
        repo_full_name: &str,
        issue_number: u64,
        body: &str,
    ) -> Result<()> {
        let client = self.installation_client(installation_id).await?;
        let (owner, repo) = Self::parse_repo(repo_full_name)?;

        client
            .issues(owner, repo)
            .create_comment(issue_number, body)
            .await?;

        Ok(())
    }
}
