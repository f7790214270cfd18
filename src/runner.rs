use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::dispatch::safety::SafetyFilter;
use crate::dispatch::tools::CapabilityRegistry;
use crate::dispatch::ToolDispatcher;
use crate::error::Result;
use crate::graph::state::{
    RepoTarget, StatePatch, TranscriptEntry, VerificationStatus, WorkflowState,
};
use crate::model::ModelClient;
use crate::platform::Platform;
use crate::registry::store::KvStore;
use crate::registry::{create_key, RunRecord, RunRegistry, RunStatus};
use crate::sandbox::local::LocalExecutor;
use crate::sandbox::SandboxSession;
use crate::verifier::{build_graph, StepContext};

/// Everything a webhook event contributes to starting a run.
#[derive(Debug, Clone)]
pub struct RunTrigger {
    pub installation_id: u64,
    pub owner: String,
    pub repo: String,
    pub issue_number: u64,
    pub issue_title: String,
}

impl RunTrigger {
    fn repo_full_name(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }
}

/// Owns the lifecycle of a run: idempotent registration, execution of the
/// verification graph, and status reporting back to the platform.
pub struct Runner {
    config: AppConfig,
    registry: RunRegistry,
    platform: Arc<dyn Platform>,
    model: Arc<dyn ModelClient>,
    in_flight: Mutex<HashSet<String>>,
}

impl Runner {
    pub fn new(
        config: AppConfig,
        store: Arc<dyn KvStore>,
        platform: Arc<dyn Platform>,
        model: Arc<dyn ModelClient>,
    ) -> Self {
        Self {
            config,
            registry: RunRegistry::new(store),
            platform,
            model,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Start a run for a trigger, or drop it if one already exists for the
    /// same scope. A failure after registration marks the record Failed so
    /// the scope is not permanently locked against retries.
    pub async fn start_run(&self, trigger: RunTrigger) -> Result<()> {
        let key = create_key(&trigger.owner, &trigger.repo, trigger.issue_number);

        if self.registry.get(&key).await?.is_some() {
            tracing::info!(key = %key, "Run already registered for this trigger, dropping");
            return Ok(());
        }

        let record = RunRecord::new(
            key.clone(),
            trigger.owner.clone(),
            trigger.repo.clone(),
            trigger.issue_number,
            Some(trigger.issue_title.clone()),
        );
        if !self.registry.create(record).await? {
            // Lost the race to a concurrent duplicate trigger.
            return Ok(());
        }

        self.in_flight.lock().await.insert(key.clone());
        let outcome = self.execute(&key, &trigger).await;
        self.in_flight.lock().await.remove(&key);

        if let Err(e) = &outcome {
            tracing::error!(key = %key, error = %e, "Run failed");
            if let Err(update_err) = self.registry.update_status(&key, RunStatus::Failed).await {
                tracing::warn!(key = %key, error = %update_err, "Failed to mark run as failed");
            }
        }
        outcome
    }

    async fn execute(&self, key: &str, trigger: &RunTrigger) -> Result<()> {
        let repo_full_name = trigger.repo_full_name();

        // Progress comments are best effort; the run does not depend on them.
        if let Err(e) = self
            .platform
            .post_comment(
                trigger.installation_id,
                &repo_full_name,
                trigger.issue_number,
                "Starting a test verification run for this issue.",
            )
            .await
        {
            tracing::warn!(key = %key, error = %e, "Failed to post start comment");
        }

        self.registry.update_status(key, RunStatus::Planning).await?;

        let executor = Arc::new(LocalExecutor);
        let capabilities = CapabilityRegistry::new(executor, &self.config.sandbox);
        let safety_filter = self.config.sandbox.local_mode.then(|| SafetyFilter);
        let dispatcher = Arc::new(ToolDispatcher::new(
            Arc::new(capabilities),
            self.config.verifier.max_output_len,
            safety_filter,
        ));
        let session = SandboxSession::new(
            Uuid::new_v4().to_string(),
            self.config.sandbox.workdir.clone(),
        );

        let ctx = StepContext {
            model: Arc::clone(&self.model),
            dispatcher,
            session,
            verifier: self.config.verifier.clone(),
        };

        let mut initial = WorkflowState::new(
            RepoTarget {
                owner: trigger.owner.clone(),
                repo: trigger.repo.clone(),
            },
            format!("trellis/issue-{}", trigger.issue_number),
            trigger.issue_number,
        );

        // Seed the transcript with the triggering issue so every step sees
        // it. Hidden entries stay out of the safety-valve count.
        let issue_context = match self
            .platform
            .get_issue(trigger.installation_id, &repo_full_name, trigger.issue_number)
            .await
        {
            Ok(issue) => format!("Issue #{}: {}\n\n{}", issue.number, issue.title, issue.body),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to fetch issue, using title only");
                format!("Issue #{}: {}", trigger.issue_number, trigger.issue_title)
            }
        };
        initial.apply(StatePatch::entry(
            TranscriptEntry::diagnostic(issue_context).with_hidden(),
        ));

        self.registry
            .update_status(key, RunStatus::Implementing)
            .await?;

        let graph = build_graph(&self.config.verifier)?;
        let final_state = graph.run(initial, &ctx).await?;

        let status = match final_state.verification {
            VerificationStatus::Completed => RunStatus::Completed,
            _ => RunStatus::Failed,
        };
        self.registry.update_status(key, status).await?;

        if let Some(report) = final_state.last_entry() {
            if let Err(e) = self
                .platform
                .post_comment(
                    trigger.installation_id,
                    &repo_full_name,
                    trigger.issue_number,
                    &report.content,
                )
                .await
            {
                tracing::warn!(key = %key, error = %e, "Failed to post conclusion comment");
            }
        }

        tracing::info!(key = %key, status = ?status, "Run finished");
        Ok(())
    }

    /// Mark every in-flight run Interrupted. Called on shutdown so restarted
    /// services do not mistake abandoned runs for live ones.
    pub async fn interrupt_in_flight(&self) {
        let keys: Vec<String> = self.in_flight.lock().await.iter().cloned().collect();
        for key in keys {
            tracing::info!(key = %key, "Marking in-flight run interrupted");
            if let Err(e) = self
                .registry
                .update_status(&key, RunStatus::Interrupted)
                .await
            {
                tracing::warn!(key = %key, error = %e, "Failed to mark run interrupted");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::path::PathBuf;
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::config::{
        GitHubConfig, ModelConfig, SandboxConfig, ServerConfig, VerifierConfig,
    };
    use crate::error::AppError;
    use crate::graph::state::ActionRequest;
    use crate::model::{ModelRequest, ModelResponse};
    use crate::platform::types::Issue;
    use crate::registry::store::MemoryStore;

    struct RecordingPlatform {
        comments: StdMutex<Vec<String>>,
    }

    impl RecordingPlatform {
        fn new() -> Self {
            Self {
                comments: StdMutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Platform for RecordingPlatform {
        async fn get_access_token(&self, _installation_id: u64) -> Result<String> {
            Ok("token".to_string())
        }

        async fn get_issue(
            &self,
            _installation_id: u64,
            _repo_full_name: &str,
            _issue_number: u64,
        ) -> Result<Issue> {
            Err(AppError::GitHubApi("not implemented".to_string()))
        }

        async fn post_comment(
            &self,
            _installation_id: u64,
            _repo_full_name: &str,
            _issue_number: u64,
            body: &str,
        ) -> Result<()> {
            self.comments.lock().unwrap().push(body.to_string());
            Ok(())
        }
    }

    struct ScriptedModel {
        replies: StdMutex<VecDeque<Result<ModelResponse>>>,
    }

    #[async_trait]
    impl ModelClient for ScriptedModel {
        async fn invoke(&self, _request: ModelRequest<'_>) -> Result<ModelResponse> {
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(AppError::Model("script exhausted".to_string())))
        }
    }

    fn config(workdir: PathBuf) -> AppConfig {
        AppConfig {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
            },
            github: GitHubConfig {
                app_id: 1,
                private_key_path: PathBuf::from("/dev/null"),
                webhook_secret: "secret".to_string(),
                trigger_label: "trellis".to_string(),
            },
            model: ModelConfig {
                api_key: "test-key".to_string(),
                model: "claude-sonnet-4-20250514".to_string(),
                max_tokens: 1024,
            },
            sandbox: SandboxConfig {
                workdir,
                command_timeout_secs: 10,
                local_mode: true,
            },
            verifier: VerifierConfig {
                max_actions: 20,
                max_output_len: 20_000,
            },
        }
    }

    fn shell_action(id: &str, command: &str) -> ActionRequest {
        ActionRequest {
            id: id.to_string(),
            name: "shell".to_string(),
            arguments: json!({"command": command}),
        }
    }

    fn trigger() -> RunTrigger {
        RunTrigger {
            installation_id: 123,
            owner: "acme".to_string(),
            repo: "widgets".to_string(),
            issue_number: 42,
            issue_title: "Flaky checkout test".to_string(),
        }
    }

    #[tokio::test]
    async fn test_duplicate_trigger_is_dropped_silently() {
        let store = Arc::new(MemoryStore::new());
        let platform = Arc::new(RecordingPlatform::new());
        let model = Arc::new(ScriptedModel {
            replies: StdMutex::new(VecDeque::new()),
        });
        let runner = Runner::new(
            config(std::env::temp_dir()),
            store.clone(),
            platform.clone(),
            model,
        );

        // Pre-register the scope as if an earlier trigger had claimed it.
        store
            .put_if_absent(
                "acme/widgets/42",
                RunRecord::new("acme/widgets/42", "acme", "widgets", 42, None),
            )
            .await
            .unwrap();

        runner.start_run(trigger()).await.unwrap();

        // Dropped before any side effect: no comments, status untouched.
        assert!(platform.comments.lock().unwrap().is_empty());
        let record = store.get("acme/widgets/42").await.unwrap().unwrap();
        assert_eq!(record.status, RunStatus::Created);
    }

    #[tokio::test]
    async fn test_successful_run_completes_and_reports() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let platform = Arc::new(RecordingPlatform::new());
        let model = Arc::new(ScriptedModel {
            replies: StdMutex::new(VecDeque::from([
                Ok(ModelResponse {
                    text: "Plan: one smoke test".to_string(),
                    action_requests: Vec::new(),
                }),
                Ok(ModelResponse {
                    text: "writing tests".to_string(),
                    action_requests: vec![shell_action("w1", "true")],
                }),
                Ok(ModelResponse {
                    text: "running tests".to_string(),
                    action_requests: vec![shell_action("e1", "echo all good")],
                }),
            ])),
        });
        let runner = Runner::new(
            config(dir.path().to_path_buf()),
            store.clone(),
            platform.clone(),
            model,
        );

        runner.start_run(trigger()).await.unwrap();

        let record = store.get("acme/widgets/42").await.unwrap().unwrap();
        assert_eq!(record.status, RunStatus::Completed);

        let comments = platform.comments.lock().unwrap();
        assert_eq!(comments.len(), 2);
        assert!(comments[1].contains("Tests created: 1"));
    }

    #[tokio::test]
    async fn test_failed_verification_marks_record_failed() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let platform = Arc::new(RecordingPlatform::new());
        // Plan succeeds, nothing else gets written or run.
        let model = Arc::new(ScriptedModel {
            replies: StdMutex::new(VecDeque::from([
                Ok(ModelResponse {
                    text: "Plan: nothing to do".to_string(),
                    action_requests: Vec::new(),
                }),
                Ok(ModelResponse {
                    text: "no tests needed".to_string(),
                    action_requests: Vec::new(),
                }),
                Ok(ModelResponse {
                    text: "nothing to run".to_string(),
                    action_requests: Vec::new(),
                }),
            ])),
        });
        let runner = Runner::new(
            config(dir.path().to_path_buf()),
            store.clone(),
            platform,
            model,
        );

        runner.start_run(trigger()).await.unwrap();

        let record = store.get("acme/widgets/42").await.unwrap().unwrap();
        assert_eq!(record.status, RunStatus::Failed);
    }

    #[tokio::test]
    async fn test_interrupt_in_flight_marks_registered_runs() {
        let store = Arc::new(MemoryStore::new());
        let platform = Arc::new(RecordingPlatform::new());
        let model = Arc::new(ScriptedModel {
            replies: StdMutex::new(VecDeque::new()),
        });
        let runner = Runner::new(
            config(std::env::temp_dir()),
            store.clone(),
            platform,
            model,
        );

        store
            .put_if_absent(
                "acme/widgets/7",
                RunRecord::new("acme/widgets/7", "acme", "widgets", 7, None),
            )
            .await
            .unwrap();
        runner
            .in_flight
            .lock()
            .await
            .insert("acme/widgets/7".to_string());

        runner.interrupt_in_flight().await;

        let record = store.get("acme/widgets/7").await.unwrap().unwrap();
        assert_eq!(record.status, RunStatus::Interrupted);
    }
}
