use serde::Deserialize;
use std::path::PathBuf;

use crate::error::{AppError, Result};

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub github: GitHubConfig,
    pub model: ModelConfig,
    pub sandbox: SandboxConfig,
    pub verifier: VerifierConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Deserialize, Clone)]
pub struct GitHubConfig {
    pub app_id: u64,
    pub private_key_path: PathBuf,
    pub webhook_secret: String,
    #[serde(default = "default_trigger_label")]
    pub trigger_label: String,
}

// Manual Debug impl to avoid leaking the webhook secret
impl std::fmt::Debug for GitHubConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubConfig")
            .field("app_id", &self.app_id)
            .field("private_key_path", &self.private_key_path)
            .field("webhook_secret", &"[REDACTED]")
            .field("trigger_label", &self.trigger_label)
            .finish()
    }
}

#[derive(Deserialize, Clone)]
pub struct ModelConfig {
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

// Manual Debug impl to avoid leaking the API key
impl std::fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelConfig")
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SandboxConfig {
    #[serde(default = "default_workdir")]
    pub workdir: PathBuf,
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
    /// When true, the dispatcher runs its unsafe-command filter over every
    /// action batch before execution.
    #[serde(default = "default_local_mode")]
    pub local_mode: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct VerifierConfig {
    /// Maximum number of actions the verifier may take; the safety valve
    /// trips at twice this count of transcript entries.
    #[serde(default = "default_max_actions")]
    pub max_actions: usize,
    #[serde(default = "default_max_output_len")]
    pub max_output_len: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_trigger_label() -> String {
    "trellis".to_string()
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_max_tokens() -> u32 {
    16384
}

fn default_workdir() -> PathBuf {
    PathBuf::from("/tmp/trellis-sandbox")
}

fn default_command_timeout() -> u64 {
    120
}

fn default_local_mode() -> bool {
    true
}

fn default_max_actions() -> usize {
    20
}

fn default_max_output_len() -> usize {
    20_000
}

impl AppConfig {
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        // Load from file if specified
        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path));
        } else {
            // Try default paths
            builder = builder.add_source(config::File::with_name("trellis").required(false));
        }

        // Environment variable overrides with TRELLIS_ prefix
        builder = builder.add_source(
            config::Environment::with_prefix("TRELLIS")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| AppError::Config(e.to_string()))?;

        config
            .try_deserialize()
            .map_err(|e| AppError::Config(e.to_string()))
    }

    pub fn webhook_secret(&self) -> &str {
        &self.github.webhook_secret
    }

    pub fn model_api_key(&self) -> &str {
        &self.model.api_key
    }
}
