use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Webhook verification failed: {0}")]
    WebhookVerification(String),

    #[error("GitHub API error: {0}")]
    GitHubApi(String),

    #[error("Model invocation error: {0}")]
    Model(String),

    #[error("Model rate limited: {0}")]
    ModelRateLimited(String),

    #[error("Dispatch error: {0}")]
    Dispatch(String),

    #[error("Routing error: {0}")]
    Routing(String),

    #[error("Run registry error: {0}")]
    Registry(String),

    #[error("Sandbox error: {0}")]
    Sandbox(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<octocrab::Error> for AppError {
    fn from(e: octocrab::Error) -> Self {
        AppError::GitHubApi(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
