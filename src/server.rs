use std::sync::Arc;

use axum::{routing::post, Router};
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;
use crate::model::claude::ClaudeModel;
use crate::platform::github::GitHubPlatform;
use crate::registry::store::MemoryStore;
use crate::runner::Runner;
use crate::webhook::handler::HandlerRegistry;

pub struct AppState {
    pub config: AppConfig,
    pub runner: Arc<Runner>,
    pub webhooks: HandlerRegistry,
}

impl AppState {
    pub async fn new(config: AppConfig) -> crate::error::Result<Self> {
        let platform = Arc::new(GitHubPlatform::new(&config.github).await?);
        let model = Arc::new(ClaudeModel::new(
            &config.model.api_key,
            &config.model.model,
            config.model.max_tokens,
        ));
        let store = Arc::new(MemoryStore::new());
        let runner = Arc::new(Runner::new(config.clone(), store, platform, model));

        Ok(Self {
            config,
            runner,
            webhooks: HandlerRegistry::with_defaults(),
        })
    }
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/webhooks/github",
            post(crate::webhook::handler::handle_webhook),
        )
        .route("/health", axum::routing::get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "ok"
}
