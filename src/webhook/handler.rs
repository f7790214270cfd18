use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};

use crate::runner::{RunTrigger, Runner};
use crate::server::AppState;
use crate::webhook::events::IssuesEvent;
use crate::webhook::signature::verify_signature;

/// The capabilities an event handler gets to work with.
pub struct WebhookContext {
    pub trigger_label: String,
    pub runner: Arc<Runner>,
}

type HandlerFuture = Pin<Box<dyn Future<Output = StatusCode> + Send>>;
type Handler = Box<dyn Fn(Arc<WebhookContext>, Bytes) -> HandlerFuture + Send + Sync>;

/// Maps an event kind to its handler. Unregistered kinds are acknowledged
/// and ignored.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<&'static str, Handler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F, Fut>(&mut self, kind: &'static str, handler: F)
    where
        F: Fn(Arc<WebhookContext>, Bytes) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = StatusCode> + Send + 'static,
    {
        self.handlers
            .insert(kind, Box::new(move |ctx, body| Box::pin(handler(ctx, body))));
    }

    /// The event kinds this service reacts to.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("issues", handle_issues);
        registry.register("ping", |_ctx, _body| async {
            tracing::info!("Received ping event");
            StatusCode::OK
        });
        registry
    }

    pub async fn dispatch(
        &self,
        kind: &str,
        ctx: Arc<WebhookContext>,
        body: Bytes,
    ) -> StatusCode {
        match self.handlers.get(kind) {
            Some(handler) => handler(ctx, body).await,
            None => {
                tracing::debug!(event_type = kind, "Ignoring unsupported event");
                StatusCode::OK
            }
        }
    }
}

pub async fn handle_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let signature = match headers
        .get("x-hub-signature-256")
        .and_then(|v| v.to_str().ok())
    {
        Some(sig) => sig.to_string(),
        None => {
            tracing::warn!("Missing X-Hub-Signature-256 header");
            return StatusCode::UNAUTHORIZED;
        }
    };

    let event_type = match headers.get("x-github-event").and_then(|v| v.to_str().ok()) {
        Some(et) => et.to_string(),
        None => {
            tracing::warn!("Missing X-GitHub-Event header");
            return StatusCode::BAD_REQUEST;
        }
    };

    if let Err(e) = verify_signature(state.config.webhook_secret(), &body, &signature) {
        tracing::warn!(error = %e, "Webhook signature verification failed");
        return StatusCode::UNAUTHORIZED;
    }

    tracing::info!(event_type = %event_type, "Received webhook event");

    let ctx = Arc::new(WebhookContext {
        trigger_label: state.config.github.trigger_label.clone(),
        runner: Arc::clone(&state.runner),
    });
    state.webhooks.dispatch(&event_type, ctx, body).await
}

/// Starts a verification run when the trigger label lands on an issue.
async fn handle_issues(ctx: Arc<WebhookContext>, body: Bytes) -> StatusCode {
    let event: IssuesEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            tracing::error!(error = %e, "Failed to parse issues event");
            return StatusCode::BAD_REQUEST;
        }
    };

    if event.action != "labeled" {
        return StatusCode::OK;
    }

    let added_label = match event.label.as_ref() {
        Some(l) => &l.name,
        None => return StatusCode::OK,
    };
    if *added_label != ctx.trigger_label {
        return StatusCode::OK;
    }

    // Pull requests arrive through the issues event too; skip them.
    if event.issue.pull_request.is_some() {
        return StatusCode::OK;
    }

    let installation_id = match event.installation.as_ref() {
        Some(inst) => inst.id,
        None => {
            tracing::warn!("No installation ID in issues event");
            return StatusCode::BAD_REQUEST;
        }
    };

    let Some((owner, repo)) = event.repository.full_name.split_once('/') else {
        tracing::warn!(repo = %event.repository.full_name, "Malformed repository name");
        return StatusCode::BAD_REQUEST;
    };

    tracing::info!(
        repo = %event.repository.full_name,
        issue = event.issue.number,
        "Issue labeled with trigger label, starting run"
    );

    let trigger = RunTrigger {
        installation_id,
        owner: owner.to_string(),
        repo: repo.to_string(),
        issue_number: event.issue.number,
        issue_title: event.issue.title.clone(),
    };

    let runner = Arc::clone(&ctx.runner);
    tokio::spawn(async move {
        if let Err(e) = runner.start_run(trigger).await {
            tracing::error!(error = %e, "Run ended with an error");
        }
    });

    StatusCode::ACCEPTED
}
