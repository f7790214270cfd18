pub mod claude;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;
use crate::graph::state::{ActionRequest, TranscriptEntry};

/// Definition of an action the model may request.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<CacheControl>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheControl {
    #[serde(rename = "type")]
    pub kind: &'static str,
}

impl CacheControl {
    pub fn ephemeral() -> Self {
        Self { kind: "ephemeral" }
    }
}

/// One model invocation: system prompt, the transcript so far, and the
/// actions the model may request.
#[derive(Debug)]
pub struct ModelRequest<'a> {
    pub system: String,
    pub transcript: &'a [TranscriptEntry],
    pub tools: Vec<ToolDefinition>,
}

#[derive(Debug, Clone)]
pub struct ModelResponse {
    pub text: String,
    pub action_requests: Vec<ActionRequest>,
}

impl ModelResponse {
    pub fn has_action_requests(&self) -> bool {
        !self.action_requests.is_empty()
    }
}

/// Language-model collaborator. Implementations own provider-specific
/// message shaping; callers stay provider-agnostic.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn invoke(&self, request: ModelRequest<'_>) -> Result<ModelResponse>;
}
