use reqwest::Client;
use serde::{Deserialize, Serialize};

use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::graph::state::{ActionRequest, EntryOrigin, TranscriptEntry};
use crate::model::{CacheControl, ModelClient, ModelRequest, ModelResponse, ToolDefinition};

const CLAUDE_API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

/// How messages and tool definitions are shaped for a provider. The
/// Anthropic profile marks the system prompt and the final tool definition
/// as cacheable; the generic profile sends plain segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderProfile {
    Anthropic,
    Generic,
}

impl ProviderProfile {
    pub fn for_model(model: &str) -> Self {
        if model.contains("claude-") {
            ProviderProfile::Anthropic
        } else {
            ProviderProfile::Generic
        }
    }
}

pub struct ClaudeModel {
    client: Client,
    api_key: String,
    model: String,
    max_tokens: u32,
    profile: ProviderProfile,
}

impl ClaudeModel {
    pub fn new(api_key: &str, model: &str, max_tokens: u32) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            max_tokens,
            profile: ProviderProfile::for_model(model),
        }
    }

    async fn send(&self, request: &MessagesRequest) -> Result<MessagesResponse> {
        let response = self
            .client
            .post(CLAUDE_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ModelRateLimited(body));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Model(format!("API returned {status}: {body}")));
        }

        let body = response.json::<MessagesResponse>().await?;
        Ok(body)
    }
}

#[async_trait]
impl ModelClient for ClaudeModel {
    async fn invoke(&self, request: ModelRequest<'_>) -> Result<ModelResponse> {
        let wire = MessagesRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            system: shape_system(self.profile, &request.system),
            messages: transcript_to_messages(request.transcript),
            tools: shape_tools(self.profile, request.tools),
        };

        let response = self.send(&wire).await?;

        tracing::info!(
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            stop_reason = ?response.stop_reason,
            "Model response"
        );

        Ok(parse_response(&response))
    }
}

/// Convert the run transcript into wire messages. Agent entries become
/// assistant turns (text plus tool_use blocks); consecutive tool results are
/// folded into a single user turn, as the Messages API requires. An agent
/// entry superseded by a safety rewrite is dropped in favor of the rewrite,
/// so every tool_use block is paired with a following tool_result.
fn transcript_to_messages(transcript: &[TranscriptEntry]) -> Vec<Message> {
    let superseded: std::collections::HashSet<&str> = transcript
        .iter()
        .filter_map(|e| e.supersedes.as_deref())
        .collect();

    let mut messages: Vec<Message> = Vec::new();
    let mut pending_results: Vec<ContentBlock> = Vec::new();

    let flush = |messages: &mut Vec<Message>, pending: &mut Vec<ContentBlock>| {
        if !pending.is_empty() {
            messages.push(Message {
                role: "user".to_string(),
                content: MessageContent::Blocks(std::mem::take(pending)),
            });
        }
    };

    for entry in transcript {
        if superseded.contains(entry.id.as_str()) {
            continue;
        }
        match entry.origin {
            EntryOrigin::Agent => {
                flush(&mut messages, &mut pending_results);
                let mut blocks = Vec::new();
                if !entry.content.is_empty() {
                    blocks.push(ContentBlock::Text {
                        text: entry.content.clone(),
                    });
                }
                for request in &entry.action_requests {
                    blocks.push(ContentBlock::ToolUse {
                        id: request.id.clone(),
                        name: request.name.clone(),
                        input: request.arguments.clone(),
                    });
                }
                messages.push(Message {
                    role: "assistant".to_string(),
                    content: MessageContent::Blocks(blocks),
                });
            }
            EntryOrigin::ToolResult => {
                pending_results.push(ContentBlock::ToolResult {
                    tool_use_id: entry.request_id.clone().unwrap_or_default(),
                    content: entry.content.clone(),
                    is_error: if entry.error { Some(true) } else { None },
                });
            }
            EntryOrigin::Diagnostic => {
                flush(&mut messages, &mut pending_results);
                messages.push(Message {
                    role: "assistant".to_string(),
                    content: MessageContent::Text(entry.content.clone()),
                });
            }
        }
    }
    flush(&mut messages, &mut pending_results);

    // The API requires the conversation to open with a user turn.
    if messages
        .first()
        .map_or(true, |m| m.role != "user")
    {
        messages.insert(
            0,
            Message {
                role: "user".to_string(),
                content: MessageContent::Text("Begin.".to_string()),
            },
        );
    }

    messages
}

fn shape_system(profile: ProviderProfile, system: &str) -> Vec<SystemSegment> {
    vec![SystemSegment {
        kind: "text",
        text: system.to_string(),
        cache_control: match profile {
            ProviderProfile::Anthropic => Some(CacheControl::ephemeral()),
            ProviderProfile::Generic => None,
        },
    }]
}

fn shape_tools(profile: ProviderProfile, mut tools: Vec<ToolDefinition>) -> Vec<ToolDefinition> {
    match profile {
        ProviderProfile::Anthropic => {
            if let Some(last) = tools.last_mut() {
                last.cache_control = Some(CacheControl::ephemeral());
            }
        }
        ProviderProfile::Generic => {
            for tool in &mut tools {
                tool.cache_control = None;
            }
        }
    }
    tools
}

fn parse_response(response: &MessagesResponse) -> ModelResponse {
    let text = response
        .content
        .iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n");

    let action_requests = response
        .content
        .iter()
        .filter_map(|block| match block {
            ContentBlock::ToolUse { id, name, input } => Some(ActionRequest {
                id: id.clone(),
                name: name.clone(),
                arguments: input.clone(),
            }),
            _ => None,
        })
        .collect();

    ModelResponse {
        text,
        action_requests,
    }
}

// --- Wire types ---

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    system: Vec<SystemSegment>,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ToolDefinition>,
}

#[derive(Debug, Serialize)]
struct SystemSegment {
    #[serde(rename = "type")]
    kind: &'static str,
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache_control: Option<CacheControl>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Message {
    role: String,
    content: MessageContent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[allow(dead_code)]
    id: String,
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::state::{ActionResult, ActionStatus};
    use serde_json::json;

    #[test]
    fn test_profile_selection_by_model_identity() {
        assert_eq!(
            ProviderProfile::for_model("claude-sonnet-4-20250514"),
            ProviderProfile::Anthropic
        );
        assert_eq!(
            ProviderProfile::for_model("gpt-4o"),
            ProviderProfile::Generic
        );
    }

    #[test]
    fn test_transcript_conversion_folds_tool_results() {
        let request = ActionRequest {
            id: "call_1".to_string(),
            name: "shell".to_string(),
            arguments: json!({"command": "ls"}),
        };
        let transcript = vec![
            TranscriptEntry::agent("running it", vec![request]),
            TranscriptEntry::tool_result(&ActionResult {
                request_id: "call_1".to_string(),
                status: ActionStatus::Success,
                content: "ok".to_string(),
                truncated: false,
            }),
            TranscriptEntry::tool_result(&ActionResult {
                request_id: "call_2".to_string(),
                status: ActionStatus::Error,
                content: "boom".to_string(),
                truncated: false,
            }),
        ];

        let messages = transcript_to_messages(&transcript);
        // Leading synthetic user turn, assistant turn, one folded result turn.
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, "user");
        assert_eq!(messages[1].role, "assistant");
        assert_eq!(messages[2].role, "user");
        match &messages[2].content {
            MessageContent::Blocks(blocks) => assert_eq!(blocks.len(), 2),
            _ => panic!("expected blocks"),
        }
    }

    #[test]
    fn test_superseded_entry_is_replaced_by_its_rewrite() {
        // A safety-filtered batch: the original entry requested r1 and r2,
        // the rewrite kept only r2, and only r2 has a result. The wire
        // conversion must replay the rewrite so every tool_use is paired
        // with a tool_result.
        let original = TranscriptEntry::agent(
            "running commands",
            vec![
                ActionRequest {
                    id: "r1".to_string(),
                    name: "shell".to_string(),
                    arguments: json!({"command": "sudo reboot"}),
                },
                ActionRequest {
                    id: "r2".to_string(),
                    name: "shell".to_string(),
                    arguments: json!({"command": "ls"}),
                },
            ],
        );
        let rewrite = TranscriptEntry::agent(
            "running commands",
            vec![ActionRequest {
                id: "r2".to_string(),
                name: "shell".to_string(),
                arguments: json!({"command": "ls"}),
            }],
        )
        .with_supersedes(original.id.clone())
        .with_hidden();
        let transcript = vec![
            original,
            rewrite,
            TranscriptEntry::tool_result(&ActionResult {
                request_id: "r2".to_string(),
                status: ActionStatus::Success,
                content: "src".to_string(),
                truncated: false,
            }),
        ];

        let messages = transcript_to_messages(&transcript);

        // Synthetic opener, one assistant turn (the rewrite), one result turn.
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].role, "assistant");
        let tool_use_ids: Vec<&str> = match &messages[1].content {
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::ToolUse { id, .. } => Some(id.as_str()),
                    _ => None,
                })
                .collect(),
            _ => panic!("expected blocks"),
        };
        assert_eq!(tool_use_ids, vec!["r2"]);
        match &messages[2].content {
            MessageContent::Blocks(blocks) => {
                assert!(matches!(
                    &blocks[0],
                    ContentBlock::ToolResult { tool_use_id, .. } if tool_use_id == "r2"
                ));
            }
            _ => panic!("expected blocks"),
        }
    }

    #[test]
    fn test_anthropic_profile_marks_last_tool_cacheable() {
        let tools = vec![
            ToolDefinition {
                name: "a".to_string(),
                description: String::new(),
                input_schema: json!({}),
                cache_control: None,
            },
            ToolDefinition {
                name: "b".to_string(),
                description: String::new(),
                input_schema: json!({}),
                cache_control: None,
            },
        ];

        let shaped = shape_tools(ProviderProfile::Anthropic, tools.clone());
        assert!(shaped[0].cache_control.is_none());
        assert!(shaped[1].cache_control.is_some());

        let plain = shape_tools(ProviderProfile::Generic, tools);
        assert!(plain.iter().all(|t| t.cache_control.is_none()));
    }

    #[test]
    fn test_parse_response_extracts_action_requests() {
        let response = MessagesResponse {
            id: "msg_1".to_string(),
            content: vec![
                ContentBlock::Text {
                    text: "let me check".to_string(),
                },
                ContentBlock::ToolUse {
                    id: "call_9".to_string(),
                    name: "view".to_string(),
                    input: json!({"path": "src/lib.rs"}),
                },
            ],
            stop_reason: Some("tool_use".to_string()),
            usage: Usage {
                input_tokens: 1,
                output_tokens: 1,
            },
        };

        let parsed = parse_response(&response);
        assert_eq!(parsed.text, "let me check");
        assert_eq!(parsed.action_requests.len(), 1);
        assert_eq!(parsed.action_requests[0].name, "view");
    }
}
