// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Anthropic Messages API provider implementation
//!
//! Implements the LlmProvider trait for Claude models.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::llm::message::{ContentBlock, Message, MessageContent, Role};
use crate::llm::provider::{
    CompletionRequest, CompletionResponse, ContentBlockResponse, LlmProvider, StopReason,
    ToolDefinition, Usage,
};
use crate::llm::providers::common::{header, invalid_response, parse_body};
use crate::llm::transport::Transport;

pub const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
pub const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const ANTHROPIC_MAX_TOKENS: u32 = 50000;

/// Anthropic Claude provider
pub struct AnthropicProvider {
    transport: Transport,
    api_key: String,
    model: String,
    base_url: String,
    max_tokens: u32,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider
    pub fn new(transport: Transport, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            transport,
            api_key: api_key.into(),
            model: model.into(),
            base_url: ANTHROPIC_API_URL.to_string(),
            max_tokens: ANTHROPIC_MAX_TOKENS,
        }
    }

    /// Point at a different endpoint (tests, proxies)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Convert internal messages to Anthropic format
    fn convert_messages(&self, messages: &[Message]) -> Vec<AnthropicMessage> {
        messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| {
                let role = match m.role {
                    Role::Assistant => "assistant",
                    Role::User | Role::System => "user",
                };

                let content = match &m.content {
                    MessageContent::Text(text) => AnthropicContent::Text(text.clone()),
                    MessageContent::Blocks(blocks) => AnthropicContent::Blocks(
                        blocks
                            .iter()
                            .map(|b| match b {
                                ContentBlock::Text { text } => {
                                    AnthropicContentBlock::Text { text: text.clone() }
                                }
                                ContentBlock::ToolUse { id, name, input } => {
                                    AnthropicContentBlock::ToolUse {
                                        id: id.clone(),
                                        name: name.clone(),
                                        input: input.clone(),
                                    }
                                }
                                ContentBlock::ToolResult {
                                    tool_use_id,
                                    content,
                                    is_error,
                                } => AnthropicContentBlock::ToolResult {
                                    tool_use_id: tool_use_id.clone(),
                                    content: content.clone(),
                                    is_error: *is_error,
                                },
                            })
                            .collect(),
                    ),
                };

                AnthropicMessage {
                    role: role.to_string(),
                    content,
                }
            })
            .collect()
    }

    /// Convert tools to Anthropic format
    fn convert_tools(&self, tools: &[ToolDefinition]) -> Vec<AnthropicTool> {
        tools
            .iter()
            .map(|t| AnthropicTool {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: serde_json::json!({
                    "type": t.input_schema.schema_type,
                    "properties": t.input_schema.properties,
                    "required": t.input_schema.required,
                }),
            })
            .collect()
    }

    /// Build the request body
    fn build_request(&self, request: &CompletionRequest) -> AnthropicRequest {
        let model = if request.model.is_empty() {
            self.model.clone()
        } else {
            request.model.clone()
        };

        AnthropicRequest {
            model,
            max_tokens: request.max_tokens,
            messages: self.convert_messages(&request.messages),
            system: request.system.clone(),
            tools: if request.tools.is_empty() {
                None
            } else {
                Some(self.convert_tools(&request.tools))
            },
        }
    }

    fn headers(&self) -> Vec<(String, String)> {
        vec![
            header("x-api-key", self.api_key.as_str()),
            header("anthropic-version", ANTHROPIC_VERSION),
            header("content-type", "application/json"),
        ]
    }

    /// Decode a successful response body
    fn parse_response(&self, body: &str) -> Result<CompletionResponse> {
        let api_response: AnthropicResponse = parse_body(self.name(), body)?;

        let mut content = Vec::with_capacity(api_response.content.len());
        for block in api_response.content {
            match block {
                AnthropicContentBlock::Text { text } => {
                    content.push(ContentBlockResponse::Text { text })
                }
                AnthropicContentBlock::ToolUse { id, name, input } => {
                    content.push(ContentBlockResponse::ToolUse { id, name, input })
                }
                AnthropicContentBlock::ToolResult { .. } => {
                    return Err(invalid_response(
                        "Anthropic response contained a tool_result block",
                    ));
                }
            }
        }

        let stop_reason = api_response.stop_reason.as_deref().map(|r| match r {
            "max_tokens" => StopReason::MaxTokens,
            "tool_use" => StopReason::ToolUse,
            "stop_sequence" => StopReason::StopSequence,
            _ => StopReason::EndTurn,
        });

        let usage = api_response.usage.unwrap_or_default();

        Ok(CompletionResponse {
            id: api_response.id.unwrap_or_default(),
            model: api_response.model.unwrap_or_else(|| self.model.clone()),
            content,
            stop_reason,
            usage: Usage {
                input_tokens: usage.input_tokens,
                output_tokens: usage.output_tokens,
            },
        })
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let body = serde_json::to_value(self.build_request(&request))?;
        let text = self
            .transport
            .post_json(self.name(), &self.base_url, &self.headers(), &body)
            .await?;
        self.parse_response(&text)
    }
}

// Anthropic API types

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<AnthropicTool>>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: AnthropicContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum AnthropicContent {
    Text(String),
    Blocks(Vec<AnthropicContentBlock>),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
}

#[derive(Debug, Serialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    id: Option<String>,
    model: Option<String>,
    content: Vec<AnthropicContentBlock>,
    stop_reason: Option<String>,
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Default, Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ApiError, NokodeError};
    use crate::llm::provider::{ResponseKind, ToolInputSchema};
    use serde_json::json;

    fn provider() -> AnthropicProvider {
        AnthropicProvider::new(Transport::direct(), "test-key", "claude-3-haiku-20240307")
    }

    fn tool() -> ToolDefinition {
        ToolDefinition {
            name: "database".to_string(),
            description: "Run SQL".to_string(),
            input_schema: ToolInputSchema {
                schema_type: "object".to_string(),
                properties: json!({"query": {"type": "string"}}),
                required: vec!["query".to_string()],
            },
        }
    }

    #[test]
    fn test_provider_defaults() {
        let provider = provider();
        assert_eq!(provider.base_url, ANTHROPIC_API_URL);
        assert_eq!(provider.max_tokens(), 50000);
        assert_eq!(provider.model(), "claude-3-haiku-20240307");
    }

    #[test]
    fn test_headers() {
        let headers = provider().headers();
        assert!(headers.contains(&("x-api-key".to_string(), "test-key".to_string())));
        assert!(headers.contains(&("anthropic-version".to_string(), "2023-06-01".to_string())));
    }

    #[test]
    fn test_build_request_shape() {
        let provider = provider();
        let request = CompletionRequest::new("", vec![Message::user("GET /")])
            .with_max_tokens(50000)
            .with_tools(vec![tool()]);

        let body = serde_json::to_value(provider.build_request(&request)).unwrap();
        assert_eq!(body["model"], "claude-3-haiku-20240307");
        assert_eq!(body["max_tokens"], 50000);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "GET /");
        assert_eq!(body["tools"][0]["name"], "database");
        assert_eq!(body["tools"][0]["input_schema"]["type"], "object");
        assert!(body.get("system").is_none());
    }

    #[test]
    fn test_convert_messages_replays_tool_round() {
        let provider = provider();
        let messages = vec![
            Message::system("ignored"),
            Message::user("prompt"),
            Message::assistant_blocks(vec![ContentBlock::ToolUse {
                id: "toolu_1".to_string(),
                name: "database".to_string(),
                input: json!({"query": "SELECT 1"}),
            }]),
            Message::tool_result("toolu_1", "{\"success\":true}", false),
        ];

        let converted = serde_json::to_value(provider.convert_messages(&messages)).unwrap();
        assert_eq!(converted.as_array().unwrap().len(), 3);
        assert_eq!(converted[1]["role"], "assistant");
        assert_eq!(converted[1]["content"][0]["type"], "tool_use");
        assert_eq!(converted[2]["role"], "user");
        assert_eq!(converted[2]["content"][0]["type"], "tool_result");
        assert_eq!(converted[2]["content"][0]["tool_use_id"], "toolu_1");
        assert_eq!(converted[2]["content"][0]["content"], "{\"success\":true}");
    }

    #[test]
    fn test_parse_response_tool_use() {
        let body = json!({
            "id": "msg_1",
            "model": "claude-3-haiku-20240307",
            "content": [
                {"type": "text", "text": "Saving"},
                {"type": "tool_use", "id": "toolu_9", "name": "database",
                 "input": {"query": "INSERT INTO t VALUES (1)"}}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 10, "output_tokens": 5}
        })
        .to_string();

        let response = provider().parse_response(&body).unwrap();
        assert_eq!(response.stop_reason, Some(StopReason::ToolUse));
        assert_eq!(response.usage.total_tokens(), 15);
        match response.classify() {
            ResponseKind::ToolCalls { calls, .. } => assert_eq!(calls[0].id, "toolu_9"),
            other => panic!("expected tool calls, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_response_text() {
        let body = json!({
            "id": "msg_2",
            "model": "claude-3-haiku-20240307",
            "content": [{"type": "text", "text": "<html></html>"}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 1, "output_tokens": 1}
        })
        .to_string();

        let response = provider().parse_response(&body).unwrap();
        assert_eq!(response.classify(), ResponseKind::Text("<html></html>".to_string()));
    }

    #[test]
    fn test_parse_response_malformed_is_error() {
        let err = provider().parse_response("{\"content\": 5}").unwrap_err();
        assert!(matches!(
            err,
            NokodeError::Api(ApiError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_parse_response_missing_content_is_error() {
        assert!(provider().parse_response("{}").is_err());
    }
}
