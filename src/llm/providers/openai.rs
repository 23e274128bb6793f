// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! OpenAI-compatible chat completions provider
//!
//! One codec serves every vendor that speaks the `/chat/completions` dialect:
//! OpenAI itself, Qwen (DashScope compatible mode) and Baidu Qianfan. They
//! differ only in endpoint, defaults, a few extra body fields and how the
//! bearer token is obtained.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::llm::message::{ContentBlock, Message, MessageContent, Role};
use crate::llm::provider::{
    CompletionRequest, CompletionResponse, ContentBlockResponse, LlmProvider, StopReason,
    ToolDefinition, Usage,
};
use crate::llm::providers::baidu::BaiduTokenSource;
use crate::llm::providers::common::{
    header, invalid_response, parse_arguments, parse_body, synthetic_call_id,
};
use crate::llm::transport::Transport;

pub const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";
pub const QWEN_API_URL: &str =
    "https://dashscope.aliyuncs.com/compatible-mode/v1/chat/completions";
pub const OPENAI_MAX_TOKENS: u32 = 50000;
pub const QWEN_MAX_TOKENS: u32 = 16384;

/// How the bearer token is obtained
pub enum Auth {
    /// Static key sent as `Authorization: Bearer <key>`
    Bearer(String),
    /// OAuth client-credentials token fetched once and cached
    OAuth(BaiduTokenSource),
}

/// Provider for OpenAI-style chat completion endpoints
pub struct OpenAiCompatProvider {
    transport: Transport,
    name: &'static str,
    url: String,
    model: String,
    auth: Auth,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
    top_p: Option<f32>,
    stream: Option<bool>,
    extra_headers: Vec<(String, String)>,
}

impl OpenAiCompatProvider {
    /// Generic constructor; prefer [`Self::openai`] or [`Self::qwen`]
    pub fn new(
        transport: Transport,
        name: &'static str,
        url: impl Into<String>,
        model: impl Into<String>,
        auth: Auth,
    ) -> Self {
        Self {
            transport,
            name,
            url: url.into(),
            model: model.into(),
            auth,
            max_tokens: None,
            temperature: None,
            top_p: None,
            stream: None,
            extra_headers: Vec::new(),
        }
    }

    /// OpenAI chat completions
    pub fn openai(transport: Transport, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::new(
            transport,
            "openai",
            OPENAI_API_URL,
            model,
            Auth::Bearer(api_key.into()),
        )
        .with_max_tokens(OPENAI_MAX_TOKENS)
    }

    /// Qwen via DashScope's OpenAI-compatible mode
    pub fn qwen(transport: Transport, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::new(transport, "qwen", QWEN_API_URL, model, Auth::Bearer(api_key.into()))
            .with_max_tokens(QWEN_MAX_TOKENS)
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Sampling parameters sent verbatim with every request
    pub fn with_sampling(mut self, temperature: f32, top_p: f32) -> Self {
        self.temperature = Some(temperature);
        self.top_p = Some(top_p);
        self
    }

    /// Send an explicit `stream` flag
    pub fn with_stream_flag(mut self, stream: bool) -> Self {
        self.stream = Some(stream);
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.extra_headers.push(header(name, value));
        self
    }

    /// Build the request body
    fn build_request(&self, request: &CompletionRequest) -> OpenAiRequest {
        let model = if request.model.is_empty() {
            self.model.clone()
        } else {
            request.model.clone()
        };

        OpenAiRequest {
            model,
            messages: chat_messages(request.system.as_deref(), &request.messages),
            tools: if request.tools.is_empty() {
                None
            } else {
                Some(chat_tools(&request.tools))
            },
            max_tokens: self.max_tokens.map(|_| request.max_tokens),
            temperature: self.temperature,
            top_p: self.top_p,
            stream: self.stream,
        }
    }

    async fn headers(&self) -> Result<Vec<(String, String)>> {
        let token = match &self.auth {
            Auth::Bearer(key) => key.clone(),
            Auth::OAuth(source) => source.access_token(self.transport.client()).await?,
        };

        let mut headers = vec![
            header("content-type", "application/json"),
            header("authorization", format!("Bearer {}", token)),
        ];
        headers.extend(self.extra_headers.iter().cloned());
        Ok(headers)
    }

    /// Decode a successful response body
    fn parse_response(&self, body: &str) -> Result<CompletionResponse> {
        let api_response: OpenAiResponse = parse_body(self.name, body)?;
        let usage = api_response
            .usage
            .map(|u| Usage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            })
            .unwrap_or_default();
        let id = api_response.id.unwrap_or_default();
        let model = api_response.model.unwrap_or_else(|| self.model.clone());

        let Some(choice) = api_response.choices.and_then(|c| c.into_iter().next()) else {
            // Older Qianfan endpoints answer with a bare `result` string.
            return match api_response.result {
                Some(text) => Ok(CompletionResponse {
                    id,
                    model,
                    content: vec![ContentBlockResponse::Text { text }],
                    stop_reason: Some(StopReason::EndTurn),
                    usage,
                }),
                None => Err(invalid_response(format!(
                    "{} response has no choices: {}",
                    self.name, body
                ))),
            };
        };

        let mut content = Vec::new();
        if let Some(text) = choice.message.content.filter(|t| !t.is_empty()) {
            content.push(ContentBlockResponse::Text { text });
        }
        for (index, call) in choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .enumerate()
        {
            let input = match &call.function.arguments {
                Value::String(raw) => parse_arguments(raw),
                Value::Object(_) => call.function.arguments.clone(),
                _ => serde_json::json!({}),
            };
            content.push(ContentBlockResponse::ToolUse {
                id: call
                    .id
                    .filter(|id| !id.is_empty())
                    .unwrap_or_else(|| synthetic_call_id(index)),
                name: call.function.name,
                input,
            });
        }

        Ok(CompletionResponse {
            id,
            model,
            content,
            stop_reason: choice
                .finish_reason
                .as_deref()
                .and_then(StopReason::from_finish_reason),
            usage,
        })
    }
}

/// Convert internal messages to the chat completions format.
///
/// Each tool result becomes its own `tool` message.
pub(crate) fn chat_messages(system: Option<&str>, messages: &[Message]) -> Vec<OpenAiMessage> {
    let mut converted = Vec::with_capacity(messages.len() + 1);
    if let Some(system) = system {
        converted.push(OpenAiMessage::text("system", system));
    }

    for message in messages {
        match (&message.role, &message.content) {
            (role, MessageContent::Text(text)) => {
                converted.push(OpenAiMessage::text(&role.to_string(), text));
            }
            (Role::Assistant, MessageContent::Blocks(blocks)) => {
                converted.push(assistant_message(blocks));
            }
            (role, MessageContent::Blocks(blocks)) => {
                let mut text = String::new();
                for block in blocks {
                    match block {
                        ContentBlock::ToolResult {
                            tool_use_id,
                            content,
                            ..
                        } => converted.push(OpenAiMessage {
                            role: "tool".to_string(),
                            content: Some(content.clone()),
                            tool_calls: None,
                            tool_call_id: Some(tool_use_id.clone()),
                        }),
                        ContentBlock::Text { text: t } => text.push_str(t),
                        ContentBlock::ToolUse { .. } => {}
                    }
                }
                if !text.is_empty() {
                    converted.push(OpenAiMessage::text(&role.to_string(), &text));
                }
            }
        }
    }

    converted
}

/// Convert tools to function definitions
pub(crate) fn chat_tools(tools: &[ToolDefinition]) -> Vec<OpenAiTool> {
    tools
        .iter()
        .map(|t| OpenAiTool {
            tool_type: "function".to_string(),
            function: OpenAiFunction {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: serde_json::json!({
                    "type": t.input_schema.schema_type,
                    "properties": t.input_schema.properties,
                    "required": t.input_schema.required,
                }),
            },
        })
        .collect()
}

fn assistant_message(blocks: &[ContentBlock]) -> OpenAiMessage {
    let mut text = String::new();
    let mut tool_calls = Vec::new();
    for block in blocks {
        match block {
            ContentBlock::Text { text: t } => text.push_str(t),
            ContentBlock::ToolUse { id, name, input } => tool_calls.push(OpenAiToolCallOut {
                id: id.clone(),
                call_type: "function".to_string(),
                function: OpenAiFunctionCallOut {
                    name: name.clone(),
                    arguments: input.to_string(),
                },
            }),
            ContentBlock::ToolResult { .. } => {}
        }
    }

    OpenAiMessage {
        role: "assistant".to_string(),
        content: if text.is_empty() { None } else { Some(text) },
        tool_calls: if tool_calls.is_empty() {
            None
        } else {
            Some(tool_calls)
        },
        tool_call_id: None,
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn max_tokens(&self) -> u32 {
        self.max_tokens.unwrap_or(8192)
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let body = serde_json::to_value(self.build_request(&request))?;
        let headers = self.headers().await?;
        let text = self
            .transport
            .post_json(self.name, &self.url, &headers, &body)
            .await?;
        self.parse_response(&text)
    }
}

// Chat completions wire types

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAiTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Serialize)]
pub(crate) struct OpenAiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OpenAiToolCallOut>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl OpenAiMessage {
    fn text(role: &str, text: &str) -> Self {
        Self {
            role: role.to_string(),
            content: Some(text.to_string()),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct OpenAiToolCallOut {
    id: String,
    #[serde(rename = "type")]
    call_type: String,
    function: OpenAiFunctionCallOut,
}

#[derive(Debug, Serialize)]
struct OpenAiFunctionCallOut {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct OpenAiTool {
    #[serde(rename = "type")]
    tool_type: String,
    function: OpenAiFunction,
}

#[derive(Debug, Serialize)]
struct OpenAiFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    id: Option<String>,
    model: Option<String>,
    choices: Option<Vec<OpenAiChoice>>,
    usage: Option<OpenAiUsage>,
    result: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<OpenAiToolCallIn>>,
}

#[derive(Debug, Deserialize)]
struct OpenAiToolCallIn {
    id: Option<String>,
    function: OpenAiFunctionCallIn,
}

#[derive(Debug, Deserialize)]
struct OpenAiFunctionCallIn {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

/// Tool definitions as the chat completions dialect sends them
pub fn dialect_tools(tools: &[ToolDefinition]) -> Value {
    serde_json::to_value(chat_tools(tools)).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ApiError, NokodeError};
    use crate::llm::provider::{ResponseKind, ToolInputSchema};
    use serde_json::json;

    fn openai() -> OpenAiCompatProvider {
        OpenAiCompatProvider::openai(Transport::direct(), "sk-test", "gpt-4-turbo-preview")
    }

    fn tool() -> ToolDefinition {
        ToolDefinition {
            name: "webResponse".to_string(),
            description: "Respond".to_string(),
            input_schema: ToolInputSchema {
                schema_type: "object".to_string(),
                properties: json!({"body": {"type": "string"}}),
                required: vec!["body".to_string()],
            },
        }
    }

    #[test]
    fn test_constructors() {
        let openai = openai();
        assert_eq!(openai.name(), "openai");
        assert_eq!(openai.url, OPENAI_API_URL);
        assert_eq!(openai.max_tokens(), 50000);

        let qwen = OpenAiCompatProvider::qwen(Transport::direct(), "k", "qwen-turbo");
        assert_eq!(qwen.name(), "qwen");
        assert_eq!(qwen.url, QWEN_API_URL);
        assert_eq!(qwen.max_tokens(), 16384);
    }

    #[test]
    fn test_build_request_tools_dialect() {
        let provider = openai();
        let request = CompletionRequest::new("", vec![Message::user("GET /")])
            .with_max_tokens(50000)
            .with_tools(vec![tool()]);

        let body = serde_json::to_value(provider.build_request(&request)).unwrap();
        assert_eq!(body["model"], "gpt-4-turbo-preview");
        assert_eq!(body["max_tokens"], 50000);
        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["tools"][0]["function"]["name"], "webResponse");
        assert_eq!(body["tools"][0]["function"]["parameters"]["type"], "object");
        assert!(body.get("temperature").is_none());
    }

    #[test]
    fn test_build_request_sampling_fields() {
        let provider = openai().with_sampling(0.7, 0.8).with_stream_flag(false);
        let request = CompletionRequest::new("m", vec![Message::user("hi")]);
        let body = serde_json::to_value(provider.build_request(&request)).unwrap();
        assert!((body["temperature"].as_f64().unwrap() - 0.7).abs() < 1e-6);
        assert!((body["top_p"].as_f64().unwrap() - 0.8).abs() < 1e-6);
        assert_eq!(body["stream"], false);
    }

    #[test]
    fn test_chat_messages_splits_tool_results() {
        let messages = vec![
            Message::user("prompt"),
            Message::assistant_blocks(vec![
                ContentBlock::ToolUse {
                    id: "call_a".to_string(),
                    name: "database".to_string(),
                    input: json!({"query": "SELECT 1"}),
                },
                ContentBlock::ToolUse {
                    id: "call_b".to_string(),
                    name: "updateMemory".to_string(),
                    input: json!({"content": "x", "mode": "append"}),
                },
            ]),
            Message::tool_results(vec![
                ContentBlock::ToolResult {
                    tool_use_id: "call_a".to_string(),
                    content: "{\"success\":true}".to_string(),
                    is_error: None,
                },
                ContentBlock::ToolResult {
                    tool_use_id: "call_b".to_string(),
                    content: "{\"success\":true}".to_string(),
                    is_error: None,
                },
            ]),
        ];

        let converted =
            serde_json::to_value(chat_messages(Some("sys"), &messages)).unwrap();
        let converted = converted.as_array().unwrap();
        assert_eq!(converted.len(), 5);
        assert_eq!(converted[0]["role"], "system");
        assert_eq!(converted[2]["role"], "assistant");
        assert!(converted[2].get("content").is_none());
        assert_eq!(converted[2]["tool_calls"][0]["id"], "call_a");
        assert_eq!(converted[2]["tool_calls"][0]["type"], "function");
        let args: Value =
            serde_json::from_str(converted[2]["tool_calls"][0]["function"]["arguments"].as_str().unwrap())
                .unwrap();
        assert_eq!(args["query"], "SELECT 1");
        assert_eq!(converted[3]["role"], "tool");
        assert_eq!(converted[3]["tool_call_id"], "call_a");
        assert_eq!(converted[4]["tool_call_id"], "call_b");
    }

    #[test]
    fn test_parse_response_tool_calls() {
        let body = json!({
            "id": "chatcmpl-1",
            "model": "gpt-4-turbo-preview",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [
                        {"id": "call_1", "type": "function",
                         "function": {"name": "database", "arguments": "{\"query\":\"SELECT 1\"}"}},
                        {"id": "call_2", "type": "function",
                         "function": {"name": "webResponse", "arguments": "{broken"}}
                    ]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 3, "completion_tokens": 4, "total_tokens": 7}
        })
        .to_string();

        let response = openai().parse_response(&body).unwrap();
        assert_eq!(response.stop_reason, Some(StopReason::ToolUse));
        assert_eq!(response.usage.total_tokens(), 7);
        match response.classify() {
            ResponseKind::ToolCalls { text, calls } => {
                assert!(text.is_none());
                assert_eq!(calls.len(), 2);
                assert_eq!(calls[0].arguments["query"], "SELECT 1");
                assert_eq!(calls[1].arguments, json!({}));
            }
            other => panic!("expected tool calls, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_response_text() {
        let body = json!({
            "choices": [{"message": {"role": "assistant", "content": "<html>hi</html>"},
                         "finish_reason": "stop"}]
        })
        .to_string();
        let response = openai().parse_response(&body).unwrap();
        assert_eq!(response.classify(), ResponseKind::Text("<html>hi</html>".to_string()));
        assert_eq!(response.stop_reason, Some(StopReason::EndTurn));
    }

    #[test]
    fn test_parse_response_legacy_result() {
        let body = json!({"id": "as-1", "result": "plain answer"}).to_string();
        let response = openai().parse_response(&body).unwrap();
        assert_eq!(response.classify(), ResponseKind::Text("plain answer".to_string()));
    }

    #[test]
    fn test_parse_response_without_choices_is_error() {
        let err = openai().parse_response("{\"choices\": []}").unwrap_err();
        assert!(matches!(
            err,
            NokodeError::Api(ApiError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_headers_bearer_and_extra() {
        let provider = openai().with_header("appid", "app-1");
        let headers = provider.headers().await.unwrap();
        assert!(headers.contains(&("authorization".to_string(), "Bearer sk-test".to_string())));
        assert!(headers.contains(&("appid".to_string(), "app-1".to_string())));
    }

    #[test]
    fn test_dialect_tools() {
        let value = dialect_tools(&[tool()]);
        assert_eq!(value[0]["function"]["name"], "webResponse");
    }
}
