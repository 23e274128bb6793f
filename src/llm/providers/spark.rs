// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! iFlytek Spark provider
//!
//! Spark only answers with server-sent events. Frames are folded into one
//! logical response by [`SseAssembler`]:
//! - text deltas are concatenated
//! - `reasoning_content` is kept aside and used only when no text arrived
//! - tool-call deltas are merged by `index`
//!
//! Reading stops as soon as a complete `webResponse` call is assembled.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use hmac::{Hmac, Mac};
use reqwest::Response;
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::Sha256;

use crate::error::{ApiError, NokodeError, Result};
use crate::llm::provider::{
    CompletionRequest, CompletionResponse, ContentBlockResponse, LlmProvider, StopReason, Usage,
};
use crate::llm::providers::common::{header, parse_arguments, synthetic_call_id};
use crate::llm::providers::openai::{chat_messages, chat_tools};
use crate::llm::transport::Transport;

pub const SPARK_API_URL: &str = "https://spark-api-open.xf-yun.com/v2/chat/completions";
pub const SPARK_WS_HOST: &str = "spark-api.xf-yun.com";
pub const SPARK_WS_PATH: &str = "/v1/x1";
pub const SPARK_MAX_TOKENS: u32 = 65535;
const SPARK_USER: &str = "nokode-user";
const SPARK_TEMPERATURE: f32 = 0.7;
const WEB_RESPONSE_TOOL: &str = "webResponse";

type HmacSha256 = Hmac<Sha256>;

/// Spark HTTP streaming provider
pub struct SparkProvider {
    transport: Transport,
    api_key: String,
    api_secret: String,
    model: String,
    url: String,
    system_prompt: String,
    stream_timeout: Duration,
}

impl SparkProvider {
    pub fn new(
        transport: Transport,
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            model: model.into(),
            url: SPARK_API_URL.to_string(),
            system_prompt: String::new(),
            stream_timeout: Duration::from_secs(300),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// System message sent ahead of the conversation
    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    /// Budget for reading the whole event stream
    pub fn with_stream_timeout(mut self, timeout: Duration) -> Self {
        self.stream_timeout = timeout;
        self
    }

    fn build_request(&self, request: &CompletionRequest) -> Value {
        let model = if request.model.is_empty() {
            &self.model
        } else {
            &request.model
        };
        let system = request
            .system
            .as_deref()
            .or(Some(self.system_prompt.as_str()).filter(|s| !s.is_empty()));

        let mut body = json!({
            "model": model,
            "user": SPARK_USER,
            "messages": chat_messages(system, &request.messages),
            "temperature": SPARK_TEMPERATURE,
            "max_tokens": SPARK_MAX_TOKENS,
            "thinking": {"type": "disabled"},
            "stream": true,
        });
        if !request.tools.is_empty() {
            body["tools"] = json!(chat_tools(&request.tools));
            body["tool_choice"] = json!("auto");
        }
        body
    }

    fn headers(&self) -> Vec<(String, String)> {
        vec![
            header(
                "authorization",
                format!("Bearer {}:{}", self.api_key, self.api_secret),
            ),
            header("content-type", "application/json"),
        ]
    }
}

#[async_trait]
impl LlmProvider for SparkProvider {
    fn name(&self) -> &str {
        "spark"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn max_tokens(&self) -> u32 {
        SPARK_MAX_TOKENS
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let body = self.build_request(&request);
        let response = self
            .transport
            .post_stream(self.name(), &self.url, &self.headers(), &body)
            .await?;

        let mut assembler = SseAssembler::new();
        let outcome =
            tokio::time::timeout(self.stream_timeout, read_stream(response, &mut assembler)).await;
        self.transport
            .logger()
            .log_response(self.name(), 200, assembler.raw())
            .await;

        match outcome {
            Ok(Ok(())) => assembler.finish(&self.model),
            Ok(Err(e)) => Err(e),
            Err(_) if assembler.has_content() => {
                tracing::warn!(
                    timeout_secs = self.stream_timeout.as_secs(),
                    "Spark stream timed out, using partial content"
                );
                assembler.finish(&self.model)
            }
            Err(_) => Err(NokodeError::Api(ApiError::Timeout)),
        }
    }
}

async fn read_stream(response: Response, assembler: &mut SseAssembler) -> Result<()> {
    let mut stream = response.bytes_stream();
    let mut buffer: Vec<u8> = Vec::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| NokodeError::Api(ApiError::StreamError(e.to_string())))?;
        buffer.extend_from_slice(&chunk);

        while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = buffer.drain(..=pos).collect();
            if assembler.push_line(&String::from_utf8_lossy(&line))? {
                return Ok(());
            }
        }
    }

    if !buffer.is_empty() {
        assembler.push_line(&String::from_utf8_lossy(&buffer))?;
    }
    Ok(())
}

#[derive(Debug, Default, Clone)]
struct PartialCall {
    id: Option<String>,
    name: String,
    arguments: String,
}

impl PartialCall {
    fn complete_arguments(&self) -> Option<Value> {
        serde_json::from_str::<Value>(&self.arguments)
            .ok()
            .filter(Value::is_object)
    }
}

/// Folds Spark SSE frames into a single response
#[derive(Debug, Default)]
pub struct SseAssembler {
    id: Option<String>,
    content: String,
    reasoning: String,
    calls: BTreeMap<usize, PartialCall>,
    finish_reason: Option<String>,
    raw: String,
}

impl SseAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line of the event stream.
    ///
    /// Returns `true` once reading can stop: the `[DONE]` sentinel arrived or a
    /// `webResponse` call has complete arguments.
    pub fn push_line(&mut self, line: &str) -> Result<bool> {
        let line = line.trim();
        let Some(data) = line.strip_prefix("data:") else {
            return Ok(false);
        };
        let data = data.trim();
        if data.is_empty() {
            return Ok(false);
        }
        self.raw.push_str(data);
        self.raw.push('\n');
        if data == "[DONE]" {
            return Ok(true);
        }

        let chunk: SparkChunk = match serde_json::from_str(data) {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::debug!(error = %e, "skipping unparseable Spark frame");
                return Ok(false);
            }
        };

        if let Some(error) = chunk.error {
            return Err(NokodeError::Api(ApiError::StreamError(error.to_string())));
        }
        if let Some(code) = chunk.code.filter(|c| *c != 0) {
            return Err(NokodeError::Api(ApiError::StreamError(format!(
                "Spark error {}: {}",
                code,
                chunk.message.unwrap_or_default()
            ))));
        }
        if self.id.is_none() {
            self.id = chunk.id;
        }

        for choice in chunk.choices {
            if let Some(reason) = choice.finish_reason {
                self.finish_reason = Some(reason);
            }
            let Some(delta) = choice.delta else {
                continue;
            };
            if let Some(text) = delta.content {
                self.content.push_str(&text);
            }
            if let Some(reasoning) = delta.reasoning_content {
                self.reasoning.push_str(&reasoning);
            }
            for (position, call) in delta.tool_calls.unwrap_or_default().into_iter().enumerate() {
                let entry = self.calls.entry(call.index.unwrap_or(position)).or_default();
                if let Some(id) = call.id.filter(|id| !id.is_empty()) {
                    entry.id = Some(id);
                }
                if let Some(function) = call.function {
                    if let Some(name) = function.name {
                        entry.name.push_str(&name);
                    }
                    if let Some(arguments) = function.arguments {
                        entry.arguments.push_str(&arguments);
                    }
                }
            }
        }

        Ok(self.has_complete_web_response())
    }

    fn has_complete_web_response(&self) -> bool {
        self.calls
            .values()
            .any(|c| c.name == WEB_RESPONSE_TOOL && c.complete_arguments().is_some())
    }

    /// Whether anything usable has arrived so far
    pub fn has_content(&self) -> bool {
        !self.content.trim().is_empty()
            || !self.reasoning.trim().is_empty()
            || self
                .calls
                .values()
                .any(|c| !c.name.is_empty() && c.complete_arguments().is_some())
    }

    /// Data lines received so far, one per line
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Build the response from everything assembled so far
    pub fn finish(&self, model: &str) -> Result<CompletionResponse> {
        let mut content = Vec::new();
        let text = if self.content.is_empty() {
            &self.reasoning
        } else {
            &self.content
        };
        if !text.is_empty() {
            content.push(ContentBlockResponse::Text { text: text.clone() });
        }

        for (index, call) in &self.calls {
            if call.name.is_empty() {
                continue;
            }
            content.push(ContentBlockResponse::ToolUse {
                id: call
                    .id
                    .clone()
                    .unwrap_or_else(|| synthetic_call_id(*index)),
                name: call.name.clone(),
                input: parse_arguments(&call.arguments),
            });
        }

        let has_calls = content
            .iter()
            .any(|b| matches!(b, ContentBlockResponse::ToolUse { .. }));
        let stop_reason = if has_calls {
            Some(StopReason::ToolUse)
        } else {
            self.finish_reason
                .as_deref()
                .and_then(StopReason::from_finish_reason)
                .or(Some(StopReason::EndTurn))
        };

        Ok(CompletionResponse {
            id: self.id.clone().unwrap_or_default(),
            model: model.to_string(),
            content,
            stop_reason,
            usage: Usage::default(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct SparkChunk {
    id: Option<String>,
    #[serde(default)]
    choices: Vec<SparkChoice>,
    code: Option<i64>,
    message: Option<String>,
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct SparkChoice {
    delta: Option<SparkDelta>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SparkDelta {
    content: Option<String>,
    reasoning_content: Option<String>,
    tool_calls: Option<Vec<SparkToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct SparkToolCallDelta {
    index: Option<usize>,
    id: Option<String>,
    function: Option<SparkFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct SparkFunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}

/// Signed URL for Spark's WebSocket endpoint.
///
/// The signature is HMAC-SHA256 over the host, the RFC 1123 date and the
/// request line, keyed with `api_secret`.
pub fn signed_websocket_url(api_key: &str, api_secret: &str, date: DateTime<Utc>) -> Result<String> {
    let date = date.format("%a, %d %b %Y %H:%M:%S GMT").to_string();
    let origin = format!(
        "host: {}\ndate: {}\nGET {} HTTP/1.1",
        SPARK_WS_HOST, date, SPARK_WS_PATH
    );

    let mut mac = HmacSha256::new_from_slice(api_secret.as_bytes())
        .map_err(|e| NokodeError::Config(format!("Invalid Spark API secret: {}", e)))?;
    mac.update(origin.as_bytes());
    let signature = STANDARD.encode(mac.finalize().into_bytes());

    let authorization = STANDARD.encode(format!(
        "api_key=\"{}\", algorithm=\"hmac-sha256\", headers=\"host date request-line\", signature=\"{}\"",
        api_key, signature
    ));

    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("authorization", &authorization)
        .append_pair("date", &date)
        .append_pair("host", SPARK_WS_HOST)
        .finish();

    Ok(format!("wss://{}{}?{}", SPARK_WS_HOST, SPARK_WS_PATH, query))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::message::Message;
    use crate::llm::provider::ResponseKind;
    use chrono::TimeZone;

    fn frame(value: Value) -> String {
        format!("data: {}", value)
    }

    #[test]
    fn test_build_request_shape() {
        let provider = SparkProvider::new(Transport::direct(), "key", "secret", "x1")
            .with_system_prompt("You are a web server.");
        let request = CompletionRequest::new("", vec![Message::user("GET /")]);
        let body = provider.build_request(&request);

        assert_eq!(body["model"], "x1");
        assert_eq!(body["user"], "nokode-user");
        assert_eq!(body["max_tokens"], 65535);
        assert_eq!(body["stream"], true);
        assert_eq!(body["thinking"]["type"], "disabled");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "GET /");
        assert!(body.get("tool_choice").is_none());
    }

    #[test]
    fn test_headers_use_key_and_secret() {
        let provider = SparkProvider::new(Transport::direct(), "ak", "sk", "x1");
        assert!(provider
            .headers()
            .contains(&("authorization".to_string(), "Bearer ak:sk".to_string())));
    }

    #[test]
    fn test_assembler_concatenates_text() {
        let mut assembler = SseAssembler::new();
        assert!(!assembler
            .push_line(&frame(json!({"id": "s1", "choices": [{"delta": {"content": "<html>"}}]})))
            .unwrap());
        assert!(!assembler
            .push_line(&frame(json!({"choices": [{"delta": {"content": "</html>"}}]})))
            .unwrap());
        assert!(assembler.push_line("data: [DONE]").unwrap());

        let response = assembler.finish("x1").unwrap();
        assert_eq!(response.id, "s1");
        assert_eq!(response.classify(), ResponseKind::Text("<html></html>".to_string()));
    }

    #[test]
    fn test_assembler_reasoning_only_when_no_content() {
        let mut assembler = SseAssembler::new();
        assembler
            .push_line(&frame(json!({"choices": [{"delta": {"reasoning_content": "thinking"}}]})))
            .unwrap();
        assert_eq!(
            assembler.finish("x1").unwrap().classify(),
            ResponseKind::Text("thinking".to_string())
        );

        assembler
            .push_line(&frame(json!({"choices": [{"delta": {"content": "answer"}}]})))
            .unwrap();
        assert_eq!(
            assembler.finish("x1").unwrap().classify(),
            ResponseKind::Text("answer".to_string())
        );
    }

    #[test]
    fn test_assembler_merges_tool_call_fragments() {
        let mut assembler = SseAssembler::new();
        assembler
            .push_line(&frame(json!({"choices": [{"delta": {"tool_calls": [
                {"index": 0, "id": "call_db", "function": {"name": "database", "arguments": "{\"query\":"}}
            ]}}]})))
            .unwrap();
        assembler
            .push_line(&frame(json!({"choices": [{"delta": {"tool_calls": [
                {"index": 0, "function": {"arguments": "\"SELECT 1\"}"}}
            ]}}]})))
            .unwrap();

        match assembler.finish("x1").unwrap().classify() {
            ResponseKind::ToolCalls { calls, .. } => {
                assert_eq!(calls.len(), 1);
                assert_eq!(calls[0].id, "call_db");
                assert_eq!(calls[0].arguments["query"], "SELECT 1");
            }
            other => panic!("expected tool calls, got {:?}", other),
        }
    }

    #[test]
    fn test_assembler_stops_on_complete_web_response() {
        let mut assembler = SseAssembler::new();
        let stop = assembler
            .push_line(&frame(json!({"choices": [{"delta": {"tool_calls": [
                {"index": 0, "id": "call_w", "function": {"name": "webResponse", "arguments": "{\"body\":"}}
            ]}}]})))
            .unwrap();
        assert!(!stop);

        let stop = assembler
            .push_line(&frame(json!({"choices": [{"delta": {"tool_calls": [
                {"index": 0, "function": {"arguments": "\"ok\"}"}}
            ]}}]})))
            .unwrap();
        assert!(stop);
    }

    #[test]
    fn test_assembler_skips_garbage_and_comments() {
        let mut assembler = SseAssembler::new();
        assert!(!assembler.push_line(": keep-alive").unwrap());
        assert!(!assembler.push_line("data: {not json").unwrap());
        assert!(!assembler.push_line("").unwrap());
        assert!(!assembler.has_content());
    }

    #[test]
    fn test_assembler_error_frame() {
        let mut assembler = SseAssembler::new();
        let err = assembler
            .push_line(&frame(json!({"code": 10013, "message": "input content audit failed"})))
            .unwrap_err();
        assert!(err.to_string().contains("10013"));
    }

    #[test]
    fn test_signed_websocket_url_known_vector() {
        let date = Utc.with_ymd_and_hms(2024, 10, 15, 8, 30, 0).unwrap();
        let url = signed_websocket_url("test-key", "test-secret", date).unwrap();
        assert_eq!(
            url,
            "wss://spark-api.xf-yun.com/v1/x1?authorization=YXBpX2tleT0idGVzdC1rZXkiLCBhbGdvcml0aG09ImhtYWMtc2hhMjU2IiwgaGVhZGVycz0iaG9zdCBkYXRlIHJlcXVlc3QtbGluZSIsIHNpZ25hdHVyZT0iN3lRUGtZOWRDKytZMGZiOHl0cW5qRnZkd25JVHI0LzcvcURqT1VHTVBLdz0i&date=Tue%2C+15+Oct+2024+08%3A30%3A00+GMT&host=spark-api.xf-yun.com"
        );
    }
}
