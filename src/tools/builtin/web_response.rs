// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! The `webResponse` tool: the model's way of answering the HTTP request

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::{NokodeError, Result};
use crate::llm::provider::ToolDefinition;
use crate::tools::{SchemaBuilder, Tool, ToolOutput};

/// The response sent back to the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebResponse {
    pub status_code: u16,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content_type: String,
    #[serde(default)]
    pub body: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

impl WebResponse {
    /// Build a response. A zero status means 200 and a non-empty content type
    /// is also set as the `Content-Type` header.
    pub fn new(status_code: u16, content_type: impl Into<String>, body: impl Into<String>) -> Self {
        let content_type = content_type.into();
        let mut headers = BTreeMap::new();
        if !content_type.is_empty() {
            headers.insert("Content-Type".to_string(), content_type.clone());
        }
        Self {
            status_code: if status_code == 0 { 200 } else { status_code },
            content_type,
            body: body.into(),
            headers,
        }
    }

    /// Merge extra headers. `Content-Type` from `content_type` wins.
    pub fn with_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        for (name, value) in headers {
            if name.eq_ignore_ascii_case("content-type") && !self.content_type.is_empty() {
                continue;
            }
            self.headers.insert(name, value);
        }
        self
    }
}

/// Parse a status code the model may send as a number, a float or a string
pub(crate) fn parse_status(value: Option<&Value>) -> Result<u16> {
    let raw = match value {
        None | Some(Value::Null) => return Ok(200),
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Some(Value::String(s)) => s.trim().parse::<u64>().ok(),
        Some(_) => None,
    };

    match raw {
        Some(0) => Ok(200),
        Some(code @ 100..=599) => Ok(code as u16),
        _ => Err(NokodeError::InvalidInput(format!(
            "invalid statusCode: {}",
            value.map(|v| v.to_string()).unwrap_or_default()
        ))),
    }
}

fn string_field(input: &Value, name: &str) -> String {
    match input.get(name) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

pub struct WebResponseTool;

#[async_trait]
impl Tool for WebResponseTool {
    fn name(&self) -> &str {
        "webResponse"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "webResponse".to_string(),
            description:
                "Generate a web response with full control over status, headers, and body"
                    .to_string(),
            input_schema: SchemaBuilder::new()
                .number("statusCode", "HTTP status code (default 200)", false)
                .string("contentType", "Content-Type header value", false)
                .string(
                    "body",
                    "Response body as a string (can be HTML, JSON string, plain text, etc.)",
                    true,
                )
                .string_map(
                    "headers",
                    "Additional response headers, e.g. Location for redirects",
                    false,
                )
                .build(),
        }
    }

    async fn execute(&self, input: Value) -> Result<ToolOutput> {
        let status = parse_status(input.get("statusCode"))?;

        let headers = input
            .get("headers")
            .and_then(Value::as_object)
            .map(|map| {
                map.iter()
                    .map(|(name, value)| {
                        let value = match value {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        };
                        (name.clone(), value)
                    })
                    .collect()
            })
            .unwrap_or_default();

        let response = WebResponse::new(
            status,
            string_field(&input, "contentType"),
            string_field(&input, "body"),
        )
        .with_headers(headers);

        tracing::debug!(status = response.status_code, "webResponse produced");
        Ok(ToolOutput::Terminal(response))
    }
}
