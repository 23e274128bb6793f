// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Mock LLM provider for testing
//!
//! Plays back a script of completions so the orchestrator and the server can
//! be exercised without a vendor. Once the script runs out the last step is
//! repeated.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{ApiError, NokodeError, Result};
use crate::llm::provider::{
    CompletionRequest, CompletionResponse, ContentBlockResponse, LlmProvider, StopReason, Usage,
};

/// A mock LLM provider for testing
#[derive(Clone)]
pub struct MockProvider {
    /// Provider name
    name: String,
    /// Scripted responses, consumed in order
    responses: Arc<Mutex<Vec<MockResponse>>>,
    /// Call counter
    call_count: Arc<AtomicUsize>,
    /// Recorded requests
    recorded_requests: Arc<Mutex<Vec<CompletionRequest>>>,
}

/// One scripted step
#[derive(Clone, Debug)]
pub enum MockResponse {
    /// Plain text completion
    Text(String),
    /// Tool calls, optionally with leading text
    ToolCalls {
        text: Option<String>,
        calls: Vec<MockToolCall>,
    },
    /// Fail the call
    Error(MockError),
}

/// Errors the mock can produce
#[derive(Clone, Debug)]
pub enum MockError {
    /// Non-retryable vendor status
    Status(u16, String),
    /// Vendor 429
    RateLimited,
    /// Connection-level failure
    Network(String),
}

/// A mock tool call
#[derive(Clone, Debug)]
pub struct MockToolCall {
    /// Tool call ID
    pub id: String,
    /// Tool name
    pub name: String,
    /// Tool input (JSON)
    pub input: serde_json::Value,
}

impl MockToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, input: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            input,
        }
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvider {
    /// Create a new mock provider that answers with empty text
    pub fn new() -> Self {
        Self {
            name: "mock".to_string(),
            responses: Arc::new(Mutex::new(vec![MockResponse::Text(String::new())])),
            call_count: Arc::new(AtomicUsize::new(0)),
            recorded_requests: Arc::new(Mutex::new(vec![])),
        }
    }

    /// Create a mock provider with a custom name
    pub fn with_name(name: impl Into<String>) -> Self {
        let mut provider = Self::new();
        provider.name = name.into();
        provider
    }

    fn responses(&self) -> MutexGuard<'_, Vec<MockResponse>> {
        match self.responses.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("Mock provider responses lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn requests(&self) -> MutexGuard<'_, Vec<CompletionRequest>> {
        match self.recorded_requests.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("Mock provider requests lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Replace the script with a single text response
    pub fn with_response(self, text: impl Into<String>) -> Self {
        self.with_script(vec![MockResponse::Text(text.into())])
    }

    /// Replace the script
    pub fn with_script(self, script: Vec<MockResponse>) -> Self {
        {
            let mut responses = self.responses();
            responses.clear();
            responses.extend(script);
        }
        self
    }

    /// Append one text step
    pub fn then_text(self, text: impl Into<String>) -> Self {
        self.push(MockResponse::Text(text.into()))
    }

    /// Append one tool-call step
    pub fn then_tool_calls(self, calls: Vec<MockToolCall>) -> Self {
        self.push(MockResponse::ToolCalls { text: None, calls })
    }

    /// Append one failing step
    pub fn then_error(self, error: MockError) -> Self {
        self.push(MockResponse::Error(error))
    }

    fn push(self, step: MockResponse) -> Self {
        {
            let mut responses = self.responses();
            // The placeholder from `new()` is dropped once a real step is scripted.
            if self.call_count() == 0
                && responses.len() == 1
                && matches!(&responses[0], MockResponse::Text(t) if t.is_empty())
            {
                responses.clear();
            }
            responses.push(step);
        }
        self
    }

    /// Get the number of times complete() was called
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Get all recorded requests
    pub fn recorded_requests(&self) -> Vec<CompletionRequest> {
        self.requests().clone()
    }

    /// Get the last request made
    pub fn last_request(&self) -> Option<CompletionRequest> {
        self.requests().last().cloned()
    }

    /// Get the next scripted step
    fn next_response(&self) -> MockResponse {
        let count = self.call_count.fetch_add(1, Ordering::SeqCst);
        let responses = self.responses();
        if responses.is_empty() {
            MockResponse::Text(String::new())
        } else {
            responses[count.min(responses.len() - 1)].clone()
        }
    }
}

impl MockError {
    fn into_error(self) -> NokodeError {
        let api = match self {
            MockError::Status(status, body) => ApiError::Status { status, body },
            MockError::RateLimited => ApiError::RateLimited {
                retry_after: None,
                body: "rate limited".to_string(),
            },
            MockError::Network(message) => ApiError::Network(message),
        };
        NokodeError::Api(api)
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        self.requests().push(request);
        let id = format!("mock_{}", self.call_count());

        let (content, stop_reason) = match self.next_response() {
            MockResponse::Error(error) => return Err(error.into_error()),
            MockResponse::Text(text) => {
                let content = if text.is_empty() {
                    vec![]
                } else {
                    vec![ContentBlockResponse::Text { text }]
                };
                (content, StopReason::EndTurn)
            }
            MockResponse::ToolCalls { text, calls } => {
                let mut content = Vec::new();
                if let Some(text) = text {
                    content.push(ContentBlockResponse::Text { text });
                }
                content.extend(calls.into_iter().map(|c| ContentBlockResponse::ToolUse {
                    id: c.id,
                    name: c.name,
                    input: c.input,
                }));
                (content, StopReason::ToolUse)
            }
        };

        Ok(CompletionResponse {
            id,
            model: "mock-model".to_string(),
            content,
            stop_reason: Some(stop_reason),
            usage: Usage {
                input_tokens: 10,
                output_tokens: 5,
            },
        })
    }
}
