// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Multi-turn tool loop
//!
//! One run per inbound request:
//!
//! ```text
//! AwaitingModel -> ToolCallsPending -> ExecutingTools -> AwaitingModel ... -> Terminal
//! ```
//!
//! Plain text from the model ends the run. Tool calls run one at a time in
//! the order the model emitted them, and the first `webResponse` ends the
//! run on the spot. The number of model calls is capped; going past the cap
//! is an error rather than a silent truncation.

use std::sync::Arc;

use crate::error::{NokodeError, Result};
use crate::llm::message::{ContentBlock, Conversation};
use crate::llm::provider::{CompletionRequest, LlmProvider, ResponseKind, ToolCall};
use crate::tools::{ToolRegistry, WebResponse};

/// Default ceiling on model calls per request
pub const DEFAULT_MAX_TURNS: u32 = 10;

/// What a finished run produced
#[derive(Debug)]
pub struct RunOutcome {
    /// The `webResponse` the model emitted, if any
    pub terminal: Option<WebResponse>,
    /// Text of the final model turn when it ended without `webResponse`
    pub text: String,
    /// Model calls made
    pub turns: u32,
    /// The full exchange
    pub conversation: Conversation,
}

#[derive(Debug)]
enum State {
    AwaitingModel,
    ToolCallsPending(Vec<ToolCall>),
    ExecutingTools(Vec<ToolCall>),
    Terminal {
        terminal: Option<WebResponse>,
        text: String,
    },
}

impl State {
    fn label(&self) -> &'static str {
        match self {
            State::AwaitingModel => "awaiting_model",
            State::ToolCallsPending(_) => "tool_calls_pending",
            State::ExecutingTools(_) => "executing_tools",
            State::Terminal { .. } => "terminal",
        }
    }
}

/// Drives the conversation between one provider and the tool registry
#[derive(Clone)]
pub struct Orchestrator {
    provider: Arc<dyn LlmProvider>,
    tools: Arc<ToolRegistry>,
    max_turns: u32,
}

impl Orchestrator {
    pub fn new(provider: Arc<dyn LlmProvider>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            provider,
            tools,
            max_turns: DEFAULT_MAX_TURNS,
        }
    }

    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns.max(1);
        self
    }

    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.provider
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    pub fn max_turns(&self) -> u32 {
        self.max_turns
    }

    /// Run the loop for one rendered prompt
    pub async fn run(&self, prompt: &str) -> Result<RunOutcome> {
        let mut conversation = Conversation::with_prompt(prompt);
        let definitions = self.tools.definitions();
        let mut turns: u32 = 0;
        let mut state = State::AwaitingModel;

        loop {
            tracing::trace!(state = state.label(), turn = turns, "orchestrator step");
            state = match state {
                State::AwaitingModel => {
                    if turns >= self.max_turns {
                        tracing::warn!(
                            turns,
                            provider = self.provider.name(),
                            "turn ceiling reached without a terminal response"
                        );
                        return Err(NokodeError::LoopExceeded { turns });
                    }
                    turns += 1;

                    let request = CompletionRequest::new(
                        self.provider.model(),
                        conversation.messages().to_vec(),
                    )
                    .with_max_tokens(self.provider.max_tokens())
                    .with_tools(definitions.clone());

                    tracing::debug!(
                        turn = turns,
                        provider = self.provider.name(),
                        messages = conversation.len(),
                        "calling model"
                    );
                    let response = self.provider.complete(request).await?;
                    tracing::debug!(
                        turn = turns,
                        input_tokens = response.usage.input_tokens,
                        output_tokens = response.usage.output_tokens,
                        stop_reason = ?response.stop_reason,
                        "model responded"
                    );

                    let kind = response.classify();
                    conversation.push(response.to_message());
                    match kind {
                        ResponseKind::Text(text) => State::Terminal {
                            terminal: None,
                            text,
                        },
                        ResponseKind::ToolCalls { calls, .. } => State::ToolCallsPending(calls),
                    }
                }

                State::ToolCallsPending(calls) => {
                    tracing::info!(
                        turn = turns,
                        tool_calls = calls.len(),
                        tools = ?calls.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
                        "model requested tools"
                    );
                    State::ExecutingTools(calls)
                }

                State::ExecutingTools(calls) => {
                    let mut blocks: Vec<ContentBlock> = Vec::with_capacity(calls.len());
                    let mut terminal = None;

                    for call in &calls {
                        let result = self.tools.dispatch(call).await;
                        if let Some(response) = result.terminal() {
                            tracing::info!(
                                turn = turns,
                                status = response.status_code,
                                "webResponse received, ending loop"
                            );
                            terminal = Some(response.clone());
                            break;
                        }
                        blocks.push(result.to_content_block());
                    }

                    match terminal {
                        Some(response) => State::Terminal {
                            terminal: Some(response),
                            text: String::new(),
                        },
                        None => {
                            conversation.push_tool_results(blocks);
                            State::AwaitingModel
                        }
                    }
                }

                State::Terminal { terminal, text } => {
                    return Ok(RunOutcome {
                        terminal,
                        text,
                        turns,
                        conversation,
                    });
                }
            };
        }
    }
}
