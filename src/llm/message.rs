// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Message types for LLM interactions
//!
//! Defines the vendor-neutral conversation model. Codecs translate it into
//! each vendor's wire format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// A message in a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier for the message
    pub id: Uuid,

    /// Role of the message sender
    pub role: Role,

    /// Content of the message
    pub content: MessageContent,

    /// When the message was created
    pub timestamp: DateTime<Utc>,
}

/// Role of the message sender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// User message (prompts and tool results)
    User,
    /// Assistant response
    Assistant,
    /// System prompt
    System,
}

/// Content of a message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Simple text content
    Text(String),
    /// Multiple content blocks (text, tool use, tool result)
    Blocks(Vec<ContentBlock>),
}

/// A block of content within a message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Text content
    Text { text: String },

    /// Tool invocation requested by the assistant
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    /// Result of a tool invocation, sent back in a user message
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
}

impl Message {
    fn with_content(role: Role, content: MessageContent) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content,
            timestamp: Utc::now(),
        }
    }

    /// Create a new user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_content(Role::User, MessageContent::Text(content.into()))
    }

    /// Create a new system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_content(Role::System, MessageContent::Text(content.into()))
    }

    /// Create a new assistant message with content blocks
    pub fn assistant_blocks(blocks: Vec<ContentBlock>) -> Self {
        Self::with_content(Role::Assistant, MessageContent::Blocks(blocks))
    }

    /// Create a user message carrying tool results
    pub fn tool_results(blocks: Vec<ContentBlock>) -> Self {
        Self::with_content(Role::User, MessageContent::Blocks(blocks))
    }

    /// Create a single tool result message
    pub fn tool_result(
        tool_use_id: impl Into<String>,
        content: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Self::tool_results(vec![ContentBlock::ToolResult {
            tool_use_id: tool_use_id.into(),
            content: content.into(),
            is_error: if is_error { Some(true) } else { None },
        }])
    }

    /// Get the text content of the message, joining text blocks
    pub fn text(&self) -> Option<String> {
        match &self.content {
            MessageContent::Text(text) => Some(text.clone()),
            MessageContent::Blocks(blocks) => {
                let texts: Vec<&str> = blocks
                    .iter()
                    .filter_map(|block| match block {
                        ContentBlock::Text { text } => Some(text.as_str()),
                        _ => None,
                    })
                    .collect();
                if texts.is_empty() {
                    None
                } else {
                    Some(texts.concat())
                }
            }
        }
    }

    /// Get all tool use blocks from the message
    pub fn tool_uses(&self) -> Vec<&ContentBlock> {
        self.blocks()
            .iter()
            .filter(|block| matches!(block, ContentBlock::ToolUse { .. }))
            .collect()
    }

    /// Get all tool result blocks from the message
    pub fn tool_result_blocks(&self) -> Vec<&ContentBlock> {
        self.blocks()
            .iter()
            .filter(|block| matches!(block, ContentBlock::ToolResult { .. }))
            .collect()
    }

    /// Check if message has any tool use
    pub fn has_tool_use(&self) -> bool {
        !self.tool_uses().is_empty()
    }

    fn blocks(&self) -> &[ContentBlock] {
        match &self.content {
            MessageContent::Text(_) => &[],
            MessageContent::Blocks(blocks) => blocks,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::System => write!(f, "system"),
        }
    }
}

/// Append-only conversation log owned by one request
///
/// Messages can only be added; nothing is rewritten or removed.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    /// Create a new empty conversation
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a conversation seeded with a user prompt
    pub fn with_prompt(prompt: impl Into<String>) -> Self {
        let mut conversation = Self::new();
        conversation.push(Message::user(prompt));
        conversation
    }

    /// Append a message
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Append tool results as one user message.
    ///
    /// Only the round opened by the latest assistant turn is considered: a
    /// result is kept when that turn requested its `tool_use_id` and no result
    /// for it has been appended since. Earlier rounds may reuse the same ids.
    /// Replaying the same append is harmless. Returns the number of results
    /// actually appended.
    pub fn push_tool_results(&mut self, results: Vec<ContentBlock>) -> usize {
        let requested = self.requested_tool_ids();
        let mut answered = self.answered_tool_ids();
        let fresh: Vec<ContentBlock> = results
            .into_iter()
            .filter(|block| match block {
                ContentBlock::ToolResult { tool_use_id, .. } => {
                    let expected = requested
                        .as_ref()
                        .map_or(true, |ids| ids.contains(tool_use_id));
                    if !expected {
                        tracing::warn!(tool_use_id = %tool_use_id, "dropping result for a tool call the model did not make");
                    }
                    expected && answered.insert(tool_use_id.clone())
                }
                _ => false,
            })
            .collect();

        let appended = fresh.len();
        if appended > 0 {
            self.push(Message::tool_results(fresh));
        }
        appended
    }

    /// Messages after the latest assistant turn, or all of them if there is none
    fn current_round(&self) -> &[Message] {
        match self.messages.iter().rposition(|m| m.role == Role::Assistant) {
            Some(index) => &self.messages[index + 1..],
            None => &self.messages,
        }
    }

    /// Tool call ids of the latest assistant turn, if it made any calls
    fn requested_tool_ids(&self) -> Option<HashSet<String>> {
        let ids: HashSet<String> = self
            .last_assistant()?
            .tool_uses()
            .into_iter()
            .filter_map(|block| match block {
                ContentBlock::ToolUse { id, .. } => Some(id.clone()),
                _ => None,
            })
            .collect();
        if ids.is_empty() {
            None
        } else {
            Some(ids)
        }
    }

    /// Ids answered since the latest assistant turn
    pub fn answered_tool_ids(&self) -> HashSet<String> {
        self.current_round()
            .iter()
            .flat_map(|message| message.tool_result_blocks())
            .filter_map(|block| match block {
                ContentBlock::ToolResult { tool_use_id, .. } => Some(tool_use_id.clone()),
                _ => None,
            })
            .collect()
    }

    /// All messages in order
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Get the last message
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Get the last assistant message
    pub fn last_assistant(&self) -> Option<&Message> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
    }

    /// Check if the conversation is empty
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Number of messages
    pub fn len(&self) -> usize {
        self.messages.len()
    }
}
