// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Tool system
//!
//! The model gets exactly three callbacks: `database`, `webResponse` and
//! `updateMemory`. Tools never fail the request. Errors are serialized as
//! `{"success": false, "error": ...}` and handed back to the model, and an
//! unknown tool name yields `null`.

pub mod builtin;
pub mod definition;

pub use builtin::{
    Database, DatabaseTool, MemoryMode, MemoryStore, MemoryTool, QueryMode, WebResponse,
    WebResponseTool,
};
pub use definition::*;

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Result;
use crate::llm::message::ContentBlock;
use crate::llm::provider::{ToolCall, ToolDefinition};

/// Output from a tool
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    /// JSON fed back to the model
    Value(Value),
    /// The HTTP response to send; ends the request
    Terminal(WebResponse),
}

/// Result of tool execution
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    /// The tool_use_id this result corresponds to
    pub tool_use_id: String,
    /// The output of the tool
    pub output: ToolOutput,
}

impl ToolResult {
    pub fn value(tool_use_id: impl Into<String>, value: Value) -> Self {
        Self {
            tool_use_id: tool_use_id.into(),
            output: ToolOutput::Value(value),
        }
    }

    /// Create an error result in the shape the model expects
    pub fn error(tool_use_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self::value(
            tool_use_id,
            json!({
                "success": false,
                "error": error.into()
            }),
        )
    }

    /// Check if this is an error
    pub fn is_error(&self) -> bool {
        match &self.output {
            ToolOutput::Value(value) => value.get("success") == Some(&Value::Bool(false)),
            ToolOutput::Terminal(_) => false,
        }
    }

    /// The terminal response, if this result ends the request
    pub fn terminal(&self) -> Option<&WebResponse> {
        match &self.output {
            ToolOutput::Terminal(response) => Some(response),
            ToolOutput::Value(_) => None,
        }
    }

    /// JSON text sent back to the model
    pub fn content_string(&self) -> String {
        let serialized = match &self.output {
            ToolOutput::Value(value) => serde_json::to_string(value),
            ToolOutput::Terminal(response) => serde_json::to_string(response),
        };
        serialized.unwrap_or_else(|_| "null".to_string())
    }

    /// Convert into a conversation block
    pub fn to_content_block(&self) -> ContentBlock {
        ContentBlock::ToolResult {
            tool_use_id: self.tool_use_id.clone(),
            content: self.content_string(),
            is_error: if self.is_error() { Some(true) } else { None },
        }
    }
}

/// Trait for implementing tools
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get the tool name
    fn name(&self) -> &str;

    /// Get the tool definition for the LLM
    fn definition(&self) -> ToolDefinition;

    /// Execute the tool with the model-supplied arguments
    async fn execute(&self, input: Value) -> Result<ToolOutput>;
}

/// Registry of available tools, in registration order
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the three built-in tools
    pub fn with_builtins(database: Arc<Database>, memory: Arc<MemoryStore>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(DatabaseTool::new(database)));
        registry.register(Arc::new(WebResponseTool));
        registry.register(Arc::new(MemoryTool::new(memory)));
        registry
    }

    /// Register a tool, replacing any tool with the same name
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        match self.index.get(&name) {
            Some(&slot) => self.tools[slot] = tool,
            None => {
                self.index.insert(name, self.tools.len());
                self.tools.push(tool);
            }
        }
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.index.get(name).map(|&slot| &self.tools[slot])
    }

    /// Get all tool definitions
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition()).collect()
    }

    /// List all tool names
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Run one tool call. Never fails.
    pub async fn dispatch(&self, call: &ToolCall) -> ToolResult {
        let Some(tool) = self.get(&call.name) else {
            tracing::warn!(tool = %call.name, tool_use_id = %call.id, "unknown tool requested");
            return ToolResult::value(&call.id, Value::Null);
        };

        tracing::debug!(tool = %call.name, tool_use_id = %call.id, "executing tool");
        match tool.execute(call.arguments.clone()).await {
            Ok(output) => ToolResult {
                tool_use_id: call.id.clone(),
                output,
            },
            Err(e) => {
                tracing::warn!(tool = %call.name, error = %e, "tool execution failed");
                ToolResult::error(&call.id, e.to_string())
            }
        }
    }
}
