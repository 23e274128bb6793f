// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Persistent memory file and the `updateMemory` tool
//!
//! The memory file holds free-form markdown notes (user feedback, preferences)
//! that are substituted into every prompt as `{{MEMORY}}`.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::Result;
use crate::llm::provider::ToolDefinition;
use crate::tools::{SchemaBuilder, Tool, ToolOutput};

/// How an update is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryMode {
    Append,
    Rewrite,
}

impl MemoryMode {
    /// Anything other than `append` rewrites
    pub fn parse(mode: &str) -> Self {
        if mode.eq_ignore_ascii_case("append") {
            MemoryMode::Append
        } else {
            MemoryMode::Rewrite
        }
    }
}

/// Outcome reported to the model
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryResult {
    pub success: bool,
    pub message: String,
}

/// The memory file on disk
#[derive(Debug)]
pub struct MemoryStore {
    path: PathBuf,
    // Serializes read-modify-write cycles between concurrent requests
    write_lock: Mutex<()>,
}

impl MemoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current contents for the prompt; a missing or unreadable file reads
    /// as empty and invalid UTF-8 is replaced
    pub async fn load(&self) -> String {
        match self.read_bytes().await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to read memory file");
                String::new()
            }
        }
    }

    /// Raw file contents; only a missing file counts as empty
    async fn read_bytes(&self) -> std::io::Result<Vec<u8>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// Append to or rewrite the memory file
    pub async fn update(&self, content: &str, mode: MemoryMode) -> MemoryResult {
        let _guard = self.write_lock.lock().await;

        let (new_content, done) = match mode {
            MemoryMode::Append => {
                // Existing notes must survive, so a failed read aborts the update
                let mut existing = match self.read_bytes().await {
                    Ok(bytes) => bytes,
                    Err(e) => return self.failed(e),
                };
                if !existing.is_empty() && existing.last() != Some(&b'\n') {
                    existing.push(b'\n');
                }
                existing.extend_from_slice(content.as_bytes());
                (existing, "Memory appended successfully")
            }
            MemoryMode::Rewrite => (content.as_bytes().to_vec(), "Memory rewritten successfully"),
        };

        match self.write(&new_content).await {
            Ok(()) => {
                tracing::info!(path = %self.path.display(), ?mode, bytes = new_content.len(), "memory updated");
                MemoryResult {
                    success: true,
                    message: done.to_string(),
                }
            }
            Err(e) => self.failed(e),
        }
    }

    fn failed(&self, error: std::io::Error) -> MemoryResult {
        tracing::error!(path = %self.path.display(), error = %error, "failed to update memory");
        MemoryResult {
            success: false,
            message: format!("Failed to update memory: {}", error),
        }
    }

    async fn write(&self, content: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, content).await
    }
}

pub struct MemoryTool {
    store: Arc<MemoryStore>,
}

impl MemoryTool {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for MemoryTool {
    fn name(&self) -> &str {
        "updateMemory"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "updateMemory".to_string(),
            description: "Update persistent memory to store user feedback, preferences, and instructions that shape the application.".to_string(),
            input_schema: SchemaBuilder::new()
                .string(
                    "content",
                    "User preferences, feedback, or instructions to save (markdown format)",
                    true,
                )
                .string_enum(
                    "mode",
                    "Whether to append to existing memory or rewrite the entire file",
                    &["append", "rewrite"],
                    None,
                    true,
                )
                .build(),
        }
    }

    async fn execute(&self, input: Value) -> Result<ToolOutput> {
        let content = input["content"].as_str().unwrap_or("");
        let mode = MemoryMode::parse(input["mode"].as_str().unwrap_or("rewrite"));

        let result = self.store.update(content, mode).await;
        Ok(ToolOutput::Value(serde_json::to_value(result)?))
    }
}
