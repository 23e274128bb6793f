// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! nokode - an HTTP server whose application logic is a language model.
//!
//! Every inbound request is rendered into a prompt and handed to an LLM
//! together with three tools (`database`, `webResponse`, `updateMemory`).
//! The model decides what to store, what to remember and what to answer.
//!
//! Architecture highlights:
//! - `llm`: provider trait, vendor codecs (Anthropic, OpenAI-compatible, Spark),
//!   transport with retry/backoff and rate limiting
//! - `tools`: the tool trait, registry and the three built-in tools
//! - `orchestrator`: the bounded multi-turn tool loop
//! - `extract`: turns the model's output into one HTTP response
//! - `prompt`: template loading and request variables
//! - `server`: the axum catch-all handler

pub mod cli;
pub mod config;
pub mod error;
pub mod extract;
pub mod llm;
pub mod orchestrator;
pub mod prompt;
pub mod server;
pub mod tools;

pub use error::{ApiError, NokodeError, Result};
