// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! LLM provider implementations

pub mod anthropic;
pub mod baidu;
pub(crate) mod common;
pub mod openai;
pub mod spark;

pub use anthropic::AnthropicProvider;
pub use baidu::{baidu_provider, BaiduTokenSource};
pub use openai::{Auth, OpenAiCompatProvider};
pub use spark::{signed_websocket_url, SparkProvider, SseAssembler};
