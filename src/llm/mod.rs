// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! LLM module for nokode
//!
//! Provides abstraction over the supported vendors plus the resilience
//! layers every outbound call goes through.

pub mod factory;
pub mod llm_log;
pub mod message;
pub mod mock_provider;
pub mod provider;
pub mod providers;
pub mod rate_limit;
pub mod retry;
pub mod transport;

pub use message::*;
pub use provider::*;
