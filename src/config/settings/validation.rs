// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use crate::error::{NokodeError, Result};

use super::{ProviderKind, Settings};

impl Settings {
    /// Reject settings the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.orchestrator.max_turns == 0 {
            return Err(NokodeError::Config(
                "orchestrator.max_turns must be at least 1".to_string(),
            ));
        }
        if self.server.timeout_ms == 0 {
            return Err(NokodeError::Config(
                "server.timeout_ms must be greater than zero".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.resilience.jitter) {
            return Err(NokodeError::Config(format!(
                "resilience.jitter must be between 0.0 and 1.0, got {}",
                self.resilience.jitter
            )));
        }
        if self.resilience.rate_limit_multiplier == 0 {
            return Err(NokodeError::Config(
                "resilience.rate_limit_multiplier must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Check if the selected provider has the credentials it needs.
    pub fn is_provider_configured(&self, provider: ProviderKind) -> bool {
        let providers = &self.providers;
        match provider {
            ProviderKind::Anthropic => providers.anthropic.api_key.is_some(),
            ProviderKind::OpenAi => providers.openai.api_key.is_some(),
            ProviderKind::Qwen => providers.qwen.api_key.is_some(),
            ProviderKind::Baidu => {
                providers.baidu.api_token.is_some()
                    || (providers.baidu.api_key.is_some() && providers.baidu.secret_key.is_some())
            }
            ProviderKind::Spark => {
                providers.spark.api_key.is_some() && providers.spark.api_secret.is_some()
            }
        }
    }
}
