// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Provider factory for creating LLM providers
//!
//! The vendor is chosen once at startup; the rest of the server only sees an
//! `Arc<dyn LlmProvider>`.

use std::sync::Arc;
use std::time::Duration;

use crate::config::{
    ProviderKind, Settings, DEFAULT_ANTHROPIC_MODEL, DEFAULT_OPENAI_MODEL, DEFAULT_QWEN_MODEL,
};
use crate::error::{NokodeError, Result};
use crate::llm::llm_log::LlmLogger;
use crate::llm::provider::LlmProvider;
use crate::llm::providers::{baidu_provider, AnthropicProvider, OpenAiCompatProvider, SparkProvider};
use crate::llm::rate_limit::RateLimiter;
use crate::llm::retry::RetryPolicy;
use crate::llm::transport::Transport;

/// Factory for creating LLM providers
pub struct ProviderFactory;

impl ProviderFactory {
    /// Create the configured provider with a transport built from settings
    pub fn create(settings: &Settings) -> Result<Arc<dyn LlmProvider>> {
        let kind = settings.provider;
        let transport = Self::transport(settings, kind)?;
        Self::create_with_transport(kind, settings, transport)
    }

    /// Transport (client, retry policy, rate limiter, dumps) for one provider
    pub fn transport(settings: &Settings, kind: ProviderKind) -> Result<Transport> {
        let limiter = Arc::new(RateLimiter::from_config(&settings.rate_limit, kind));
        tracing::debug!(
            provider = %kind,
            interval_ms = limiter.interval().as_millis() as u64,
            "rate limiter configured"
        );
        Transport::new(
            &settings.http,
            RetryPolicy::from(&settings.resilience),
            limiter,
            LlmLogger::from_config(&settings.llm_log),
        )
    }

    /// Create a provider over an existing transport
    pub fn create_with_transport(
        kind: ProviderKind,
        settings: &Settings,
        transport: Transport,
    ) -> Result<Arc<dyn LlmProvider>> {
        match kind {
            ProviderKind::Anthropic => Self::create_anthropic(settings, transport),
            ProviderKind::OpenAi => Self::create_openai(settings, transport),
            ProviderKind::Qwen => Self::create_qwen(settings, transport),
            ProviderKind::Baidu => Ok(Arc::new(baidu_provider(
                transport,
                &settings.providers.baidu,
            )?)),
            ProviderKind::Spark => Self::create_spark(settings, transport),
        }
    }

    /// Create an Anthropic provider
    pub fn create_anthropic(settings: &Settings, transport: Transport) -> Result<Arc<dyn LlmProvider>> {
        let config = &settings.providers.anthropic;
        let api_key = require(config.api_key.as_deref(), "ANTHROPIC_API_KEY", "Anthropic")?;

        let mut provider = AnthropicProvider::new(
            transport,
            api_key,
            config.model_or(DEFAULT_ANTHROPIC_MODEL),
        );
        if let Some(base_url) = &config.base_url {
            provider = provider.with_base_url(base_url.clone());
        }
        if let Some(max_tokens) = config.max_tokens {
            provider = provider.with_max_tokens(max_tokens);
        }
        Ok(Arc::new(provider))
    }

    /// Create an OpenAI provider
    pub fn create_openai(settings: &Settings, transport: Transport) -> Result<Arc<dyn LlmProvider>> {
        let config = &settings.providers.openai;
        let api_key = require(config.api_key.as_deref(), "OPENAI_API_KEY", "OpenAI")?;

        let mut provider =
            OpenAiCompatProvider::openai(transport, api_key, config.model_or(DEFAULT_OPENAI_MODEL));
        if let Some(base_url) = &config.base_url {
            provider = provider.with_base_url(base_url.clone());
        }
        if let Some(max_tokens) = config.max_tokens {
            provider = provider.with_max_tokens(max_tokens);
        }
        Ok(Arc::new(provider))
    }

    /// Create a Qwen provider
    pub fn create_qwen(settings: &Settings, transport: Transport) -> Result<Arc<dyn LlmProvider>> {
        let config = &settings.providers.qwen;
        let api_key = require(config.api_key.as_deref(), "QWEN_API_KEY", "Qwen")?;

        let mut provider =
            OpenAiCompatProvider::qwen(transport, api_key, config.model_or(DEFAULT_QWEN_MODEL));
        if let Some(base_url) = &config.base_url {
            provider = provider.with_base_url(base_url.clone());
        }
        if let Some(max_tokens) = config.max_tokens {
            provider = provider.with_max_tokens(max_tokens);
        }
        Ok(Arc::new(provider))
    }

    /// Create a Spark provider
    pub fn create_spark(settings: &Settings, transport: Transport) -> Result<Arc<dyn LlmProvider>> {
        let config = &settings.providers.spark;
        let api_key = require(config.api_key.as_deref(), "SPARK_API_KEY", "Spark")?;
        let api_secret = require(config.api_secret.as_deref(), "SPARK_API_SECRET", "Spark")?;

        let mut provider = SparkProvider::new(transport, api_key, api_secret, config.model.clone())
            .with_system_prompt(config.system_prompt.clone())
            .with_stream_timeout(Duration::from_secs(settings.http.stream_timeout_secs));
        if let Some(base_url) = &config.base_url {
            provider = provider.with_base_url(base_url.clone());
        }
        Ok(Arc::new(provider))
    }
}

fn require<'a>(value: Option<&'a str>, env_var: &str, vendor: &str) -> Result<&'a str> {
    value.filter(|v| !v.is_empty()).ok_or_else(|| {
        NokodeError::Config(format!(
            "No {} API key found. Set {} or configure it in the settings file.",
            vendor, env_var
        ))
    })
}
