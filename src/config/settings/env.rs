// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use std::time::Duration;

use super::{ProviderKind, Settings};

impl Settings {
    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_env_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup; empty values count as unset.
    pub fn apply_env_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(port) = get("PORT") {
            match port.trim().parse::<u16>() {
                Ok(port) => self.server.port = port,
                Err(_) => tracing::warn!(value = %port, "ignoring invalid PORT"),
            }
        }
        if let Some(host) = get("HOST") {
            self.server.host = host;
        }
        if let Some(provider) = get("LLM_PROVIDER") {
            match provider.parse::<ProviderKind>() {
                Ok(kind) => self.provider = kind,
                Err(e) => tracing::warn!(error = %e, "ignoring LLM_PROVIDER"),
            }
        }

        let providers = &mut self.providers;
        set_opt(&mut providers.anthropic.api_key, get("ANTHROPIC_API_KEY"));
        set_opt(&mut providers.anthropic.model, get("ANTHROPIC_MODEL"));
        set_opt(&mut providers.openai.api_key, get("OPENAI_API_KEY"));
        set_opt(&mut providers.openai.model, get("OPENAI_MODEL"));
        set_opt(
            &mut providers.qwen.api_key,
            get("QWEN_API_KEY").or_else(|| get("DASHSCOPE_API_KEY")),
        );
        set_opt(&mut providers.qwen.model, get("QWEN_MODEL"));

        set_opt(&mut providers.baidu.api_token, get("BAIDU_API_TOKEN"));
        set_opt(&mut providers.baidu.api_key, get("BAIDU_API_KEY"));
        set_opt(&mut providers.baidu.secret_key, get("BAIDU_SECRET_KEY"));
        set_opt(&mut providers.baidu.app_id, get("BAIDU_APP_ID"));
        if let Some(model) = get("BAIDU_MODEL") {
            providers.baidu.model = model;
        }

        set_opt(&mut providers.spark.api_key, get("SPARK_API_KEY"));
        set_opt(&mut providers.spark.api_secret, get("SPARK_API_SECRET"));
        set_opt(&mut providers.spark.app_id, get("SPARK_APP_ID"));
        if let Some(model) = get("SPARK_MODEL") {
            providers.spark.model = model;
        }

        if let Some(interval) = get("API_RATE_LIMIT_INTERVAL") {
            match parse_duration(&interval) {
                Some(duration) => self.rate_limit.min_interval_ms = duration.as_millis() as u64,
                None => tracing::warn!(value = %interval, "ignoring invalid API_RATE_LIMIT_INTERVAL"),
            }
        }
        if let Some(turns) = get("MAX_TOOL_TURNS") {
            match turns.trim().parse::<u32>() {
                Ok(turns) => self.orchestrator.max_turns = turns,
                Err(_) => tracing::warn!(value = %turns, "ignoring invalid MAX_TOOL_TURNS"),
            }
        }
    }
}

fn set_opt(slot: &mut Option<String>, value: Option<String>) {
    if value.is_some() {
        *slot = value;
    }
}

/// Parse durations such as `3s`, `500ms`, `1m30s` or `2h`.
pub fn parse_duration(input: &str) -> Option<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    let mut total = Duration::ZERO;
    let mut rest = input;
    while !rest.is_empty() {
        let digits_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if digits_end == 0 {
            return None;
        }
        let value: f64 = rest[..digits_end].parse().ok()?;
        rest = &rest[digits_end..];

        let unit_end = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let unit = &rest[..unit_end];
        rest = &rest[unit_end..];

        let seconds = match unit {
            "ms" => value / 1000.0,
            "s" => value,
            "m" => value * 60.0,
            "h" => value * 3600.0,
            _ => return None,
        };
        total += Duration::from_secs_f64(seconds);
    }

    Some(total)
}
