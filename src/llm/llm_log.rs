// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! JSON dumps of vendor traffic
//!
//! Every outbound request and every response body is written to
//! `{dir}/{provider}_{request|response}_{YYYYMMDD_HHMMSS.mmm}.json`.
//! Credential headers are redacted before anything touches disk. Failing to
//! write a dump never fails the request.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::config::LlmLogConfig;

/// Writes vendor request/response dumps
#[derive(Debug, Clone)]
pub struct LlmLogger {
    enabled: bool,
    dir: PathBuf,
}

impl LlmLogger {
    pub fn new(enabled: bool, dir: impl Into<PathBuf>) -> Self {
        Self {
            enabled,
            dir: dir.into(),
        }
    }

    pub fn from_config(config: &LlmLogConfig) -> Self {
        Self::new(config.enabled, config.dir.clone())
    }

    /// A logger that writes nothing
    pub fn disabled() -> Self {
        Self::new(false, PathBuf::new())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Dump an outbound request
    pub async fn log_request(
        &self,
        provider: &str,
        url: &str,
        headers: &[(String, String)],
        body: &Value,
    ) {
        tracing::debug!(provider, url, "sending vendor request");
        if !self.enabled {
            return;
        }

        let now = Utc::now();
        let entry = json!({
            "timestamp": now.to_rfc3339(),
            "provider": provider,
            "url": url,
            "headers": redact_headers(headers),
            "request": body,
        });
        self.write(provider, "request", now, &entry).await;
    }

    /// Dump a vendor response. The raw body is kept verbatim; a parsed copy is
    /// included when it is valid JSON.
    pub async fn log_response(&self, provider: &str, status: u16, raw_body: &str) {
        tracing::debug!(provider, status, bytes = raw_body.len(), "vendor response received");
        if !self.enabled {
            return;
        }

        let now = Utc::now();
        let parsed = serde_json::from_str::<Value>(raw_body).unwrap_or(Value::Null);
        let entry = json!({
            "timestamp": now.to_rfc3339(),
            "provider": provider,
            "status_code": status,
            "response": parsed,
            "raw_response": raw_body,
        });
        self.write(provider, "response", now, &entry).await;
    }

    fn file_path(&self, provider: &str, kind: &str, at: DateTime<Utc>) -> PathBuf {
        self.dir.join(format!(
            "{}_{}_{}.json",
            provider.to_lowercase(),
            kind,
            at.format("%Y%m%d_%H%M%S%.3f")
        ))
    }

    async fn write(&self, provider: &str, kind: &str, at: DateTime<Utc>, entry: &Value) {
        if let Err(e) = tokio::fs::create_dir_all(&self.dir).await {
            tracing::warn!(dir = %self.dir.display(), error = %e, "cannot create LLM log directory");
            return;
        }

        let content = match serde_json::to_string_pretty(entry) {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!(error = %e, "cannot serialize LLM log entry");
                return;
            }
        };

        let path = self.file_path(provider, kind, at);
        if let Err(e) = tokio::fs::write(&path, content).await {
            tracing::warn!(path = %path.display(), error = %e, "cannot write LLM log entry");
        }
    }
}

/// Mask a credential, keeping a short prefix and suffix for identification
pub fn redact_value(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() > 10 {
        let head: String = chars[..7].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", head, tail)
    } else {
        "***".to_string()
    }
}

fn is_credential_header(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    name.contains("authorization") || name.contains("api-key")
}

/// Headers as a JSON-ready map with credentials masked
pub fn redact_headers(headers: &[(String, String)]) -> BTreeMap<String, String> {
    headers
        .iter()
        .map(|(name, value)| {
            let value = if is_credential_header(name) {
                redact_value(value)
            } else {
                value.clone()
            };
            (name.clone(), value)
        })
        .collect()
}
