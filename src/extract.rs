// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Pick the HTTP response out of whatever the model produced
//!
//! In order of preference:
//! 1. the `webResponse` tool call
//! 2. final text that is a JSON object with a numeric `statusCode`,
//!    optionally wrapped in a markdown code fence
//! 3. final text that looks like an HTML document, served as `text/html`
//! 4. the configured fallback

use serde_json::Value;
use std::collections::BTreeMap;

use crate::config::FallbackConfig;
use crate::orchestrator::RunOutcome;
use crate::tools::builtin::parse_status;
use crate::tools::WebResponse;

/// Resolve the response for a finished run
pub fn extract(outcome: &RunOutcome, fallback: &FallbackConfig) -> WebResponse {
    if let Some(response) = &outcome.terminal {
        return response.clone();
    }

    if let Some(response) = from_text(&outcome.text) {
        tracing::debug!(status = response.status_code, "response recovered from model text");
        return response;
    }

    tracing::warn!(
        turns = outcome.turns,
        "model produced no usable response, using fallback"
    );
    fallback_response(fallback)
}

/// The configured default response
pub fn fallback_response(fallback: &FallbackConfig) -> WebResponse {
    WebResponse::new(
        fallback.status,
        fallback.content_type.clone(),
        fallback.body.clone(),
    )
}

/// Try the JSON and HTML fallbacks on free-form model text
pub fn from_text(text: &str) -> Option<WebResponse> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Some(response) = from_json(strip_code_fence(trimmed)) {
        return Some(response);
    }

    let lower = trimmed.to_ascii_lowercase();
    if lower.contains("<html") || lower.contains("<!doctype html") {
        return Some(WebResponse::new(200, "text/html", text));
    }

    None
}

fn from_json(text: &str) -> Option<WebResponse> {
    let value: Value = serde_json::from_str(text).ok()?;
    let object = value.as_object()?;
    let status_value = object.get("statusCode").filter(|v| v.is_number())?;
    let status = parse_status(Some(status_value)).ok()?;

    let body = match object.get("body") {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    };
    let content_type = object
        .get("contentType")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    let headers: BTreeMap<String, String> = object
        .get("headers")
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default();

    Some(WebResponse::new(status, content_type, body).with_headers(headers))
}

/// Strip a surrounding markdown code fence such as ```` ```json ... ``` ````
fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let Some(rest) = rest.strip_suffix("```") else {
        return text;
    };
    // Drop the info string (e.g. `json`) on the opening line, or glued to
    // the payload when the fence is on one line
    match rest.find('\n') {
        Some(newline) => rest[newline + 1..].trim(),
        None => rest
            .trim_start_matches(|c: char| c.is_ascii_alphanumeric() || c == '-' || c == '_')
            .trim(),
    }
}
