// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::de::DeserializeOwned;

use crate::error::{ApiError, NokodeError, Result};

/// Parse numeric Retry-After header (seconds).
pub(crate) fn parse_retry_after_seconds(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
}

/// Decode a vendor body, reporting malformed JSON with the raw text attached.
pub(crate) fn parse_body<T: DeserializeOwned>(provider: &str, body: &str) -> Result<T> {
    serde_json::from_str(body).map_err(|e| {
        invalid_response(format!(
            "{} returned malformed JSON ({}): {}",
            provider,
            e,
            truncate(body, 2000)
        ))
    })
}

/// Construct an invalid-response error.
pub(crate) fn invalid_response(message: impl Into<String>) -> NokodeError {
    NokodeError::Api(ApiError::InvalidResponse(message.into()))
}

/// Parse a tool-call argument string; malformed or non-object arguments become `{}`.
pub(crate) fn parse_arguments(raw: &str) -> serde_json::Value {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(value) if value.is_object() => value,
        Ok(_) | Err(_) => {
            if !raw.trim().is_empty() {
                tracing::warn!(arguments = raw, "malformed tool arguments, using empty object");
            }
            serde_json::json!({})
        }
    }
}

/// Id for a tool call the vendor sent without one. Unique across turns so a
/// later round never collides with an earlier one.
pub(crate) fn synthetic_call_id(index: usize) -> String {
    format!("call_{}_{}", uuid::Uuid::new_v4().simple(), index)
}

/// Header list entry
pub(crate) fn header(name: &str, value: impl Into<String>) -> (String, String) {
    (name.to_string(), value.into())
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let head: String = text.chars().take(max_chars).collect();
        format!("{}... (truncated)", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_parse_retry_after_seconds() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_retry_after_seconds(&headers), None);

        headers.insert(RETRY_AFTER, HeaderValue::from_static("12"));
        assert_eq!(parse_retry_after_seconds(&headers), Some(12));

        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(parse_retry_after_seconds(&headers), None);
    }

    #[test]
    fn test_synthetic_call_ids_are_unique() {
        let first = synthetic_call_id(0);
        let second = synthetic_call_id(0);
        assert!(first.starts_with("call_"));
        assert!(first.ends_with("_0"));
        assert_ne!(first, second);
    }

    #[test]
    fn test_parse_arguments() {
        assert_eq!(parse_arguments(r#"{"query":"SELECT 1"}"#)["query"], "SELECT 1");
        assert_eq!(parse_arguments("{not json"), serde_json::json!({}));
        assert_eq!(parse_arguments(""), serde_json::json!({}));
        assert_eq!(parse_arguments("[1,2]"), serde_json::json!({}));
    }

    #[test]
    fn test_parse_body_reports_raw_text() {
        let err = parse_body::<serde_json::Value>("openai", "<html>bad gateway</html>").unwrap_err();
        let text = err.to_string();
        assert!(text.contains("openai"));
        assert!(text.contains("bad gateway"));
    }
}
