// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Prompt templating
//!
//! The prompt file is re-read on every request so it can be edited while the
//! server runs. Placeholders look like `{{METHOD}}`; unknown placeholders are
//! left as they are.

use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use crate::tools::{Database, MemoryStore};

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{([A-Z][A-Z0-9_]*)\}\}").unwrap());

/// Used when the prompt file is missing
pub const FALLBACK_TEMPLATE: &str = r#"You are a web server. Generate an appropriate response for this HTTP request using the webResponse tool.

Request Information:
Method: {{METHOD}}
Path: {{PATH}}
URL: {{URL}}
Query Parameters: {{QUERY}}
Headers: {{HEADERS}}
Body: {{BODY}}
Client IP: {{IP}}
Timestamp: {{TIMESTAMP}}

Use the webResponse tool to generate an appropriate response."#;

/// What the prompt gets to know about the inbound request
#[derive(Debug, Clone, PartialEq)]
pub struct RequestContext {
    pub method: String,
    pub path: String,
    pub url: String,
    /// Query parameters, name to list of values
    pub query: Value,
    /// Request headers, name to list of values
    pub headers: Value,
    /// Parsed body (JSON, form map, string or null)
    pub body: Value,
    pub ip: String,
    /// RFC 3339
    pub timestamp: String,
}

impl RequestContext {
    /// Template variables, `MEMORY` excluded
    pub fn vars(&self) -> HashMap<&'static str, String> {
        HashMap::from([
            ("METHOD", self.method.clone()),
            ("PATH", self.path.clone()),
            ("URL", self.url.clone()),
            ("QUERY", self.query.to_string()),
            ("HEADERS", self.headers.to_string()),
            ("BODY", self.body.to_string()),
            ("IP", self.ip.clone()),
            ("TIMESTAMP", self.timestamp.clone()),
        ])
    }
}

/// Substitute `{{KEY}}` placeholders in a single pass
pub fn render(template: &str, vars: &HashMap<&str, String>) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &regex::Captures<'_>| match vars.get(&caps[1]) {
            Some(value) => value.clone(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Read the template, falling back to the built-in one
pub async fn load_template(path: &Path) -> String {
    match tokio::fs::read_to_string(path).await {
        Ok(template) => template,
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "prompt file unavailable, using built-in template");
            FALLBACK_TEMPLATE.to_string()
        }
    }
}

/// Parse a request body for the `{{BODY}}` variable.
///
/// Empty bodies are `null`. JSON is kept as JSON, form posts become an object
/// (repeated keys keep the last value) and anything else is passed as text.
pub fn parse_body(bytes: &[u8], content_type: Option<&str>) -> Value {
    if bytes.is_empty() {
        return Value::Null;
    }
    if let Ok(value) = serde_json::from_slice::<Value>(bytes) {
        return value;
    }

    let is_form = content_type
        .map(|ct| ct.to_ascii_lowercase().starts_with("application/x-www-form-urlencoded"))
        .unwrap_or(false);
    if is_form {
        let form: Map<String, Value> = url::form_urlencoded::parse(bytes)
            .map(|(k, v)| (k.into_owned(), Value::String(v.into_owned())))
            .collect();
        return Value::Object(form);
    }

    Value::String(String::from_utf8_lossy(bytes).into_owned())
}

/// Group `(name, value)` pairs into `{name: [values...]}`
pub fn multi_map<I, K, V>(pairs: I) -> Value
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    let mut map = Map::new();
    for (name, value) in pairs {
        let entry = map
            .entry(name.into())
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(values) = entry {
            values.push(Value::String(value.into()));
        }
    }
    Value::Object(map)
}

/// Builds the full prompt for a request
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    template_path: PathBuf,
    memory: Arc<MemoryStore>,
    database: Arc<Database>,
}

impl PromptBuilder {
    pub fn new(
        template_path: impl Into<PathBuf>,
        memory: Arc<MemoryStore>,
        database: Arc<Database>,
    ) -> Self {
        Self {
            template_path: template_path.into(),
            memory,
            database,
        }
    }

    /// Memory notes, then the schema, then the data summary
    pub async fn memory_section(&self) -> String {
        let mut section = self.memory.load().await;
        section.push_str(&self.database.schema());
        section.push_str(&self.database.context().await);
        section
    }

    pub async fn build(&self, request: &RequestContext) -> String {
        let template = load_template(&self.template_path).await;
        let mut vars = request.vars();
        vars.insert("MEMORY", self.memory_section().await);
        render(&template, &vars)
    }
}
