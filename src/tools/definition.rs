// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Tool definition types
//!
//! These types are used to define tools for the LLM.

use serde_json::{json, Value};

use crate::llm::provider::ToolInputSchema;

/// Helper to create a tool input schema
pub struct SchemaBuilder {
    properties: serde_json::Map<String, Value>,
    required: Vec<String>,
}

impl SchemaBuilder {
    /// Create a new schema builder
    pub fn new() -> Self {
        Self {
            properties: serde_json::Map::new(),
            required: vec![],
        }
    }

    fn property(mut self, name: &str, schema: Value, required: bool) -> Self {
        self.properties.insert(name.to_string(), schema);
        if required {
            self.required.push(name.to_string());
        }
        self
    }

    /// Add a string property
    pub fn string(self, name: &str, description: &str, required: bool) -> Self {
        self.property(
            name,
            json!({
                "type": "string",
                "description": description
            }),
            required,
        )
    }

    /// Add a string property restricted to a fixed set of values
    pub fn string_enum(
        self,
        name: &str,
        description: &str,
        values: &[&str],
        default: Option<&str>,
        required: bool,
    ) -> Self {
        let mut schema = json!({
            "type": "string",
            "enum": values,
            "description": description
        });
        if let Some(default) = default {
            schema["default"] = json!(default);
        }
        self.property(name, schema, required)
    }

    /// Add a number property
    pub fn number(self, name: &str, description: &str, required: bool) -> Self {
        self.property(
            name,
            json!({
                "type": "number",
                "description": description
            }),
            required,
        )
    }

    /// Add an array property whose items are scalars of any JSON type
    pub fn array(self, name: &str, description: &str, required: bool) -> Self {
        self.property(
            name,
            json!({
                "type": "array",
                "description": description,
                "items": {
                    "type": ["string", "number", "boolean", "null"]
                }
            }),
            required,
        )
    }

    /// Add an object property mapping names to strings
    pub fn string_map(self, name: &str, description: &str, required: bool) -> Self {
        self.property(
            name,
            json!({
                "type": "object",
                "description": description,
                "additionalProperties": { "type": "string" }
            }),
            required,
        )
    }

    /// Build the schema
    pub fn build(self) -> ToolInputSchema {
        ToolInputSchema {
            schema_type: "object".to_string(),
            properties: Value::Object(self.properties),
            required: self.required,
        }
    }
}

impl Default for SchemaBuilder {
    fn default() -> Self {
        Self::new()
    }
}
