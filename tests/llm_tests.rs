// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use std::time::Duration;

use proptest::prelude::*;
use serde_json::json;

use nokode::config::ResilienceConfig;
use nokode::error::RetryClass;
use nokode::llm::message::{ContentBlock, Conversation, Message, MessageContent, Role};
use nokode::llm::provider::{CompletionRequest, ToolDefinition, ToolInputSchema};
use nokode::llm::providers::openai::dialect_tools;
use nokode::llm::retry::RetryPolicy;

#[test]
fn test_message_user_creation() {
    let message = Message::user("Hello, world!");

    assert_eq!(message.role, Role::User);
    match &message.content {
        MessageContent::Text(text) => assert_eq!(text, "Hello, world!"),
        _ => panic!("Expected text content"),
    }
}

#[test]
fn test_conversation_seeded_with_prompt() {
    let conversation = Conversation::with_prompt("GET /");
    assert_eq!(conversation.len(), 1);
    assert_eq!(conversation.messages()[0].role, Role::User);
    assert_eq!(conversation.messages()[0].text().as_deref(), Some("GET /"));
}

#[test]
fn test_conversation_tool_results_not_duplicated() {
    let mut conversation = Conversation::with_prompt("GET /");
    conversation.push(Message::assistant_blocks(vec![ContentBlock::ToolUse {
        id: "toolu_1".to_string(),
        name: "database".to_string(),
        input: json!({"query": "SELECT 1"}),
    }]));

    let result = || {
        vec![ContentBlock::ToolResult {
            tool_use_id: "toolu_1".to_string(),
            content: "{}".to_string(),
            is_error: None,
        }]
    };
    assert_eq!(conversation.push_tool_results(result()), 1);
    assert_eq!(conversation.push_tool_results(result()), 0);
    assert_eq!(conversation.len(), 3);
    assert!(conversation.answered_tool_ids().contains("toolu_1"));
    assert!(conversation.last_assistant().unwrap().has_tool_use());
}

#[test]
fn test_conversation_next_round_may_reuse_call_ids() {
    let call = |query: &str| {
        Message::assistant_blocks(vec![ContentBlock::ToolUse {
            id: "call_0".to_string(),
            name: "database".to_string(),
            input: json!({ "query": query }),
        }])
    };
    let result = |content: &str| {
        vec![ContentBlock::ToolResult {
            tool_use_id: "call_0".to_string(),
            content: content.to_string(),
            is_error: None,
        }]
    };

    let mut conversation = Conversation::with_prompt("GET /");
    conversation.push(call("SELECT 1 AS a"));
    assert_eq!(conversation.push_tool_results(result(r#"{"rows":[{"a":1}]}"#)), 1);
    conversation.push(call("SELECT 2 AS b"));
    assert_eq!(conversation.push_tool_results(result(r#"{"rows":[{"b":2}]}"#)), 1);

    let last = conversation.last().unwrap();
    assert_eq!(conversation.len(), 5);
    assert_eq!(last.role, Role::User);
    assert!(matches!(
        last.tool_result_blocks()[0],
        ContentBlock::ToolResult { content, .. } if content.contains(r#""b":2"#)
    ));
}

#[test]
fn test_tool_result_error_flag() {
    let message = Message::tool_result("toolu_2", "boom", true);
    match &message.tool_result_blocks()[0] {
        ContentBlock::ToolResult { is_error, .. } => assert_eq!(*is_error, Some(true)),
        _ => panic!("Expected tool result"),
    }
}

#[test]
fn test_completion_request_defaults() {
    let request = CompletionRequest::new("claude-3-haiku-20240307", vec![Message::user("Hi")]);
    assert!(request.system.is_none());
    assert!(request.tools.is_empty());
    assert_eq!(request.max_tokens, 8192);
}

#[test]
fn test_dialect_tools_wraps_functions() {
    let tools = vec![ToolDefinition {
        name: "database".to_string(),
        description: "Run SQL".to_string(),
        input_schema: ToolInputSchema {
            schema_type: "object".to_string(),
            properties: json!({"query": {"type": "string"}}),
            required: vec!["query".to_string()],
        },
    }];

    let value = dialect_tools(&tools);
    assert_eq!(value[0]["type"], "function");
    assert_eq!(value[0]["function"]["name"], "database");
    assert_eq!(value[0]["function"]["parameters"]["required"][0], "query");
}

#[test]
fn test_default_rate_limit_schedule() {
    let policy = RetryPolicy::from(&ResilienceConfig::default());
    let schedule = policy.schedule(RetryClass::RateLimited { retry_after: None }, 3);
    assert_eq!(
        schedule,
        vec![
            Duration::from_secs(30),
            Duration::from_secs(90),
            Duration::from_secs(270)
        ]
    );
    assert!(policy.schedule(RetryClass::Permanent, 3).is_empty());
}

#[test]
fn test_retry_after_hint_extends_delay() {
    let policy = RetryPolicy {
        rate_limit_base_delay: Duration::from_millis(100),
        ..RetryPolicy::default()
    };
    let delay = policy.delay_for(
        1,
        RetryClass::RateLimited {
            retry_after: Some(Duration::from_secs(2)),
        },
    );
    assert_eq!(delay, Duration::from_secs(2));
}

proptest! {
    #[test]
    fn prop_generic_schedule_is_monotonic_and_capped(
        base_ms in 1u64..2_000,
        cap_ms in 1u64..60_000,
        retries in 0u32..12,
    ) {
        let policy = RetryPolicy {
            max_retries: retries,
            base_delay: Duration::from_millis(base_ms),
            max_delay: Duration::from_millis(cap_ms),
            jitter: 0.0,
            ..RetryPolicy::default()
        };
        let schedule = policy.schedule(RetryClass::Server, retries);
        prop_assert_eq!(schedule.len() as u32, retries);
        for pair in schedule.windows(2) {
            prop_assert!(pair[0] <= pair[1]);
        }
        for delay in &schedule {
            prop_assert!(*delay <= Duration::from_millis(cap_ms));
        }
    }

    #[test]
    fn prop_rate_limit_schedule_grows_by_multiplier(
        base_ms in 1u64..1_000,
        multiplier in 1u32..5,
        retries in 1u32..6,
    ) {
        let policy = RetryPolicy {
            max_retries: retries,
            rate_limit_base_delay: Duration::from_millis(base_ms),
            rate_limit_multiplier: multiplier,
            jitter: 0.0,
            ..RetryPolicy::default()
        };
        let schedule = policy.schedule(RetryClass::RateLimited { retry_after: None }, retries);
        prop_assert_eq!(schedule[0], Duration::from_millis(base_ms));
        for pair in schedule.windows(2) {
            prop_assert_eq!(pair[1], pair[0] * multiplier);
        }
    }

    #[test]
    fn prop_jitter_stays_within_bounds(attempt in 1u32..5, jitter in 0.0f64..1.0) {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(16_000),
            jitter,
            ..RetryPolicy::default()
        };
        let nominal = policy.generic_delay(attempt).as_millis() as f64;
        let actual = policy.delay_for(attempt, RetryClass::Network).as_millis() as f64;
        prop_assert!(actual >= nominal * (1.0 - jitter) - 1.0);
        prop_assert!(actual <= nominal * (1.0 + jitter) + 1.0);
    }
}
