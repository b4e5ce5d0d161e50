// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Smoke test for the re-export facade: the whole loop is drivable through
//! `tether::` paths alone.

use serde_json::json;

use tether::{
    run_tool_loop, LoopOptions, Message, ScriptedAdapter, ToolCallInfo, ToolHandler, ToolOutcome,
    ToolSpec, Turn,
};

struct ListFiles;

#[async_trait::async_trait]
impl ToolHandler for ListFiles {
    async fn handle(&self, call: &ToolCallInfo) -> anyhow::Result<ToolOutcome> {
        assert_eq!(call.name, "shell");
        Ok(ToolOutcome::ok("src\nCargo.toml"))
    }

    fn available(&self) -> Vec<ToolSpec> {
        vec![ToolSpec {
            name: "shell".into(),
            description: "Run a command".into(),
            input_schema: json!({
                "type": "object",
                "properties": { "command": { "type": "array", "items": { "type": "string" } } },
                "required": ["command"],
            }),
        }]
    }
}

#[tokio::test]
async fn loop_is_drivable_through_the_facade() {
    let adapter =
        ScriptedAdapter::tool_then_text("c1", "shell", r#"{"command":["ls"]}"#, "Two entries.");
    let turn = Turn {
        model: "scripted".into(),
        messages: vec![Message::user("what is in this repo?")],
        ..Turn::default()
    };
    let result = run_tool_loop(&adapter, &turn, &ListFiles, &LoopOptions::default())
        .await
        .unwrap();
    assert_eq!(result.final_text, "Two entries.");
    assert_eq!(result.tool_calls.len(), 1);
    assert!(result.usage.is_some());
}

#[test]
fn prompt_and_schema_helpers_are_reachable() {
    let prompt = tether::prompt::build_system_prompt(&tether::prompt::PromptContext::default());
    assert!(!prompt.is_empty());

    let strict = tether::model::schema::normalize_to_strict(&json!({
        "type": "object",
        "properties": { "a": { "type": "string" } },
    }));
    assert_eq!(strict["additionalProperties"], json!(false));

    assert_eq!(tether::model::registry::family_for("claude-opus-4-6"), "anthropic");
}
