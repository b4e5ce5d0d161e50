// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Codex/Responses adapter.
//!
//! Speaks the Responses SSE wire format: the request carries `instructions`
//! plus an `input` item list, and the stream announces tool calls as output
//! items whose argument fragments arrive keyed by item id.  A call is
//! finalized by *two* events (`function_call_arguments.done` and
//! `output_item.done`), either of which may carry a full argument snapshot —
//! the per-stream [`ToolCallCollector`] turns the pair into exactly one
//! `ToolCall` emission.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::{debug, warn};

use tether_auth::TokenSource;
use tether_prompt::{build_system_prompt, AgentsBlock, EnvironmentSummary, PromptContext};

use crate::{
    arguments::normalize_arguments,
    event::{EventKind, PlanStepStatus, TurnEvent, Usage},
    http::{send_with_retry, RetryPolicy},
    provider::{Adapter, EventStream},
    registry,
    sse::{self, StreamEvent, ToolCallCollector},
    types::{CollaborationMode, Message, Role, ToolSpec, Turn},
    schema::normalize_to_strict,
};

pub(crate) const USER_AGENT: &str = concat!("tether/", env!("CARGO_PKG_VERSION"));
const DEFAULT_BASE_URL: &str = "https://chatgpt.com/backend-api/codex";
const DEFAULT_ORIGINATOR: &str = "codex_cli_rs";

/// Grammar for the built-in `apply_patch` tool (Lark syntax).
const APPLY_PATCH_GRAMMAR: &str = r#"start: begin_patch hunk+ end_patch
begin_patch: "*** Begin Patch" LF
end_patch: "*** End Patch" LF?

hunk: add_hunk | delete_hunk | update_hunk
add_hunk: "*** Add File: " filename LF add_line+
delete_hunk: "*** Delete File: " filename LF
update_hunk: "*** Update File: " filename LF change_move? change?

filename: /(.+)/
add_line: "+" /(.*)/ LF -> line

change_move: "*** Move to: " filename LF
change: (change_context | change_line)+ eof_line?
change_context: ("@@" | "@@ " /(.+)/) LF
change_line: ("+" | "-" | " ") /(.*)/ LF
eof_line: "*** End of File" LF

%import common.LF
"#;

pub struct ResponsesAdapter {
    base_url: String,
    originator: String,
    session_id: Option<String>,
    auth: Arc<dyn TokenSource>,
    retry: RetryPolicy,
    client: reqwest::Client,
}

impl ResponsesAdapter {
    pub fn new(auth: Arc<dyn TokenSource>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.into(),
            originator: DEFAULT_ORIGINATOR.into(),
            session_id: None,
            auth,
            retry: RetryPolicy::default(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_originator(mut self, originator: impl Into<String>) -> Self {
        self.originator = originator.into();
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[async_trait]
impl Adapter for ResponsesAdapter {
    fn name(&self) -> &str {
        "responses"
    }

    async fn stream_turn(&self, turn: &Turn) -> anyhow::Result<EventStream> {
        let body = build_request_body(turn);
        let url = format!("{}/responses", self.base_url.trim_end_matches('/'));
        debug!(
            model = %body["model"].as_str().unwrap_or_default(),
            input_items = body["input"].as_array().map(Vec::len).unwrap_or(0),
            "sending responses request"
        );

        let account_id = self.auth.account_id();
        let resp = send_with_retry(&self.client, Some(self.auth.as_ref()), &self.retry, |token| {
            let mut rb = self
                .client
                .post(&url)
                .json(&body)
                .header("originator", &self.originator)
                .header("User-Agent", USER_AGENT);
            if let Some(tok) = token {
                rb = rb.bearer_auth(tok);
            }
            if let Some(sid) = &self.session_id {
                rb = rb.header("session_id", sid);
            }
            if let Some(acct) = &account_id {
                rb = rb.header("chatgpt-account-id", acct);
            }
            rb
        })
        .await
        .context("responses request failed")?;

        Ok(translate_byte_stream(resp.bytes_stream()))
    }
}

/// Run a Responses SSE byte stream through the translation state machine.
/// Shared with the chat adapter, which synthesizes the same frame shapes.
pub(crate) fn translate_byte_stream<S, B, E>(byte_stream: S) -> EventStream
where
    S: futures::Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    let translated = byte_stream
        .scan(
            (String::new(), ResponsesTranslator::new(), false, 0u32),
            |(buf, translator, failed, malformed), chunk| {
                let items: Vec<anyhow::Result<TurnEvent>> = if *failed {
                    Vec::new()
                } else {
                    match chunk {
                        Ok(bytes) => {
                            buf.push_str(&String::from_utf8_lossy(bytes.as_ref()));
                            let mut events = Vec::new();
                            for payload in sse::drain_data_lines(buf) {
                                match StreamEvent::decode(&payload) {
                                    Some(frame) => {
                                        *malformed = 0;
                                        for kind in translator.on_frame(&frame) {
                                            events.push(Ok(TurnEvent::now(kind)));
                                        }
                                    }
                                    None => {
                                        *malformed += 1;
                                        warn!(
                                            consecutive = *malformed,
                                            "skipping malformed SSE frame"
                                        );
                                        if *malformed >= sse::MAX_CONSECUTIVE_MALFORMED_FRAMES {
                                            *failed = true;
                                            events.push(Err(anyhow::anyhow!(
                                                "stream ended after {} consecutive malformed SSE frames",
                                                *malformed
                                            )));
                                            break;
                                        }
                                    }
                                }
                            }
                            events
                        }
                        Err(e) => {
                            *failed = true;
                            vec![Err(anyhow::anyhow!(e))]
                        }
                    }
                };
                std::future::ready(Some(items))
            },
        )
        .flat_map(futures::stream::iter)
        .chain(futures::stream::once(std::future::ready(Ok(
            TurnEvent::now(EventKind::Done),
        ))));
    Box::pin(translated)
}

// ─── Request construction ─────────────────────────────────────────────────────

/// Build the model-facing system string for a turn.
pub(crate) fn compose_instructions(turn: &Turn) -> String {
    let env = EnvironmentSummary {
        working_directory: &turn.environment.working_directory,
        shell: &turn.environment.shell,
        platform: &turn.environment.platform,
        os: &turn.environment.os,
        sandbox: &turn.environment.sandbox,
        attributes: Some(&turn.environment.attributes),
    };
    let ctx = PromptContext {
        sandbox_policy: &turn.permissions.sandbox_policy,
        approval_mode: turn.permissions.approval.as_str(),
        collaboration_mode: match turn.user_context.collaboration {
            CollaborationMode::Default => "",
            CollaborationMode::Plan => "plan",
        },
        environment: Some(env),
        agents_doc: turn.user_context.agents_doc.as_ref().map(|d| AgentsBlock {
            directory: &d.directory,
            content: &d.content,
        }),
        secondary_doc: turn.user_context.secondary_doc.as_deref(),
        instructions: turn.instructions.as_deref(),
    };
    build_system_prompt(&ctx)
}

/// The full Responses request body for a turn.
pub(crate) fn build_request_body(turn: &Turn) -> Value {
    let mut body = json!({
        "model": registry::RESPONSES_RULES.expand_alias(&turn.model),
        "instructions": compose_instructions(turn),
        "input": build_input_items(&turn.messages),
        "tools": build_tools(&turn.tools),
        "tool_choice": "auto",
        "store": false,
        "stream": true,
    });
    if let Some(r) = &turn.reasoning {
        let mut reasoning = json!({ "effort": r.effort.as_str() });
        if r.summaries {
            reasoning["summary"] = json!("auto");
        }
        body["reasoning"] = reasoning;
    }
    if let Some(max) = turn.max_output_tokens {
        body["max_output_tokens"] = json!(max);
    }
    body
}

/// Translate harness messages into Responses input items.
pub(crate) fn build_input_items(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|m| match (m.role, m.tool_id.as_deref()) {
            (Role::User, _) => json!({
                "type": "message",
                "role": "user",
                "content": [{ "type": "input_text", "text": m.content }],
            }),
            (Role::Assistant, Some(call_id)) => json!({
                "type": "function_call",
                "call_id": call_id,
                "name": m.name.as_deref().unwrap_or_default(),
                "arguments": m.content,
            }),
            (Role::Assistant, None) => json!({
                "type": "message",
                "role": "assistant",
                "content": [{ "type": "output_text", "text": m.content }],
            }),
            (Role::Tool, call_id) => json!({
                "type": "function_call_output",
                "call_id": call_id.unwrap_or_default(),
                "output": m.content,
            }),
        })
        .collect()
}

/// Coerce a caller tool schema into a strict object schema.
fn strict_tool_schema(schema: &Value) -> Value {
    let mut base = if schema.is_object() {
        schema.clone()
    } else {
        json!({})
    };
    if let Some(obj) = base.as_object_mut() {
        if obj.get("type").is_none()
            && !obj.contains_key("properties")
            && !obj.contains_key("required")
        {
            obj.insert("type".into(), json!("object"));
            obj.insert("properties".into(), json!({}));
        }
    }
    normalize_to_strict(&base)
}

fn build_tools(specs: &[ToolSpec]) -> Vec<Value> {
    if specs.is_empty() {
        return builtin_tools();
    }
    specs
        .iter()
        .map(|t| {
            json!({
                "type": "function",
                "name": t.name,
                "description": t.description,
                "strict": true,
                "parameters": strict_tool_schema(&t.input_schema),
            })
        })
        .collect()
}

/// The fixed built-in tool set sent when the caller supplies no tools.
fn builtin_tools() -> Vec<Value> {
    vec![
        json!({
            "type": "custom",
            "name": "apply_patch",
            "description": "Edit files by applying a patch in the envelope format.",
            "format": {
                "type": "grammar",
                "syntax": "lark",
                "definition": APPLY_PATCH_GRAMMAR,
            },
        }),
        json!({
            "type": "function",
            "name": "update_plan",
            "description": "Record or revise the current task plan.",
            "parameters": {
                "type": "object",
                "properties": {
                    "explanation": { "type": "string" },
                    "plan": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "step": { "type": "string" },
                                "status": {
                                    "type": "string",
                                    "enum": ["pending", "in_progress", "completed"],
                                },
                            },
                            "required": ["step", "status"],
                        },
                    },
                },
                "required": ["plan"],
            },
        }),
        json!({
            "type": "function",
            "name": "shell",
            "description": "Run a command and return its output.",
            "parameters": {
                "type": "object",
                "properties": {
                    "command": { "type": "array", "items": { "type": "string" } },
                    "workdir": { "type": "string" },
                    "timeout_ms": { "type": "number" },
                },
                "required": ["command"],
            },
        }),
    ]
}

// ─── Streaming state machine ──────────────────────────────────────────────────

/// Stateful single-threaded reducer over decoded Responses frames.
pub(crate) struct ResponsesTranslator {
    collector: ToolCallCollector,
}

impl ResponsesTranslator {
    pub(crate) fn new() -> Self {
        Self {
            collector: ToolCallCollector::new(),
        }
    }

    pub(crate) fn on_frame(&mut self, frame: &StreamEvent) -> Vec<EventKind> {
        let data = &frame.data;
        match frame.kind.as_str() {
            "response.output_text.delta" => {
                let delta = data["delta"].as_str().unwrap_or_default();
                if delta.is_empty() {
                    vec![]
                } else {
                    vec![EventKind::TextDelta {
                        delta: delta.to_string(),
                        complete: false,
                    }]
                }
            }
            "response.output_text.done" => {
                let text = data["text"].as_str().unwrap_or_default();
                if text.is_empty() {
                    vec![]
                } else {
                    vec![EventKind::TextDelta {
                        delta: text.to_string(),
                        complete: true,
                    }]
                }
            }
            "response.reasoning_text.delta" | "response.reasoning_summary_text.delta" => {
                let delta = data["delta"].as_str().unwrap_or_default();
                if delta.is_empty() {
                    vec![]
                } else {
                    vec![EventKind::ThinkingDelta {
                        delta: delta.to_string(),
                        complete: false,
                        summary: frame.kind.contains("summary"),
                    }]
                }
            }
            "response.output_item.added" => {
                let item = &data["item"];
                if item["type"].as_str() == Some("function_call") {
                    let call_id = item["call_id"].as_str().unwrap_or_default();
                    if !call_id.is_empty() {
                        self.collector.begin_call(
                            call_id,
                            item["id"].as_str(),
                            item["name"].as_str().unwrap_or_default(),
                            item["arguments"].as_str().unwrap_or_default(),
                        );
                    }
                }
                vec![]
            }
            "response.function_call_arguments.delta" => {
                self.collector.append_arguments(
                    data["call_id"].as_str(),
                    data["item_id"].as_str(),
                    data["delta"].as_str().unwrap_or_default(),
                );
                vec![]
            }
            "response.function_call_arguments.done" => self.finish_call(
                data["call_id"].as_str(),
                data["item_id"].as_str(),
                data["name"].as_str(),
                data["arguments"].as_str(),
            ),
            "response.output_item.done" => {
                let item = &data["item"];
                if item["type"].as_str() == Some("function_call") {
                    self.finish_call(
                        item["call_id"].as_str(),
                        item["id"].as_str(),
                        item["name"].as_str(),
                        item["arguments"].as_str(),
                    )
                } else {
                    vec![]
                }
            }
            "response.completed" | "response.done" => {
                let usage = &data["response"]["usage"];
                if usage.is_object() {
                    vec![EventKind::Usage(Usage {
                        input_tokens: usage["input_tokens"].as_u64().unwrap_or(0) as u32,
                        output_tokens: usage["output_tokens"].as_u64().unwrap_or(0) as u32,
                        total_tokens: usage["total_tokens"].as_u64(),
                    })]
                } else {
                    vec![]
                }
            }
            "error" => {
                let message = data["message"]
                    .as_str()
                    .filter(|m| !m.is_empty())
                    .unwrap_or("unknown error");
                vec![EventKind::Error {
                    code: data["code"].as_str().map(str::to_string),
                    message: message.to_string(),
                    retryable: false,
                }]
            }
            // Unknown SSE types are ignored by design.
            _ => vec![],
        }
    }

    /// Handle either of the two completion events for a call.  The first one
    /// with a usable name emits; the collector suppresses the second.
    fn finish_call(
        &mut self,
        call_id: Option<&str>,
        item_id: Option<&str>,
        event_name: Option<&str>,
        snapshot: Option<&str>,
    ) -> Vec<EventKind> {
        let Some(call_id) = self.collector.resolve_call_id(call_id, item_id) else {
            warn!("tool-call completion without resolvable call id; skipping");
            return vec![];
        };
        let name = event_name
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .or_else(|| self.collector.name_for(&call_id).map(str::to_string));
        let Some(name) = name else {
            // The paired completion event may still carry the name.
            warn!(call_id = %call_id, "tool-call completion without name; skipping event");
            return vec![];
        };
        let arguments = normalize_arguments(&self.collector.final_arguments(&call_id, snapshot));
        if !self.collector.mark_emitted(&call_id) {
            return vec![];
        }
        if name == "update_plan" {
            expand_update_plan(&call_id, &arguments)
        } else {
            vec![EventKind::ToolCall {
                call_id,
                name,
                arguments,
            }]
        }
    }
}

/// Expand an `update_plan` call into one `PlanUpdate` per step.  Arguments
/// that do not parse into a step list fall back to a plain `ToolCall`.
fn expand_update_plan(call_id: &str, arguments: &str) -> Vec<EventKind> {
    let fallback = || {
        vec![EventKind::ToolCall {
            call_id: call_id.to_string(),
            name: "update_plan".to_string(),
            arguments: arguments.to_string(),
        }]
    };
    let Ok(parsed) = serde_json::from_str::<Value>(arguments) else {
        return fallback();
    };
    let steps = parsed["steps"]
        .as_array()
        .or_else(|| parsed["plan"].as_array());
    let Some(steps) = steps.filter(|s| !s.is_empty()) else {
        return fallback();
    };

    let mut events = Vec::with_capacity(steps.len());
    for (index, step) in steps.iter().enumerate() {
        let title = step["title"]
            .as_str()
            .or_else(|| step["step"].as_str())
            .unwrap_or_default();
        events.push(EventKind::PlanUpdate {
            step: index,
            title: title.to_string(),
            status: PlanStepStatus::parse(step["status"].as_str().unwrap_or_default()),
        });
    }
    events
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(json: Value) -> StreamEvent {
        let kind = json["type"].as_str().unwrap_or_default().to_string();
        StreamEvent { kind, data: json }
    }

    fn turn_with_messages(messages: Vec<Message>) -> Turn {
        Turn {
            model: "gpt-5".into(),
            messages,
            ..Turn::default()
        }
    }

    // ── Input item translation ────────────────────────────────────────────────

    #[test]
    fn user_message_becomes_input_text_item() {
        let items = build_input_items(&[Message::user("hello")]);
        assert_eq!(items[0]["type"], "message");
        assert_eq!(items[0]["role"], "user");
        assert_eq!(items[0]["content"][0]["type"], "input_text");
        assert_eq!(items[0]["content"][0]["text"], "hello");
    }

    #[test]
    fn assistant_text_becomes_output_text_item() {
        let items = build_input_items(&[Message::assistant("done")]);
        assert_eq!(items[0]["type"], "message");
        assert_eq!(items[0]["role"], "assistant");
        assert_eq!(items[0]["content"][0]["type"], "output_text");
    }

    #[test]
    fn assistant_tool_call_becomes_function_call_item() {
        let items =
            build_input_items(&[Message::tool_call("c1", "shell", r#"{"command":["ls"]}"#)]);
        assert_eq!(items[0]["type"], "function_call");
        assert_eq!(items[0]["call_id"], "c1");
        assert_eq!(items[0]["name"], "shell");
        assert_eq!(items[0]["arguments"], r#"{"command":["ls"]}"#);
    }

    #[test]
    fn tool_result_becomes_function_call_output_item() {
        let items = build_input_items(&[Message::tool_result("c1", "file1\nfile2")]);
        assert_eq!(items[0]["type"], "function_call_output");
        assert_eq!(items[0]["call_id"], "c1");
        assert_eq!(items[0]["output"], "file1\nfile2");
    }

    // ── Request body ──────────────────────────────────────────────────────────

    #[test]
    fn request_body_has_wire_shape() {
        let body = build_request_body(&turn_with_messages(vec![Message::user("hi")]));
        assert_eq!(body["model"], "gpt-5");
        assert_eq!(body["tool_choice"], "auto");
        assert_eq!(body["store"], false);
        assert_eq!(body["stream"], true);
        assert!(body["instructions"].as_str().unwrap().len() > 0);
    }

    #[test]
    fn request_body_expands_model_alias() {
        let mut turn = turn_with_messages(vec![]);
        turn.model = "codex".into();
        let body = build_request_body(&turn);
        assert_eq!(body["model"], "gpt-5-codex");
    }

    #[test]
    fn reasoning_config_is_forwarded() {
        let mut turn = turn_with_messages(vec![]);
        turn.reasoning = Some(crate::types::ReasoningConfig {
            effort: crate::types::Effort::High,
            summaries: true,
            budget_tokens: None,
        });
        let body = build_request_body(&turn);
        assert_eq!(body["reasoning"]["effort"], "high");
        assert_eq!(body["reasoning"]["summary"], "auto");
    }

    #[test]
    fn caller_tools_are_marked_strict() {
        let mut turn = turn_with_messages(vec![]);
        turn.tools.push(ToolSpec {
            name: "read_file".into(),
            description: "Read a file".into(),
            input_schema: json!({
                "type": "object",
                "required": ["path"],
                "properties": {
                    "path": { "type": "string" },
                    "limit": { "type": "integer" },
                }
            }),
        });
        let body = build_request_body(&turn);
        let tool = &body["tools"][0];
        assert_eq!(tool["type"], "function");
        assert_eq!(tool["strict"], true);
        assert_eq!(tool["parameters"]["additionalProperties"], false);
        let required = tool["parameters"]["required"].as_array().unwrap();
        assert_eq!(required.len(), 2);
    }

    #[test]
    fn empty_caller_schema_becomes_empty_object_schema() {
        let strict = strict_tool_schema(&json!({}));
        assert_eq!(strict["type"], "object");
        assert_eq!(strict["additionalProperties"], false);
    }

    #[test]
    fn builtin_tools_sent_when_caller_supplies_none() {
        let body = build_request_body(&turn_with_messages(vec![]));
        let names: Vec<&str> = body["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["apply_patch", "update_plan", "shell"]);
        let apply_patch = &body["tools"][0];
        assert_eq!(apply_patch["format"]["syntax"], "lark");
        assert!(apply_patch["format"]["definition"]
            .as_str()
            .unwrap()
            .contains("*** Begin Patch"));
    }

    // ── Translator: text and usage ────────────────────────────────────────────

    #[test]
    fn output_text_delta_translates() {
        let mut t = ResponsesTranslator::new();
        let out = t.on_frame(&frame(json!({
            "type": "response.output_text.delta",
            "delta": "Hello ",
        })));
        assert_eq!(
            out,
            vec![EventKind::TextDelta {
                delta: "Hello ".into(),
                complete: false
            }]
        );
    }

    #[test]
    fn empty_text_delta_is_suppressed() {
        let mut t = ResponsesTranslator::new();
        assert!(t
            .on_frame(&frame(json!({
                "type": "response.output_text.delta",
                "delta": "",
            })))
            .is_empty());
    }

    #[test]
    fn output_text_done_is_a_complete_delta() {
        let mut t = ResponsesTranslator::new();
        let out = t.on_frame(&frame(json!({
            "type": "response.output_text.done",
            "text": "Hello world!",
        })));
        assert_eq!(
            out,
            vec![EventKind::TextDelta {
                delta: "Hello world!".into(),
                complete: true
            }]
        );
    }

    #[test]
    fn reasoning_summary_delta_sets_summary_flag() {
        let mut t = ResponsesTranslator::new();
        let out = t.on_frame(&frame(json!({
            "type": "response.reasoning_summary_text.delta",
            "delta": "Planning the change.",
        })));
        assert_eq!(
            out,
            vec![EventKind::ThinkingDelta {
                delta: "Planning the change.".into(),
                complete: false,
                summary: true,
            }]
        );
    }

    #[test]
    fn completed_with_usage_emits_usage() {
        let mut t = ResponsesTranslator::new();
        let out = t.on_frame(&frame(json!({
            "type": "response.completed",
            "response": { "usage": { "input_tokens": 10, "output_tokens": 5, "total_tokens": 15 } },
        })));
        assert_eq!(
            out,
            vec![EventKind::Usage(Usage {
                input_tokens: 10,
                output_tokens: 5,
                total_tokens: Some(15),
            })]
        );
    }

    #[test]
    fn completed_without_usage_emits_nothing() {
        let mut t = ResponsesTranslator::new();
        assert!(t
            .on_frame(&frame(json!({ "type": "response.completed", "response": {} })))
            .is_empty());
    }

    #[test]
    fn error_frame_defaults_message() {
        let mut t = ResponsesTranslator::new();
        let out = t.on_frame(&frame(json!({ "type": "error" })));
        assert_eq!(
            out,
            vec![EventKind::Error {
                code: None,
                message: "unknown error".into(),
                retryable: false,
            }]
        );
    }

    #[test]
    fn error_frame_carries_code_and_message() {
        let mut t = ResponsesTranslator::new();
        let out = t.on_frame(&frame(json!({
            "type": "error",
            "code": "rate_limit_exceeded",
            "message": "slow down",
        })));
        assert_eq!(
            out,
            vec![EventKind::Error {
                code: Some("rate_limit_exceeded".into()),
                message: "slow down".into(),
                retryable: false,
            }]
        );
    }

    #[test]
    fn unknown_frame_types_are_ignored() {
        let mut t = ResponsesTranslator::new();
        assert!(t
            .on_frame(&frame(json!({ "type": "response.something_new", "x": 1 })))
            .is_empty());
    }

    // ── Translator: tool calls ────────────────────────────────────────────────

    fn run_tool_call_stream(t: &mut ResponsesTranslator) -> Vec<EventKind> {
        let mut all = Vec::new();
        all.extend(t.on_frame(&frame(json!({
            "type": "response.output_item.added",
            "item": { "type": "function_call", "id": "item1", "call_id": "c1", "name": "shell", "arguments": "" },
        }))));
        all.extend(t.on_frame(&frame(json!({
            "type": "response.function_call_arguments.delta",
            "item_id": "item1",
            "delta": "{\"command\":",
        }))));
        all.extend(t.on_frame(&frame(json!({
            "type": "response.function_call_arguments.delta",
            "item_id": "item1",
            "delta": "[\"ls\"]}",
        }))));
        all
    }

    #[test]
    fn streamed_tool_call_emits_once_with_accumulated_args() {
        let mut t = ResponsesTranslator::new();
        let mut events = run_tool_call_stream(&mut t);
        assert!(events.is_empty(), "no events until a completion frame");

        events.extend(t.on_frame(&frame(json!({
            "type": "response.output_item.done",
            "item": { "type": "function_call", "id": "item1", "call_id": "c1",
                      "name": "shell", "arguments": "{\"command\":[\"ls\"]}" },
        }))));
        assert_eq!(
            events,
            vec![EventKind::ToolCall {
                call_id: "c1".into(),
                name: "shell".into(),
                arguments: "{\"command\":[\"ls\"]}".into(),
            }]
        );
    }

    #[test]
    fn duplicate_completion_events_are_suppressed() {
        let mut t = ResponsesTranslator::new();
        run_tool_call_stream(&mut t);

        let first = t.on_frame(&frame(json!({
            "type": "response.function_call_arguments.done",
            "item_id": "item1",
            "name": "shell",
            "arguments": "{\"command\":[\"ls\"]}",
        })));
        assert_eq!(first.len(), 1, "first completion emits the ToolCall");

        let second = t.on_frame(&frame(json!({
            "type": "response.output_item.done",
            "item": { "type": "function_call", "id": "item1", "call_id": "c1",
                      "name": "shell", "arguments": "{\"command\":[\"ls\"]}" },
        })));
        assert!(second.is_empty(), "second completion must be suppressed");
    }

    #[test]
    fn snapshot_used_when_accumulator_holds_placeholder() {
        let mut t = ResponsesTranslator::new();
        t.on_frame(&frame(json!({
            "type": "response.output_item.added",
            "item": { "type": "function_call", "id": "item1", "call_id": "c1", "name": "shell", "arguments": "" },
        })));
        t.on_frame(&frame(json!({
            "type": "response.function_call_arguments.delta",
            "item_id": "item1",
            "delta": "{}",
        })));
        let out = t.on_frame(&frame(json!({
            "type": "response.output_item.done",
            "item": { "type": "function_call", "id": "item1", "call_id": "c1",
                      "name": "shell", "arguments": "{\"command\":[\"pwd\"]}" },
        })));
        assert_eq!(
            out,
            vec![EventKind::ToolCall {
                call_id: "c1".into(),
                name: "shell".into(),
                arguments: "{\"command\":[\"pwd\"]}".into(),
            }]
        );
    }

    #[test]
    fn concatenated_argument_values_are_normalized() {
        let mut t = ResponsesTranslator::new();
        t.on_frame(&frame(json!({
            "type": "response.output_item.added",
            "item": { "type": "function_call", "id": "item1", "call_id": "c1", "name": "shell", "arguments": "" },
        })));
        t.on_frame(&frame(json!({
            "type": "response.function_call_arguments.delta",
            "item_id": "item1",
            "delta": "{}{\"command\":\"ls\"}",
        })));
        let out = t.on_frame(&frame(json!({
            "type": "response.function_call_arguments.done",
            "item_id": "item1",
            "name": "shell",
        })));
        match &out[0] {
            EventKind::ToolCall { arguments, .. } => {
                assert_eq!(
                    serde_json::from_str::<Value>(arguments).unwrap(),
                    json!({"command": "ls"})
                );
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn completion_without_name_is_skipped_until_named_event() {
        let mut t = ResponsesTranslator::new();
        // Announcement lost the name.
        t.on_frame(&frame(json!({
            "type": "response.output_item.added",
            "item": { "type": "function_call", "id": "item1", "call_id": "c1", "name": "", "arguments": "" },
        })));
        t.on_frame(&frame(json!({
            "type": "response.function_call_arguments.delta",
            "item_id": "item1",
            "delta": "{\"a\":1}",
        })));
        // First completion has no name either → skipped, not consumed.
        let first = t.on_frame(&frame(json!({
            "type": "response.function_call_arguments.done",
            "item_id": "item1",
        })));
        assert!(first.is_empty());
        // Second completion carries the name → emits.
        let second = t.on_frame(&frame(json!({
            "type": "response.output_item.done",
            "item": { "type": "function_call", "id": "item1", "call_id": "c1", "name": "shell" },
        })));
        assert_eq!(second.len(), 1);
    }

    #[test]
    fn completion_with_unknown_call_id_is_skipped() {
        let mut t = ResponsesTranslator::new();
        let out = t.on_frame(&frame(json!({
            "type": "response.function_call_arguments.done",
            "item_id": "never-announced",
            "name": "shell",
        })));
        assert!(out.is_empty());
    }

    // ── update_plan expansion ─────────────────────────────────────────────────

    #[test]
    fn update_plan_expands_to_plan_updates() {
        let mut t = ResponsesTranslator::new();
        t.on_frame(&frame(json!({
            "type": "response.output_item.added",
            "item": { "type": "function_call", "id": "item1", "call_id": "c1", "name": "update_plan", "arguments": "" },
        })));
        let out = t.on_frame(&frame(json!({
            "type": "response.output_item.done",
            "item": {
                "type": "function_call", "id": "item1", "call_id": "c1", "name": "update_plan",
                "arguments": "{\"steps\":[{\"title\":\"Read\",\"status\":\"completed\"},{\"title\":\"Write\",\"status\":\"in_progress\"}]}",
            },
        })));
        assert_eq!(
            out,
            vec![
                EventKind::PlanUpdate {
                    step: 0,
                    title: "Read".into(),
                    status: PlanStepStatus::Completed,
                },
                EventKind::PlanUpdate {
                    step: 1,
                    title: "Write".into(),
                    status: PlanStepStatus::InProgress,
                },
            ]
        );
    }

    #[test]
    fn update_plan_accepts_plan_key_and_step_titles() {
        let out = expand_update_plan(
            "c1",
            "{\"plan\":[{\"step\":\"Investigate\",\"status\":\"pending\"}]}",
        );
        assert_eq!(
            out,
            vec![EventKind::PlanUpdate {
                step: 0,
                title: "Investigate".into(),
                status: PlanStepStatus::Pending,
            }]
        );
    }

    #[test]
    fn update_plan_ignores_fields_beside_the_step_list() {
        let out = expand_update_plan(
            "c1",
            "{\"explanation\":\"Switching approach.\",\"steps\":[{\"title\":\"Redo\",\"status\":\"pending\"}]}",
        );
        assert_eq!(
            out,
            vec![EventKind::PlanUpdate {
                step: 0,
                title: "Redo".into(),
                status: PlanStepStatus::Pending,
            }]
        );
    }

    #[test]
    fn update_plan_parse_failure_falls_back_to_tool_call() {
        let out = expand_update_plan("c1", "not json at all");
        assert_eq!(
            out,
            vec![EventKind::ToolCall {
                call_id: "c1".into(),
                name: "update_plan".into(),
                arguments: "not json at all".into(),
            }]
        );
    }

    #[test]
    fn update_plan_without_steps_falls_back_to_tool_call() {
        let out = expand_update_plan("c1", "{\"note\":\"no steps here\"}");
        assert!(matches!(&out[0], EventKind::ToolCall { name, .. } if name == "update_plan"));
    }

    // ── Malformed-frame handling ──────────────────────────────────────────────

    fn byte_chunks(body: &str) -> futures::stream::Iter<std::vec::IntoIter<Result<Vec<u8>, std::io::Error>>> {
        futures::stream::iter(vec![Ok(body.as_bytes().to_vec())])
    }

    #[tokio::test]
    async fn repeated_malformed_frames_terminate_the_stream() {
        let mut body = String::new();
        for _ in 0..sse::MAX_CONSECUTIVE_MALFORMED_FRAMES {
            body.push_str("data: {not json}\n\n");
        }
        let items: Vec<_> = translate_byte_stream(byte_chunks(&body)).collect().await;

        let errors: Vec<&anyhow::Error> =
            items.iter().filter_map(|i| i.as_ref().err()).collect();
        assert_eq!(errors.len(), 1, "exactly one terminal error");
        assert!(
            errors[0].to_string().contains("consecutive malformed"),
            "unexpected error: {}",
            errors[0]
        );
        let events_before_error = items
            .iter()
            .take_while(|i| i.is_ok())
            .count();
        assert_eq!(events_before_error, 0, "malformed frames emit no events");
    }

    #[tokio::test]
    async fn malformed_frame_counter_resets_on_good_frames() {
        let below_cap = sse::MAX_CONSECUTIVE_MALFORMED_FRAMES - 1;
        let mut body = String::new();
        for _ in 0..below_cap {
            body.push_str("data: {not json}\n\n");
        }
        body.push_str("data: {\"type\":\"response.output_text.delta\",\"delta\":\"ok\"}\n\n");
        for _ in 0..below_cap {
            body.push_str("data: {not json}\n\n");
        }
        let items: Vec<_> = translate_byte_stream(byte_chunks(&body)).collect().await;

        assert!(
            items.iter().all(|i| i.is_ok()),
            "a good frame must reset the failure counter"
        );
        let kinds: Vec<EventKind> = items.into_iter().map(|i| i.unwrap().kind).collect();
        assert_eq!(
            kinds,
            vec![EventKind::text("ok"), EventKind::Done],
            "stream continues through isolated malformed frames"
        );
    }
}
