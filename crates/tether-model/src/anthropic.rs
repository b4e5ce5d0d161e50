// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Anthropic Messages adapter.
//!
//! The Messages stream is block-scoped: `content_block_start` opens a text,
//! thinking, or tool_use block, deltas arrive for the current block, and
//! `content_block_stop` closes it.  Tool-use input streams as
//! `input_json_delta` fragments that must be accumulated until the block
//! stops, so the translator is an explicit state struct rather than a
//! per-frame function.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::{debug, warn};

use tether_auth::TokenSource;

use crate::{
    event::{EventKind, TurnEvent, Usage},
    http::{send_with_retry, RetryPolicy},
    provider::{Adapter, EventStream},
    registry,
    responses::{compose_instructions, USER_AGENT},
    sse,
    types::{Effort, Message, Role, ToolSpec, Turn},
};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const OAUTH_BETA: &str = "oauth-2025-04-20";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Default `max_tokens` when the caller sets none and the model is not in
/// the catalog.
const DEFAULT_MAX_TOKENS: u32 = 4096;
/// Default thinking budget for `effort: high` with no explicit budget.
const HIGH_EFFORT_BUDGET: u32 = 10_000;
/// Headroom kept above the thinking budget: `max_tokens ≥ budget + 4096`.
const BUDGET_HEADROOM: u32 = 4096;

pub struct AnthropicAdapter {
    base_url: String,
    auth: Arc<dyn TokenSource>,
    retry: RetryPolicy,
    client: reqwest::Client,
}

impl AnthropicAdapter {
    pub fn new(auth: Arc<dyn TokenSource>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.into(),
            auth,
            retry: RetryPolicy::default(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[async_trait]
impl Adapter for AnthropicAdapter {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn stream_turn(&self, turn: &Turn) -> anyhow::Result<EventStream> {
        let body = build_request_body(turn);
        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));
        debug!(
            model = %body["model"].as_str().unwrap_or_default(),
            max_tokens = body["max_tokens"].as_u64().unwrap_or(0),
            thinking = body.get("thinking").is_some(),
            "sending messages request"
        );

        let resp = send_with_retry(&self.client, Some(self.auth.as_ref()), &self.retry, |token| {
            let mut rb = self
                .client
                .post(&url)
                .json(&body)
                .header("anthropic-beta", OAUTH_BETA)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .header("User-Agent", USER_AGENT);
            if let Some(tok) = token {
                rb = rb.bearer_auth(tok);
            }
            rb
        })
        .await
        .context("anthropic request failed")?;

        Ok(translate_byte_stream(resp.bytes_stream()))
    }
}

/// Run a Messages SSE byte stream through the block-scoped state machine.
fn translate_byte_stream<S, B, E>(byte_stream: S) -> EventStream
where
    S: futures::Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    let translated = byte_stream
        .scan(
            (String::new(), MessagesTranslator::new(), false, 0u32),
            |(buf, translator, failed, malformed), chunk| {
                let items: Vec<anyhow::Result<TurnEvent>> = if *failed {
                    Vec::new()
                } else {
                    match chunk {
                        Ok(bytes) => {
                            buf.push_str(&String::from_utf8_lossy(bytes.as_ref()));
                            let mut events = Vec::new();
                            for payload in sse::drain_data_lines(buf) {
                                match serde_json::from_str::<Value>(&payload) {
                                    Ok(frame) => {
                                        *malformed = 0;
                                        for kind in translator.on_frame(&frame) {
                                            events.push(Ok(TurnEvent::now(kind)));
                                        }
                                    }
                                    Err(_) => {
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

/// The wire request: `{model, max_tokens, system, messages, tools?,
/// tool_choice?, thinking?, stream}`.
pub(crate) fn build_request_body(turn: &Turn) -> Value {
    let model = registry::ANTHROPIC_RULES.expand_alias(&turn.model);
    let mut max_tokens = turn.max_output_tokens.unwrap_or_else(|| {
        crate::catalog::max_output_tokens("anthropic", &model, DEFAULT_MAX_TOKENS)
    });
    let thinking_budget = resolve_thinking_budget(turn);
    if let Some(budget) = thinking_budget {
        max_tokens = max_tokens.max(budget + BUDGET_HEADROOM);
    }

    let mut body = json!({
        "model": model,
        "max_tokens": max_tokens,
        "system": [{ "type": "text", "text": compose_instructions(turn) }],
        "messages": build_messages(&turn.messages),
        "stream": true,
    });
    if !turn.tools.is_empty() {
        body["tools"] = json!(build_tools(&turn.tools));
        body["tool_choice"] = json!({ "type": "auto" });
    }
    if let Some(budget) = thinking_budget {
        body["thinking"] = json!({ "type": "enabled", "budget_tokens": budget });
    }
    body
}

/// Effort → thinking budget.  `low` disables thinking entirely; `high`
/// defaults to 10000 when the caller set no explicit budget; `medium` only
/// thinks when a budget is given.
fn resolve_thinking_budget(turn: &Turn) -> Option<u32> {
    let reasoning = turn.reasoning.as_ref()?;
    match reasoning.effort {
        Effort::Low => None,
        Effort::High => Some(reasoning.budget_tokens.unwrap_or(HIGH_EFFORT_BUDGET)),
        Effort::Medium => reasoning.budget_tokens,
    }
    .filter(|budget| *budget > 0)
}

/// Translate harness messages into Messages-API conversation turns.
pub(crate) fn build_messages(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|m| match (m.role, m.tool_id.as_deref()) {
            (Role::User, _) => json!({
                "role": "user",
                "content": [{ "type": "text", "text": m.content }],
            }),
            (Role::Assistant, Some(call_id)) => {
                // Tolerate unparseable argument echoes by sending an empty
                // input object; a null input is rejected upstream.
                let input = serde_json::from_str::<Value>(&m.content)
                    .ok()
                    .filter(Value::is_object)
                    .unwrap_or_else(|| json!({}));
                json!({
                    "role": "assistant",
                    "content": [{
                        "type": "tool_use",
                        "id": call_id,
                        "name": m.name.as_deref().unwrap_or_default(),
                        "input": input,
                    }],
                })
            }
            (Role::Assistant, None) => json!({
                "role": "assistant",
                "content": [{ "type": "text", "text": m.content }],
            }),
            (Role::Tool, call_id) => json!({
                "role": "user",
                "content": [{
                    "type": "tool_result",
                    "tool_use_id": call_id.unwrap_or_default(),
                    "content": m.content,
                }],
            }),
        })
        .collect()
}

/// Tools carry only `properties` and `required` from the caller schema.
pub(crate) fn build_tools(specs: &[ToolSpec]) -> Vec<Value> {
    specs
        .iter()
        .map(|t| {
            json!({
                "name": t.name,
                "description": t.description,
                "input_schema": {
                    "type": "object",
                    "properties": t.input_schema.get("properties").cloned().unwrap_or(json!({})),
                    "required": t.input_schema.get("required").cloned().unwrap_or(json!([])),
                },
            })
        })
        .collect()
}

// ─── Streaming state machine ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Text,
    Thinking,
    ToolUse,
}

/// Block-scoped reducer over Messages SSE frames.
pub(crate) struct MessagesTranslator {
    block: Option<BlockKind>,
    tool_id: String,
    tool_name: String,
    tool_args: String,
    thinking: String,
    input_tokens: u32,
    output_tokens: u32,
    saw_tokens: bool,
}

impl MessagesTranslator {
    pub(crate) fn new() -> Self {
        Self {
            block: None,
            tool_id: String::new(),
            tool_name: String::new(),
            tool_args: String::new(),
            thinking: String::new(),
            input_tokens: 0,
            output_tokens: 0,
            saw_tokens: false,
        }
    }

    pub(crate) fn on_frame(&mut self, frame: &Value) -> Vec<EventKind> {
        match frame["type"].as_str().unwrap_or_default() {
            "content_block_start" => {
                let block = &frame["content_block"];
                match block["type"].as_str().unwrap_or_default() {
                    "tool_use" => {
                        self.block = Some(BlockKind::ToolUse);
                        self.tool_id = block["id"].as_str().unwrap_or_default().to_string();
                        self.tool_name = block["name"].as_str().unwrap_or_default().to_string();
                        self.tool_args.clear();
                    }
                    "thinking" => {
                        self.block = Some(BlockKind::Thinking);
                        self.thinking.clear();
                    }
                    _ => self.block = Some(BlockKind::Text),
                }
                vec![]
            }
            "content_block_delta" => {
                let delta = &frame["delta"];
                match delta["type"].as_str().unwrap_or_default() {
                    "text_delta" => {
                        let text = delta["text"].as_str().unwrap_or_default();
                        if text.is_empty() {
                            vec![]
                        } else {
                            vec![EventKind::TextDelta {
                                delta: text.to_string(),
                                complete: false,
                            }]
                        }
                    }
                    "thinking_delta" => {
                        let text = delta["thinking"].as_str().unwrap_or_default();
                        if text.is_empty() {
                            return vec![];
                        }
                        self.thinking.push_str(text);
                        vec![EventKind::ThinkingDelta {
                            delta: text.to_string(),
                            complete: false,
                            summary: false,
                        }]
                    }
                    "input_json_delta" => {
                        self.tool_args
                            .push_str(delta["partial_json"].as_str().unwrap_or_default());
                        vec![]
                    }
                    // signature_delta and future types carry nothing useful.
                    _ => vec![],
                }
            }
            "content_block_stop" => match self.block.take() {
                Some(BlockKind::ToolUse) => {
                    vec![EventKind::ToolCall {
                        call_id: std::mem::take(&mut self.tool_id),
                        name: std::mem::take(&mut self.tool_name),
                        arguments: std::mem::take(&mut self.tool_args),
                    }]
                }
                Some(BlockKind::Thinking) if !self.thinking.is_empty() => {
                    vec![EventKind::ThinkingDelta {
                        delta: std::mem::take(&mut self.thinking),
                        complete: true,
                        summary: false,
                    }]
                }
                _ => vec![],
            },
            "message_start" => {
                if let Some(tokens) = frame["message"]["usage"]["input_tokens"].as_u64() {
                    self.input_tokens = tokens as u32;
                    self.saw_tokens = true;
                }
                vec![]
            }
            "message_delta" => {
                if let Some(tokens) = frame["usage"]["output_tokens"].as_u64() {
                    self.output_tokens = tokens as u32;
                    self.saw_tokens = true;
                }
                vec![]
            }
            "message_stop" => {
                if self.saw_tokens {
                    vec![EventKind::Usage(Usage {
                        input_tokens: self.input_tokens,
                        output_tokens: self.output_tokens,
                        total_tokens: None,
                    })]
                } else {
                    vec![]
                }
            }
            "error" => {
                let err = &frame["error"];
                let message = err["message"]
                    .as_str()
                    .filter(|m| !m.is_empty())
                    .unwrap_or("unknown error");
                vec![EventKind::Error {
                    code: err["type"].as_str().map(str::to_string),
                    message: message.to_string(),
                    retryable: false,
                }]
            }
            // ping and unknown types are ignored.
            _ => vec![],
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
