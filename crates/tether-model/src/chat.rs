// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Generic Chat-Completions adapter.
//!
//! Accepts any OpenAI-compatible endpoint.  Internally the adapter works on
//! the Responses-shaped request: the client translates it onto the wire as a
//! `/chat/completions` body, and translates the streamed chat SSE *back*
//! into the uniform Responses frame shapes before the shared
//! [`ResponsesTranslator`] runs.  One translation state machine therefore
//! serves both adapters.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::{debug, warn};

use tether_auth::TokenSource;

use crate::{
    event::{EventKind, TurnEvent},
    http::{send_with_retry, RetryPolicy},
    provider::{Adapter, EventStream},
    responses::{build_request_body, ResponsesTranslator, USER_AGENT},
    sse::{self, StreamEvent},
    types::Turn,
};

/// Turn-metadata key that overrides the adapter's API key for one request.
pub const API_KEY_METADATA_KEY: &str = "chat_api_key";

/// How the endpoint expects credentials.
#[derive(Debug, Clone)]
pub enum AuthStyle {
    /// `Authorization: Bearer <key>` with a configured API key.
    ApiKey(String),
    /// `Authorization: Bearer <token>` with a caller-managed token.
    Bearer(String),
    /// Arbitrary header map (gateway-style auth).
    Header(Vec<(String, String)>),
    /// No authentication (local servers).
    None,
}

pub struct ChatCompletionsAdapter {
    base_url: String,
    auth_style: AuthStyle,
    /// Optional refreshable token source; when set it supersedes
    /// [`AuthStyle::ApiKey`]/[`AuthStyle::Bearer`] values.
    token_source: Option<Arc<dyn TokenSource>>,
    retry: RetryPolicy,
    client: reqwest::Client,
}

impl ChatCompletionsAdapter {
    pub fn new(base_url: impl Into<String>, auth_style: AuthStyle) -> Self {
        Self {
            base_url: base_url.into(),
            auth_style,
            token_source: None,
            retry: RetryPolicy::default(),
            client: reqwest::Client::new(),
        }
    }

    /// Use a refreshable token source instead of a fixed key.
    pub fn with_token_source(mut self, source: Arc<dyn TokenSource>) -> Self {
        self.token_source = Some(source);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The bearer value for this request, honoring the per-request metadata
    /// override.  `None` means no Authorization header.
    fn bearer_for(&self, turn: &Turn) -> Option<String> {
        if let Some(key) = turn.metadata.get(API_KEY_METADATA_KEY) {
            return Some(key.clone());
        }
        match &self.auth_style {
            AuthStyle::ApiKey(key) => Some(key.clone()),
            AuthStyle::Bearer(token) => Some(token.clone()),
            AuthStyle::Header(_) | AuthStyle::None => None,
        }
    }
}

#[async_trait]
impl Adapter for ChatCompletionsAdapter {
    fn name(&self) -> &str {
        "chat"
    }

    async fn stream_turn(&self, turn: &Turn) -> anyhow::Result<EventStream> {
        let responses_body = build_request_body(turn);
        let body = chat_body_from_responses(&responses_body);
        let url = format!(
            "{}/chat/completions",
            self.base_url.trim_end_matches('/')
        );
        debug!(
            model = %body["model"].as_str().unwrap_or_default(),
            message_count = body["messages"].as_array().map(Vec::len).unwrap_or(0),
            "sending chat completions request"
        );

        let turn_override_set = turn.metadata.contains_key(API_KEY_METADATA_KEY);
        let bearer_override = self.bearer_for(turn);
        let extra_headers: Vec<(String, String)> = match &self.auth_style {
            AuthStyle::Header(headers) if bearer_override.is_none() => headers.clone(),
            _ => Vec::new(),
        };
        let resp = send_with_retry(
            &self.client,
            self.token_source.as_deref(),
            &self.retry,
            |token| {
                let mut rb = self
                    .client
                    .post(&url)
                    .json(&body)
                    .header("User-Agent", USER_AGENT);
                // The per-request metadata override wins over a configured
                // token source.
                let bearer = match turn_override_set {
                    true => bearer_override.clone(),
                    false => token.map(str::to_string).or_else(|| bearer_override.clone()),
                };
                if let Some(tok) = bearer {
                    rb = rb.bearer_auth(tok);
                }
                for (name, value) in &extra_headers {
                    rb = rb.header(name.as_str(), value.as_str());
                }
                rb
            },
        )
        .await
        .context("chat completions request failed")?;

        Ok(translate_byte_stream(resp.bytes_stream()))
    }
}

/// Run a chat-completions SSE byte stream through the bridge and the shared
/// Responses state machine.
fn translate_byte_stream<S, B, E>(byte_stream: S) -> EventStream
where
    S: futures::Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    let translated = byte_stream
        .scan(
            (
                String::new(),
                ChatBridge::new(),
                ResponsesTranslator::new(),
                false,
                0u32,
            ),
            |(buf, bridge, translator, failed, malformed), chunk| {
                let items: Vec<anyhow::Result<TurnEvent>> = if *failed {
                    Vec::new()
                } else {
                    match chunk {
                        Ok(bytes) => {
                            buf.push_str(&String::from_utf8_lossy(bytes.as_ref()));
                            let mut events = Vec::new();
                            for payload in sse::drain_data_lines(buf) {
                                match bridge.on_payload(&payload) {
                                    Some(frames) => {
                                        *malformed = 0;
                                        for frame in frames {
                                            for kind in translator.on_frame(&frame) {
                                                events.push(Ok(TurnEvent::now(kind)));
                                            }
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

// ─── Request translation (Responses → chat/completions) ───────────────────────

/// Marshal a Responses-shaped request into a chat-completions body.
///
/// `instructions` becomes the system message; consecutive `function_call`
/// input items coalesce into a single assistant message with a `tool_calls`
/// array (the parallel-tool-call wire contract); grammar-based custom tools
/// have no chat equivalent and are dropped.
pub(crate) fn chat_body_from_responses(responses_body: &Value) -> Value {
    let mut messages: Vec<Value> = Vec::new();
    if let Some(instructions) = responses_body["instructions"].as_str() {
        if !instructions.is_empty() {
            messages.push(json!({ "role": "system", "content": instructions }));
        }
    }

    let empty = Vec::new();
    let items = responses_body["input"].as_array().unwrap_or(&empty);
    let mut i = 0;
    while i < items.len() {
        let item = &items[i];
        match item["type"].as_str().unwrap_or_default() {
            "function_call" => {
                let mut calls = Vec::new();
                while i < items.len() && items[i]["type"].as_str() == Some("function_call") {
                    let fc = &items[i];
                    calls.push(json!({
                        "id": fc["call_id"],
                        "type": "function",
                        "function": {
                            "name": fc["name"],
                            "arguments": fc["arguments"],
                        },
                    }));
                    i += 1;
                }
                messages.push(json!({ "role": "assistant", "tool_calls": calls }));
                continue;
            }
            "function_call_output" => {
                messages.push(json!({
                    "role": "tool",
                    "tool_call_id": item["call_id"],
                    "content": item["output"],
                }));
            }
            "message" => {
                let role = item["role"].as_str().unwrap_or("user");
                let text: String = item["content"]
                    .as_array()
                    .map(|parts| {
                        parts
                            .iter()
                            .filter_map(|p| p["text"].as_str())
                            .collect::<Vec<_>>()
                            .join("")
                    })
                    .unwrap_or_default();
                messages.push(json!({ "role": role, "content": text }));
            }
            _ => {}
        }
        i += 1;
    }

    let tools: Vec<Value> = responses_body["tools"]
        .as_array()
        .unwrap_or(&empty)
        .iter()
        .filter(|t| t["type"].as_str() == Some("function"))
        .map(|t| {
            json!({
                "type": "function",
                "function": {
                    "name": t["name"],
                    "description": t["description"],
                    "parameters": t["parameters"],
                },
            })
        })
        .collect();

    let mut body = json!({
        "model": responses_body["model"],
        "messages": messages,
        "stream": true,
        "stream_options": { "include_usage": true },
    });
    if !tools.is_empty() {
        body["tools"] = json!(tools);
        body["tool_choice"] = json!("auto");
    }
    if let Some(max) = responses_body["max_output_tokens"].as_u64() {
        body["max_tokens"] = json!(max);
    }
    body
}

// ─── Response translation (chat SSE → uniform frames) ─────────────────────────

#[derive(Debug, Default)]
struct PendingChatCall {
    id: String,
    name: String,
    arguments: String,
}

/// Re-shapes streamed chat-completions chunks into the uniform Responses
/// frame vocabulary.  Tool-call deltas accumulate per parallel-call index
/// and are flushed as `function_call_arguments.done` frames when the choice
/// finishes (or at `[DONE]` as a fallback); the usage chunk is carried into
/// the final `response.completed` frame.
pub(crate) struct ChatBridge {
    pending: BTreeMap<u64, PendingChatCall>,
    flushed: bool,
    usage: Option<Value>,
}

impl ChatBridge {
    pub(crate) fn new() -> Self {
        Self {
            pending: BTreeMap::new(),
            flushed: false,
            usage: None,
        }
    }

    /// Re-shape one SSE payload.  Returns `None` when the payload is not
    /// valid JSON (and not the `[DONE]` sentinel) so the caller can apply
    /// the malformed-frame policy.
    pub(crate) fn on_payload(&mut self, payload: &str) -> Option<Vec<StreamEvent>> {
        if payload == "[DONE]" {
            let mut frames = self.flush_tool_calls();
            let usage = self.usage.take();
            frames.push(synth(
                "response.completed",
                json!({ "response": { "usage": usage } }),
            ));
            return Some(frames);
        }
        let Ok(chunk) = serde_json::from_str::<Value>(payload) else {
            return None;
        };

        if let Some(err) = chunk.get("error").filter(|e| !e.is_null()) {
            return Some(vec![synth(
                "error",
                json!({
                    "code": err["code"],
                    "message": err["message"],
                }),
            )]);
        }

        // Usage-only chunk (stream_options.include_usage).
        if let Some(usage) = chunk.get("usage").filter(|u| !u.is_null()) {
            self.usage = Some(json!({
                "input_tokens": usage["prompt_tokens"],
                "output_tokens": usage["completion_tokens"],
                "total_tokens": usage["total_tokens"],
            }));
        }

        let choice = &chunk["choices"][0];
        let delta = &choice["delta"];
        let mut frames = Vec::new();

        if let Some(tool_calls) = delta["tool_calls"].as_array() {
            for tc in tool_calls {
                let index = tc["index"].as_u64().unwrap_or(0);
                let entry = self.pending.entry(index).or_default();
                if let Some(id) = tc["id"].as_str().filter(|s| !s.is_empty()) {
                    entry.id = id.to_string();
                }
                if let Some(name) = tc["function"]["name"].as_str().filter(|s| !s.is_empty()) {
                    entry.name = name.to_string();
                }
                if let Some(args) = tc["function"]["arguments"].as_str() {
                    entry.arguments.push_str(args);
                }
            }
        }

        if let Some(text) = delta["content"].as_str().filter(|t| !t.is_empty()) {
            frames.push(synth(
                "response.output_text.delta",
                json!({ "delta": text }),
            ));
        }

        if choice["finish_reason"].as_str() == Some("tool_calls") {
            frames.extend(self.flush_tool_calls());
        }
        Some(frames)
    }

    /// One `function_call_arguments.done` frame per accumulated call, in
    /// index order.  Calls that never received an id get a synthetic one so
    /// the loop can still pair results.
    fn flush_tool_calls(&mut self) -> Vec<StreamEvent> {
        if self.flushed && self.pending.is_empty() {
            return vec![];
        }
        self.flushed = true;
        let pending = std::mem::take(&mut self.pending);
        pending
            .into_iter()
            .map(|(index, call)| {
                let id = if call.id.is_empty() {
                    format!("call_{index}")
                } else {
                    call.id
                };
                synth(
                    "response.function_call_arguments.done",
                    json!({
                        "call_id": id,
                        "name": call.name,
                        "arguments": call.arguments,
                    }),
                )
            })
            .collect()
    }
}

fn synth(kind: &str, mut data: Value) -> StreamEvent {
    data["type"] = json!(kind);
    StreamEvent {
        kind: kind.to_string(),
        data,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
