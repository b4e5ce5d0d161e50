// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! SSE line parsing and per-stream tool-call state.
//!
//! SSE events can be split across TCP chunks, so adapters carry a persistent
//! line buffer forward: only complete `\n`-terminated lines are consumed and
//! anything left over is prepended to the next chunk.  Comment lines
//! (prefixed `:`) and blank frame separators are dropped here.

use std::collections::{HashMap, HashSet};

use serde_json::Value;

/// Consecutive undecodable frames tolerated before a stream is declared
/// malformed and terminated with an error.  Any good frame resets the count.
pub(crate) const MAX_CONSECUTIVE_MALFORMED_FRAMES: u32 = 5;

/// A decoded provider frame: the `type` discriminator plus the full payload.
#[derive(Debug, Clone)]
pub struct StreamEvent {
    pub kind: String,
    pub data: Value,
}

impl StreamEvent {
    /// Decode one `data:` payload.  Returns `None` for payloads that are not
    /// JSON objects — the caller decides what non-JSON sentinels (e.g. the
    /// chat `[DONE]` marker) mean.
    pub fn decode(payload: &str) -> Option<Self> {
        let data: Value = serde_json::from_str(payload).ok()?;
        let kind = data["type"].as_str().unwrap_or_default().to_string();
        Some(Self { kind, data })
    }
}

/// Drain all complete `\n`-terminated lines from `buf` and return the
/// payloads of `data:` lines.  The trailing incomplete line (if any) stays
/// in `buf` for the next chunk.
pub fn drain_data_lines(buf: &mut String) -> Vec<String> {
    let mut payloads = Vec::new();
    while let Some(nl_pos) = buf.find('\n') {
        let line = buf[..nl_pos].trim_end_matches('\r').to_string();
        buf.drain(..=nl_pos);
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        if let Some(data) = line.strip_prefix("data:") {
            let data = data.trim();
            if !data.is_empty() {
                payloads.push(data.to_string());
            }
        }
    }
    payloads
}

// ─── Tool-call collector ──────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct PendingCall {
    name: String,
    arguments: String,
}

/// Per-stream accumulation state for streamed tool calls.
///
/// The Responses wire format announces a call on `output_item.added`, streams
/// argument fragments keyed by *item* id, and then finalizes the call with up
/// to two events (`function_call_arguments.done` and `output_item.done`),
/// either of which may carry a full argument snapshot.  The collector turns
/// that into exactly one emission per call id.
///
/// Lives for the duration of one stream; never shared across turns.
#[derive(Debug, Default)]
pub struct ToolCallCollector {
    calls: HashMap<String, PendingCall>,
    item_to_call: HashMap<String, String>,
    emitted: HashSet<String>,
}

impl ToolCallCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a newly announced call.  `snapshot` is the argument string the
    /// announcement carried (often empty).
    pub fn begin_call(&mut self, call_id: &str, item_id: Option<&str>, name: &str, snapshot: &str) {
        if let Some(item) = item_id.filter(|s| !s.is_empty()) {
            self.item_to_call.insert(item.to_string(), call_id.to_string());
        }
        let entry = self.calls.entry(call_id.to_string()).or_default();
        if !name.is_empty() {
            entry.name = name.to_string();
        }
        if !snapshot.is_empty() {
            entry.arguments = snapshot.to_string();
        }
    }

    /// Resolve a call id from either identifier; argument deltas reference
    /// the item id, completion events usually carry the call id.
    pub fn resolve_call_id(&self, call_id: Option<&str>, item_id: Option<&str>) -> Option<String> {
        if let Some(id) = call_id.filter(|s| !s.is_empty()) {
            return Some(id.to_string());
        }
        item_id
            .filter(|s| !s.is_empty())
            .and_then(|item| self.item_to_call.get(item).cloned())
    }

    /// Append a streamed argument fragment, addressed by item id with call-id
    /// fallback.  Unknown ids are ignored (the announcement frame was lost).
    pub fn append_arguments(&mut self, call_id: Option<&str>, item_id: Option<&str>, delta: &str) {
        let Some(id) = self.resolve_call_id(call_id, item_id) else {
            return;
        };
        if let Some(call) = self.calls.get_mut(&id) {
            call.arguments.push_str(delta);
        }
    }

    pub fn name_for(&self, call_id: &str) -> Option<&str> {
        self.calls
            .get(call_id)
            .map(|c| c.name.as_str())
            .filter(|n| !n.is_empty())
    }

    /// The final argument string for a call.  A snapshot carried by the
    /// completion event is preferred only when the accumulator is empty or
    /// holds the `{}` placeholder; otherwise the accumulated fragments win.
    pub fn final_arguments(&self, call_id: &str, snapshot: Option<&str>) -> String {
        let accumulated = self
            .calls
            .get(call_id)
            .map(|c| c.arguments.as_str())
            .unwrap_or("");
        match snapshot.filter(|s| !s.is_empty()) {
            Some(snap) if accumulated.is_empty() || accumulated == "{}" => snap.to_string(),
            _ => accumulated.to_string(),
        }
    }

    /// Returns `true` exactly once per call id.  The Responses stream ends a
    /// call with two events; the first caller wins and the second is
    /// suppressed.
    pub fn mark_emitted(&mut self, call_id: &str) -> bool {
        self.emitted.insert(call_id.to_string())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
