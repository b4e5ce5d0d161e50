// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Status of a single plan step, as reported by `update_plan` expansions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStepStatus {
    Pending,
    InProgress,
    Completed,
    Done,
    Failed,
}

impl PlanStepStatus {
    /// Parse a status label; unknown labels map to `Pending`.
    pub fn parse(label: &str) -> Self {
        match label {
            "pending" => Self::Pending,
            "in_progress" => Self::InProgress,
            "completed" => Self::Completed,
            "done" => Self::Done,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

/// Token usage reported by a provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
}

/// The uniform event vocabulary every adapter produces.
///
/// Exactly one payload is populated per event.  The enum is internally
/// tagged so the JSONL turn logger can persist and replay event sequences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    TextDelta {
        delta: String,
        /// When set, `delta` is the complete final text and replaces any
        /// previously accumulated deltas.
        #[serde(default)]
        complete: bool,
    },
    ThinkingDelta {
        delta: String,
        #[serde(default)]
        complete: bool,
        /// Whether this is a provider-generated summary rather than raw
        /// chain-of-thought.
        #[serde(default)]
        summary: bool,
    },
    ToolCall {
        call_id: String,
        name: String,
        /// JSON-encoded argument object.
        arguments: String,
    },
    ToolResult {
        call_id: String,
        output: String,
        #[serde(default)]
        is_error: bool,
    },
    PlanUpdate {
        step: usize,
        title: String,
        status: PlanStepStatus,
    },
    Preamble {
        text: String,
    },
    Usage(Usage),
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
        message: String,
        #[serde(default)]
        retryable: bool,
    },
    Done,
}

impl EventKind {
    /// Short tag for logging and display.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::TextDelta { .. } => "text_delta",
            Self::ThinkingDelta { .. } => "thinking_delta",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::PlanUpdate { .. } => "plan_update",
            Self::Preamble { .. } => "preamble",
            Self::Usage(_) => "usage",
            Self::Error { .. } => "error",
            Self::Done => "done",
        }
    }

    pub fn text(delta: impl Into<String>) -> Self {
        Self::TextDelta {
            delta: delta.into(),
            complete: false,
        }
    }
}

/// An [`EventKind`] stamped with a monotonic timestamp at emission time.
#[derive(Debug, Clone)]
pub struct TurnEvent {
    pub at: Instant,
    pub kind: EventKind,
}

impl TurnEvent {
    pub fn now(kind: EventKind) -> Self {
        Self {
            at: Instant::now(),
            kind,
        }
    }
}

impl From<EventKind> for TurnEvent {
    fn from(kind: EventKind) -> Self {
        Self::now(kind)
    }
}

/// A tool call surfaced by one turn, in emission order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallInfo {
    pub call_id: String,
    pub name: String,
    pub arguments: String,
}

/// Everything collected from one streamed turn.
#[derive(Debug, Clone, Default)]
pub struct TurnResult {
    pub events: Vec<TurnEvent>,
    /// Final assistant text per the accumulation rule: deltas append, a
    /// `complete` delta replaces everything accumulated so far.
    pub final_text: String,
    /// The last usage event seen, if any.
    pub usage: Option<Usage>,
    pub duration: Duration,
    pub tool_calls: Vec<ToolCallInfo>,
}

impl TurnResult {
    /// Fold one event into the result.  Both the tool loop and the
    /// single-turn collector route every event through here so the
    /// accumulation rules live in exactly one place.
    pub fn absorb(&mut self, event: &TurnEvent) {
        match &event.kind {
            EventKind::TextDelta { delta, complete } => {
                if *complete {
                    self.final_text = delta.clone();
                } else {
                    self.final_text.push_str(delta);
                }
            }
            EventKind::ToolCall {
                call_id,
                name,
                arguments,
            } => {
                self.tool_calls.push(ToolCallInfo {
                    call_id: call_id.clone(),
                    name: name.clone(),
                    arguments: arguments.clone(),
                });
            }
            EventKind::Usage(u) => self.usage = Some(*u),
            _ => {}
        }
        self.events.push(event.clone());
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
