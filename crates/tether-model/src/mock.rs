// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;

use crate::{
    event::{EventKind, TurnEvent, Usage},
    provider::{Adapter, EventStream},
    types::{Role, Turn},
};

/// Deterministic mock adapter for tests.  Echoes the last user message back
/// as the assistant response.
#[derive(Default)]
pub struct MockAdapter;

#[async_trait]
impl Adapter for MockAdapter {
    fn name(&self) -> &str {
        "mock"
    }

    async fn stream_turn(&self, turn: &Turn) -> anyhow::Result<EventStream> {
        let reply = turn
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("[no input]")
            .to_string();

        let events: Vec<anyhow::Result<TurnEvent>> = vec![
            Ok(TurnEvent::now(EventKind::text(format!("MOCK: {reply}")))),
            Ok(TurnEvent::now(EventKind::Usage(Usage {
                input_tokens: 10,
                output_tokens: 10,
                total_tokens: Some(20),
            }))),
            Ok(TurnEvent::now(EventKind::Done)),
        ];
        Ok(Box::pin(stream::iter(events)))
    }
}

/// A pre-scripted adapter.  Each `stream_turn` call pops the next event
/// script from the front of the queue, so tests can specify exact event
/// sequences — including tool calls — without network access.
pub struct ScriptedAdapter {
    scripts: Arc<Mutex<Vec<Vec<EventKind>>>>,
    /// The last [`Turn`] seen by this adapter.  Written on each call so
    /// tests can inspect what the loop actually sent.
    pub last_turn: Arc<Mutex<Option<Turn>>>,
}

impl ScriptedAdapter {
    /// The outer `Vec` is the ordered list of calls; the inner `Vec` is the
    /// event sequence emitted for that call.
    pub fn new(scripts: Vec<Vec<EventKind>>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(scripts)),
            last_turn: Arc::new(Mutex::new(None)),
        }
    }

    /// Convenience: adapter that always returns a single text reply.
    pub fn always_text(reply: impl Into<String>) -> Self {
        let reply = reply.into();
        Self::new(vec![vec![
            EventKind::text(reply),
            EventKind::Usage(Usage {
                input_tokens: 5,
                output_tokens: 5,
                total_tokens: None,
            }),
            EventKind::Done,
        ]])
    }

    /// Convenience: a tool call on the first turn, text on the second.
    pub fn tool_then_text(
        call_id: impl Into<String>,
        name: impl Into<String>,
        args_json: impl Into<String>,
        final_text: impl Into<String>,
    ) -> Self {
        Self::new(vec![
            vec![
                EventKind::ToolCall {
                    call_id: call_id.into(),
                    name: name.into(),
                    arguments: args_json.into(),
                },
                EventKind::Done,
            ],
            vec![
                EventKind::text(final_text),
                EventKind::Usage(Usage {
                    input_tokens: 8,
                    output_tokens: 4,
                    total_tokens: None,
                }),
                EventKind::Done,
            ],
        ])
    }
}

#[async_trait]
impl Adapter for ScriptedAdapter {
    fn name(&self) -> &str {
        "scripted-mock"
    }

    async fn stream_turn(&self, turn: &Turn) -> anyhow::Result<EventStream> {
        *self.last_turn.lock().unwrap() = Some(turn.clone());
        let events = {
            let mut scripts = self.scripts.lock().unwrap();
            if scripts.is_empty() {
                vec![EventKind::text("[no more scripts]"), EventKind::Done]
            } else {
                scripts.remove(0)
            }
        };
        let wrapped: Vec<anyhow::Result<TurnEvent>> =
            events.into_iter().map(|k| Ok(TurnEvent::now(k))).collect();
        Ok(Box::pin(stream::iter(wrapped)))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
