// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The provider-neutral tool loop.
//!
//! One call to [`run_tool_loop`] drives a model through up to `max_turns`
//! streamed turns: each turn's tool calls are executed through the caller's
//! [`ToolHandler`], the call/result pair is appended to a cloned turn, and
//! the follow-up turn is streamed — until a turn produces no tool calls.
//! Actual tool execution is entirely the handler's business; the loop only
//! moves messages.

use std::time::Instant;

use async_trait::async_trait;
use futures::StreamExt;
use tracing::debug;

use tether_model::{
    Adapter, EventKind, Message, ToolCallInfo, ToolSpec, Turn, TurnEvent, TurnResult,
};

/// Result of executing one tool call.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub output: String,
    pub is_error: bool,
}

impl ToolOutcome {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            is_error: false,
        }
    }

    pub fn err(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            is_error: true,
        }
    }
}

/// Executes model-emitted tool calls.
///
/// A handler error aborts the loop and propagates ([`LoopError`] carries the
/// partial result); a tool that *failed* but should be reported back to the
/// model returns `Ok(ToolOutcome::err(..))` instead.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn handle(&self, call: &ToolCallInfo) -> anyhow::Result<ToolOutcome>;

    /// The tool specs offered to the model when the turn carries none.
    fn available(&self) -> Vec<ToolSpec>;
}

/// Inline event observer.  Runs on the streaming task — keep it fast, a slow
/// hook backpressures the upstream read.
pub type EventHook = Box<dyn Fn(&TurnEvent) + Send + Sync>;

pub struct LoopOptions {
    /// Maximum streamed turns, tool round-trips included.
    pub max_turns: u32,
    /// Output-token ceiling stamped onto every turn the loop sends.
    pub max_tokens: Option<u32>,
    pub on_event: Option<EventHook>,
}

impl Default for LoopOptions {
    fn default() -> Self {
        Self {
            max_turns: 10,
            max_tokens: None,
            on_event: None,
        }
    }
}

/// A loop failure carrying everything collected before the error.
#[derive(Debug, thiserror::Error)]
#[error("{source}")]
pub struct LoopError {
    pub partial: TurnResult,
    #[source]
    pub source: anyhow::Error,
}

/// Marker error for context cancellation; downcast from
/// [`LoopError::source`] to distinguish it from upstream failures.
#[derive(Debug, thiserror::Error)]
#[error("turn cancelled")]
pub struct Cancelled;

fn finished(mut result: TurnResult, started: Instant) -> TurnResult {
    result.duration = started.elapsed();
    result
}

/// Stream one turn and collect it into a [`TurnResult`].
///
/// Shared by the loop and usable standalone for tool-free turns.
pub async fn stream_and_collect(
    adapter: &dyn Adapter,
    turn: &Turn,
) -> Result<TurnResult, LoopError> {
    let started = Instant::now();
    let mut result = TurnResult::default();
    let mut stream = match adapter.stream_turn(turn).await {
        Ok(s) => s,
        Err(source) => {
            return Err(LoopError {
                partial: finished(result, started),
                source,
            })
        }
    };
    while let Some(item) = stream.next().await {
        match item {
            Ok(event) => {
                let done = event.kind == EventKind::Done;
                result.absorb(&event);
                if done {
                    break;
                }
            }
            Err(source) => {
                return Err(LoopError {
                    partial: finished(result, started),
                    source,
                })
            }
        }
    }
    Ok(finished(result, started))
}

/// Drive the full agentic loop.  See the module docs for the algorithm.
pub async fn run_tool_loop(
    adapter: &dyn Adapter,
    turn: &Turn,
    handler: &dyn ToolHandler,
    options: &LoopOptions,
) -> Result<TurnResult, LoopError> {
    run_loop_inner(adapter, turn, handler, options, None).await
}

/// Like [`run_tool_loop`] with a cancellation channel.  Sending on (or
/// dropping) the paired sender aborts the current stream; the partial
/// combined result is returned inside the [`LoopError`], whose source
/// downcasts to [`Cancelled`].
pub async fn run_tool_loop_with_cancel(
    adapter: &dyn Adapter,
    turn: &Turn,
    handler: &dyn ToolHandler,
    options: &LoopOptions,
    cancel: tokio::sync::oneshot::Receiver<()>,
) -> Result<TurnResult, LoopError> {
    run_loop_inner(adapter, turn, handler, options, Some(cancel)).await
}

async fn run_loop_inner(
    adapter: &dyn Adapter,
    turn: &Turn,
    handler: &dyn ToolHandler,
    options: &LoopOptions,
    mut cancel: Option<tokio::sync::oneshot::Receiver<()>>,
) -> Result<TurnResult, LoopError> {
    let started = Instant::now();
    let mut combined = TurnResult::default();

    let mut current = turn.clone();
    if current.tools.is_empty() {
        current.tools = handler.available();
    }
    if options.max_tokens.is_some() {
        current.max_output_tokens = options.max_tokens;
    }

    // If the caller cancelled before we started, skip the first request too.
    if let Some(rx) = cancel.as_mut() {
        if !matches!(
            rx.try_recv(),
            Err(tokio::sync::oneshot::error::TryRecvError::Empty)
        ) {
            return Err(LoopError {
                partial: finished(combined, started),
                source: anyhow::Error::new(Cancelled),
            });
        }
    }

    for round in 0..options.max_turns {
        debug!(round, messages = current.messages.len(), "starting loop turn");
        let mut stream = match adapter.stream_turn(&current).await {
            Ok(s) => s,
            Err(source) => {
                return Err(LoopError {
                    partial: finished(combined, started),
                    source,
                })
            }
        };

        let mut round_calls: Vec<ToolCallInfo> = Vec::new();
        loop {
            let item = match cancel.as_mut() {
                Some(rx) => {
                    tokio::select! {
                        biased;
                        _ = &mut *rx => {
                            // Dropping the stream closes the HTTP response.
                            drop(stream);
                            return Err(LoopError {
                                partial: finished(combined, started),
                                source: anyhow::Error::new(Cancelled),
                            });
                        }
                        item = stream.next() => item,
                    }
                }
                None => stream.next().await,
            };
            let Some(item) = item else {
                break;
            };
            match item {
                Ok(event) => {
                    if let Some(hook) = &options.on_event {
                        hook(&event);
                    }
                    let done = event.kind == EventKind::Done;
                    if let EventKind::ToolCall {
                        call_id,
                        name,
                        arguments,
                    } = &event.kind
                    {
                        round_calls.push(ToolCallInfo {
                            call_id: call_id.clone(),
                            name: name.clone(),
                            arguments: arguments.clone(),
                        });
                    }
                    combined.absorb(&event);
                    if done {
                        break;
                    }
                }
                Err(source) => {
                    return Err(LoopError {
                        partial: finished(combined, started),
                        source,
                    })
                }
            }
        }

        if round_calls.is_empty() {
            break;
        }

        // Execute each call and build the follow-up message pairs: the
        // assistant's tool-call echo, then the tool result.
        let mut followups: Vec<Message> = Vec::with_capacity(round_calls.len() * 2);
        for call in &round_calls {
            let outcome = match handler.handle(call).await {
                Ok(o) => o,
                Err(source) => {
                    return Err(LoopError {
                        partial: finished(combined, started),
                        source: source.context(format!("tool handler failed for {}", call.name)),
                    })
                }
            };
            followups.push(Message::tool_call(&call.call_id, &call.name, &call.arguments));
            followups.push(Message::tool_result(&call.call_id, &outcome.output));

            let event = TurnEvent::now(EventKind::ToolResult {
                call_id: call.call_id.clone(),
                output: outcome.output,
                is_error: outcome.is_error,
            });
            if let Some(hook) = &options.on_event {
                hook(&event);
            }
            combined.absorb(&event);
        }
        current = current.with_appended(&followups);
    }

    Ok(finished(combined, started))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
