// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Provider adapters and the uniform turn/event model.
//!
//! Three adapters translate distinct upstream wire protocols into one event
//! stream:
//!
//! - [`ResponsesAdapter`] — the Codex/ChatGPT Responses SSE API
//! - [`AnthropicAdapter`] — the Anthropic Messages SSE API
//! - [`ChatCompletionsAdapter`] — any OpenAI-compatible chat-completions
//!   endpoint
//!
//! Supporting modules carry the pieces the adapters share: the SSE line
//! parser and tool-call collector ([`sse`]), the strict-schema rewriter
//! ([`schema`]), tool-argument cleanup ([`arguments`]), retry/refresh
//! plumbing ([`http`]), and the model registry ([`registry`]).

pub mod arguments;
pub mod catalog;
pub mod http;
pub mod registry;
pub mod schema;
pub mod sse;

mod anthropic;
mod chat;
mod event;
mod mock;
mod provider;
mod responses;
mod types;

pub use anthropic::AnthropicAdapter;
pub use chat::{AuthStyle, ChatCompletionsAdapter, API_KEY_METADATA_KEY};
pub use event::{EventKind, PlanStepStatus, ToolCallInfo, TurnEvent, TurnResult, Usage};
pub use mock::{MockAdapter, ScriptedAdapter};
pub use provider::{Adapter, EventStream};
pub use responses::ResponsesAdapter;
pub use types::{
    AgentsDoc, ApprovalMode, CollaborationMode, Effort, Environment, Message, Permissions,
    ReasoningConfig, Role, ToolSpec, Turn, UserContext,
};
