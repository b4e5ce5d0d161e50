// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! tether — a provider-agnostic agentic LLM harness.
//!
//! tether drives a model through a full tool-calling loop over streaming
//! wire protocols, adapting three upstream shapes (Codex/Responses,
//! Anthropic Messages, and generic OpenAI chat completions) to one uniform
//! event stream and one uniform turn object.
//!
//! ```no_run
//! use std::sync::Arc;
//! use tether::{run_tool_loop, LoopOptions, Message, ResponsesAdapter, Turn};
//!
//! # struct MyTools;
//! # #[async_trait::async_trait]
//! # impl tether::ToolHandler for MyTools {
//! #     async fn handle(&self, _call: &tether::ToolCallInfo) -> anyhow::Result<tether::ToolOutcome> {
//! #         Ok(tether::ToolOutcome::ok("done"))
//! #     }
//! #     fn available(&self) -> Vec<tether::ToolSpec> { vec![] }
//! # }
//! # async fn demo() -> anyhow::Result<()> {
//! let store = tether::auth::CodexAuthStore::load_default()?;
//! let adapter = ResponsesAdapter::new(Arc::new(store));
//! let turn = Turn {
//!     model: "gpt-5".into(),
//!     messages: vec![Message::user("list the files in this repo")],
//!     ..Turn::default()
//! };
//! let result = run_tool_loop(&adapter, &turn, &MyTools, &LoopOptions::default()).await?;
//! println!("{}", result.final_text);
//! # Ok(())
//! # }
//! ```

pub use tether_core::{
    replay, run_tool_loop, run_tool_loop_with_cancel, stream_and_collect, Cancelled, EventHook,
    LoggingAdapter, LoopError, LoopOptions, ToolHandler, ToolOutcome,
};
pub use tether_model::{
    Adapter, AgentsDoc, AnthropicAdapter, ApprovalMode, AuthStyle, ChatCompletionsAdapter,
    CollaborationMode, Effort, Environment, EventKind, EventStream, Message, MockAdapter,
    Permissions, PlanStepStatus, ReasoningConfig, ResponsesAdapter, Role, ScriptedAdapter,
    ToolCallInfo, ToolSpec, Turn, TurnEvent, TurnResult, Usage, UserContext,
};

/// Credential stores and the token-source trait.
pub mod auth {
    pub use tether_auth::*;
}

/// Strict-schema rewriting, argument normalization, registry, and HTTP
/// plumbing, for embedders that need the pieces individually.
pub mod model {
    pub use tether_model::{arguments, catalog, http, registry, schema, sse};
}

/// System-prompt composition and section-marker splicing.
pub mod prompt {
    pub use tether_prompt::*;
}
