// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

// ─── Message types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

/// A single message in the conversation history.
///
/// Assistant tool-call echoes carry the tool name in `name` and the
/// JSON-encoded arguments in `content`.  Tool-result messages must reference
/// the originating call through `tool_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: text.into(),
            tool_id: None,
            name: None,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: text.into(),
            tool_id: None,
            name: None,
        }
    }

    /// An assistant echo of a tool call the model made; `arguments` is the
    /// JSON-encoded argument object.
    pub fn tool_call(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            role: Role::Assistant,
            content: arguments.into(),
            tool_id: Some(id.into()),
            name: Some(name.into()),
        }
    }

    pub fn tool_result(id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: output.into(),
            tool_id: Some(id.into()),
            name: None,
        }
    }

    /// Whether this assistant message is a tool-call echo rather than text.
    pub fn is_tool_call(&self) -> bool {
        self.role == Role::Assistant && self.tool_id.is_some()
    }
}

/// A tool schema offered to the model.  The schema is a free-form JSON
/// Schema map; strict providers run it through [`crate::schema`] first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

// ─── Turn configuration ───────────────────────────────────────────────────────

/// Where the request will run: surfaced to the model through the
/// `<environment_context>` block of the system prompt.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Environment {
    #[serde(default)]
    pub working_directory: String,
    #[serde(default)]
    pub shell: String,
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub os: String,
    /// Sandbox label; `"network-off"` disables the NetworkAccess line in the
    /// sandbox prompt section.
    #[serde(default)]
    pub sandbox: String,
    /// Extra attributes emitted as one XML element each.  Ordered so the
    /// composed prompt is deterministic.
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

/// Approval mode for tool execution.  Parsed case-insensitively with the
/// historical aliases accepted by the original CLI surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApprovalMode {
    FullAuto,
    Suggest,
    AskEveryTime,
    Never,
    OnFailure,
    #[default]
    OnRequest,
}

impl ApprovalMode {
    /// Parse a label, accepting aliases.  Unknown labels fall back to the
    /// documented default (`on-request`).
    pub fn parse(label: &str) -> Self {
        match label.to_ascii_lowercase().as_str() {
            "full-auto" | "full_auto" | "auto" | "yolo" => Self::FullAuto,
            "suggest" => Self::Suggest,
            "ask-every-time" | "ask_every_time" | "untrusted" | "ask" => Self::AskEveryTime,
            "never" => Self::Never,
            "on-failure" | "on_failure" => Self::OnFailure,
            "on-request" | "on_request" => Self::OnRequest,
            _ => Self::OnRequest,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FullAuto => "full-auto",
            Self::Suggest => "suggest",
            Self::AskEveryTime => "ask-every-time",
            Self::Never => "never",
            Self::OnFailure => "on-failure",
            Self::OnRequest => "on-request",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Permissions {
    #[serde(default)]
    pub approval: ApprovalMode,
    #[serde(default)]
    pub allowed_tools: Vec<String>,
    /// Sandbox-policy label for the prompt composer.  Unknown labels fall
    /// back to `workspace-write`.
    #[serde(default)]
    pub sandbox_policy: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effort {
    Low,
    #[default]
    Medium,
    High,
}

impl Effort {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ReasoningConfig {
    #[serde(default)]
    pub effort: Effort,
    /// Ask the provider to stream reasoning summaries when supported.
    #[serde(default)]
    pub summaries: bool,
    /// Explicit thinking budget in tokens.  Providers that model thinking as
    /// a budget (Anthropic) apply their effort defaults when this is unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_tokens: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollaborationMode {
    #[default]
    Default,
    Plan,
}

/// Project-level context the caller wants surfaced to the model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserContext {
    /// AGENTS.md contents, injected into the system prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agents_doc: Option<AgentsDoc>,
    /// A secondary context document appended after the AGENTS block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_doc: Option<String>,
    #[serde(default)]
    pub collaboration: CollaborationMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentsDoc {
    /// Directory the document was found in; defaults to `.`.
    #[serde(default)]
    pub directory: String,
    pub content: String,
}

// ─── Turn ─────────────────────────────────────────────────────────────────────

/// The per-request input to an adapter.
///
/// Turns are never mutated by the library; the tool loop clones a turn and
/// appends messages to the clone when constructing the follow-up request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Turn {
    /// Model identifier, possibly an alias (see [`crate::registry`]).
    pub model: String,
    /// System-level instructions override, appended last (highest priority)
    /// by the prompt composer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub tools: Vec<ToolSpec>,
    #[serde(default)]
    pub environment: Environment,
    #[serde(default)]
    pub permissions: Permissions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<ReasoningConfig>,
    #[serde(default)]
    pub user_context: UserContext,
    /// Output-token ceiling for providers that require one on the wire.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    /// Free-form metadata.  Well-known keys (for example the chat adapter's
    /// per-request API-key override) are documented on their consumers.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl Turn {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }

    /// A copy of this turn with `extra` messages appended.  Used by the tool
    /// loop to build the follow-up request without aliasing the original.
    pub fn with_appended(&self, extra: &[Message]) -> Self {
        let mut next = self.clone();
        next.messages.extend_from_slice(extra);
        next
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_constructors_set_roles() {
        assert_eq!(Message::user("u").role, Role::User);
        assert_eq!(Message::assistant("a").role, Role::Assistant);
        assert_eq!(Message::tool_result("c1", "out").role, Role::Tool);
    }

    #[test]
    fn tool_call_echo_carries_name_and_arguments() {
        let m = Message::tool_call("c1", "shell", r#"{"command":["ls"]}"#);
        assert!(m.is_tool_call());
        assert_eq!(m.name.as_deref(), Some("shell"));
        assert_eq!(m.content, r#"{"command":["ls"]}"#);
        assert_eq!(m.tool_id.as_deref(), Some("c1"));
    }

    #[test]
    fn plain_assistant_message_is_not_tool_call() {
        assert!(!Message::assistant("hi").is_tool_call());
    }

    #[test]
    fn approval_mode_aliases() {
        assert_eq!(ApprovalMode::parse("full-auto"), ApprovalMode::FullAuto);
        assert_eq!(ApprovalMode::parse("AUTO"), ApprovalMode::FullAuto);
        assert_eq!(ApprovalMode::parse("untrusted"), ApprovalMode::AskEveryTime);
        assert_eq!(ApprovalMode::parse("on_failure"), ApprovalMode::OnFailure);
        assert_eq!(ApprovalMode::parse("suggest"), ApprovalMode::Suggest);
        assert_eq!(ApprovalMode::parse("never"), ApprovalMode::Never);
    }

    #[test]
    fn unknown_approval_label_falls_back_to_on_request() {
        assert_eq!(ApprovalMode::parse("what-is-this"), ApprovalMode::OnRequest);
    }

    #[test]
    fn with_appended_does_not_mutate_original() {
        let turn = Turn::new("gpt-5");
        let next = turn.with_appended(&[Message::user("follow-up")]);
        assert!(turn.messages.is_empty());
        assert_eq!(next.messages.len(), 1);
    }

    #[test]
    fn environment_attributes_are_ordered() {
        let mut env = Environment::default();
        env.attributes.insert("zeta".into(), "1".into());
        env.attributes.insert("alpha".into(), "2".into());
        let keys: Vec<&String> = env.attributes.keys().collect();
        assert_eq!(keys, vec!["alpha", "zeta"]);
    }

    #[test]
    fn turn_serializes_and_deserializes() {
        let mut turn = Turn::new("claude-opus-4-6");
        turn.messages.push(Message::user("hello"));
        turn.reasoning = Some(ReasoningConfig {
            effort: Effort::High,
            summaries: true,
            budget_tokens: None,
        });
        let json = serde_json::to_string(&turn).unwrap();
        let back: Turn = serde_json::from_str(&json).unwrap();
        assert_eq!(back.model, "claude-opus-4-6");
        assert_eq!(back.messages.len(), 1);
        assert_eq!(back.reasoning.unwrap().effort, Effort::High);
    }
}
