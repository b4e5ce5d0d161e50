// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! System-prompt composition.
//!
//! The model-facing system string is assembled from ordered sections — base
//! identity, sandbox policy, approval policy, collaboration mode, an
//! environment XML block, project AGENTS instructions, and finally the
//! caller's own instructions (highest priority).  Non-empty sections are
//! joined by one blank line.
//!
//! The base template embeds `<!-- NAME_START -->…<!-- NAME_END -->` markers
//! around tool guidance so a proxy-mode build can splice caller-appropriate
//! text in (or remove the guidance entirely); see [`splice`].

pub mod splice;

use std::collections::BTreeMap;

/// Borrowed view of the execution environment for the
/// `<environment_context>` block.
#[derive(Debug, Clone, Default)]
pub struct EnvironmentSummary<'a> {
    pub working_directory: &'a str,
    pub shell: &'a str,
    pub platform: &'a str,
    pub os: &'a str,
    /// Sandbox label; `"network-off"` flips the NetworkAccess substitution
    /// in the sandbox section to `disabled`.
    pub sandbox: &'a str,
    pub attributes: Option<&'a BTreeMap<String, String>>,
}

/// AGENTS.md contents plus the directory they were found in.
#[derive(Debug, Clone)]
pub struct AgentsBlock<'a> {
    /// Defaults to `.` when empty.
    pub directory: &'a str,
    pub content: &'a str,
}

/// All inputs to one prompt build.
#[derive(Debug, Clone, Default)]
pub struct PromptContext<'a> {
    /// Sandbox-policy label; unknown labels fall back to `workspace-write`.
    pub sandbox_policy: &'a str,
    /// Approval-mode label; unknown labels fall back to `on-request`.
    pub approval_mode: &'a str,
    /// Collaboration-mode label; empty or `default` adds no section.
    pub collaboration_mode: &'a str,
    pub environment: Option<EnvironmentSummary<'a>>,
    pub agents_doc: Option<AgentsBlock<'a>>,
    /// A secondary context document appended after the AGENTS block.
    pub secondary_doc: Option<&'a str>,
    /// Caller instructions, appended last.
    pub instructions: Option<&'a str>,
}

/// Section names the proxy-mode build may replace.
pub const PROXY_SECTIONS: &[&str] = &[
    "APPLY_PATCH_GUIDANCE",
    "PLAN_TOOL_GUIDANCE",
    "SHELL_GUIDANCE",
];

const BASE_TEMPLATE: &str = "\
You are a coding agent running inside an automated development harness. \
You read and modify files, run commands, and report results through the \
tool protocol offered to you. Be precise, act on the repository as it \
actually is, and prefer tool calls over guessing.

<!-- SHELL_GUIDANCE_START -->
Use the `shell` tool for running commands. Always pass the command as an \
argument vector, set a working directory when the command depends on \
location, and read the output before deciding your next step.
<!-- SHELL_GUIDANCE_END -->

<!-- APPLY_PATCH_GUIDANCE_START -->
Use the `apply_patch` tool to edit files. Patches use the envelope format \
(*** Begin Patch / *** End Patch) with one hunk per file. Keep hunks \
minimal and include enough context for an exact match.
<!-- APPLY_PATCH_GUIDANCE_END -->

<!-- PLAN_TOOL_GUIDANCE_START -->
For multi-step work, keep a plan with the `update_plan` tool. Mark exactly \
one step in_progress at a time and update statuses as you complete them.
<!-- PLAN_TOOL_GUIDANCE_END -->";

fn sandbox_section(policy: &str, network_off: bool) -> String {
    let template = match policy.to_ascii_lowercase().as_str() {
        "read-only" => {
            "Filesystem sandboxing: read-only. You may inspect any file but \
             must not create, modify, or delete files. Network access: \
             {NetworkAccess}."
        }
        "danger-full-access" => {
            "Filesystem sandboxing: disabled. You have full access to the \
             machine. Network access: {NetworkAccess}."
        }
        // workspace-write is the documented fallback for unknown labels.
        _ => {
            "Filesystem sandboxing: workspace-write. You may read anywhere \
             but write only inside the working directory. Network access: \
             {NetworkAccess}."
        }
    };
    let access = if network_off { "disabled" } else { "enabled" };
    template.replace("{NetworkAccess}", access)
}

fn approval_section(mode: &str) -> &'static str {
    match mode.to_ascii_lowercase().as_str() {
        "full-auto" => {
            "Approvals: full-auto. Execute tools without asking; you are \
             accountable for keeping actions reversible."
        }
        "suggest" => {
            "Approvals: suggest. Propose commands and edits; the user applies \
             them."
        }
        "ask-every-time" => {
            "Approvals: ask-every-time. Every tool execution requires \
             explicit user approval first."
        }
        "never" => {
            "Approvals: never. Approval requests are unavailable; work within \
             the sandbox and never ask."
        }
        "on-failure" => {
            "Approvals: on-failure. Tools run sandboxed; only a failed \
             execution may be escalated for approval."
        }
        // on-request is the documented fallback for unknown labels.
        _ => {
            "Approvals: on-request. Run freely inside the sandbox and request \
             approval only when an action needs to leave it."
        }
    }
}

fn collaboration_section(mode: &str) -> Option<&'static str> {
    match mode.to_ascii_lowercase().as_str() {
        "plan" => Some(
            "Collaboration mode: plan. Do not make changes yet — investigate, \
             then present a concrete step-by-step plan and wait for the user \
             to approve it.",
        ),
        _ => None,
    }
}

fn environment_block(env: &EnvironmentSummary<'_>) -> String {
    let mut out = String::from("<environment_context>\n");
    let mut push = |tag: &str, value: &str| {
        if !value.is_empty() {
            out.push_str(&format!("  <{tag}>{value}</{tag}>\n"));
        }
    };
    push("working_directory", env.working_directory);
    push("shell", env.shell);
    push("platform", env.platform);
    push("os", env.os);
    push("sandbox", env.sandbox);
    if let Some(attrs) = env.attributes {
        for (key, value) in attrs {
            push(key, value);
        }
    }
    out.push_str("</environment_context>");
    out
}

fn agents_block(doc: &AgentsBlock<'_>) -> String {
    let dir = if doc.directory.is_empty() {
        "."
    } else {
        doc.directory
    };
    format!(
        "# AGENTS.md instructions for {dir}\n<INSTRUCTIONS>\n{}\n</INSTRUCTIONS>",
        doc.content
    )
}

/// Assemble the sections for `ctx` on top of `base`.
fn compose(base: String, ctx: &PromptContext<'_>) -> String {
    let network_off = ctx
        .environment
        .as_ref()
        .map(|e| e.sandbox == "network-off")
        .unwrap_or(false);

    let mut parts: Vec<String> = vec![base];
    parts.push(sandbox_section(ctx.sandbox_policy, network_off));
    parts.push(approval_section(ctx.approval_mode).to_string());
    if let Some(collab) = collaboration_section(ctx.collaboration_mode) {
        parts.push(collab.to_string());
    }
    if let Some(env) = &ctx.environment {
        parts.push(environment_block(env));
    }
    if let Some(doc) = &ctx.agents_doc {
        parts.push(agents_block(doc));
    }
    if let Some(secondary) = ctx.secondary_doc.filter(|s| !s.trim().is_empty()) {
        parts.push(secondary.to_string());
    }
    if let Some(instructions) = ctx.instructions.filter(|s| !s.trim().is_empty()) {
        parts.push(instructions.to_string());
    }

    parts
        .into_iter()
        .filter(|p| !p.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Build the system prompt for a normal (library) turn.  Marker comments are
/// stripped; the built-in tool guidance stays in place.
pub fn build_system_prompt(ctx: &PromptContext<'_>) -> String {
    compose(splice::strip_markers(BASE_TEMPLATE), ctx)
}

/// Proxy-mode build: each section in [`PROXY_SECTIONS`] is replaced with the
/// caller's text (or removed when no replacement is given), then runs of
/// three or more newlines are collapsed to two.
pub fn build_proxy_prompt(ctx: &PromptContext<'_>, replacements: &[(&str, &str)]) -> String {
    let mut base = BASE_TEMPLATE.to_string();
    for name in PROXY_SECTIONS {
        let replacement = replacements
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, text)| *text)
            .unwrap_or("");
        base = splice::splice_section(&base, name, replacement);
    }
    splice::collapse_newlines(&compose(base, ctx))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
