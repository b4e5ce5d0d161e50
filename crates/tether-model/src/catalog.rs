// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Model catalog: static token-limit metadata for known models.
//!
//! The catalog feeds defaults the wire protocols need (the Messages API
//! requires an explicit `max_tokens`) and supplies the candidate id lists
//! for the registry's latest-version picker.  Unknown models simply fall
//! back to the caller-supplied default — the catalog is advisory, never a
//! gate.

/// Metadata for a single model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    /// Model identifier as sent on the wire.
    pub id: &'static str,
    /// Adapter family id (see [`crate::registry`]).
    pub family: &'static str,
    /// Total context window in tokens.
    pub context_window: u32,
    /// Maximum output tokens per completion.
    pub max_output_tokens: u32,
}

pub static CATALOG: &[CatalogEntry] = &[
    // ── Responses family ──────────────────────────────────────────────────────
    CatalogEntry {
        id: "gpt-5",
        family: "responses",
        context_window: 400_000,
        max_output_tokens: 128_000,
    },
    CatalogEntry {
        id: "gpt-5-codex",
        family: "responses",
        context_window: 400_000,
        max_output_tokens: 128_000,
    },
    CatalogEntry {
        id: "gpt-4.1",
        family: "responses",
        context_window: 1_047_576,
        max_output_tokens: 32_768,
    },
    CatalogEntry {
        id: "o3",
        family: "responses",
        context_window: 200_000,
        max_output_tokens: 100_000,
    },
    CatalogEntry {
        id: "codex-mini-latest",
        family: "responses",
        context_window: 200_000,
        max_output_tokens: 100_000,
    },
    // ── Anthropic family ──────────────────────────────────────────────────────
    CatalogEntry {
        id: "claude-opus-4-6",
        family: "anthropic",
        context_window: 200_000,
        max_output_tokens: 32_000,
    },
    CatalogEntry {
        id: "claude-sonnet-4-5",
        family: "anthropic",
        context_window: 200_000,
        max_output_tokens: 64_000,
    },
    CatalogEntry {
        id: "claude-sonnet-4-5-20250929",
        family: "anthropic",
        context_window: 200_000,
        max_output_tokens: 64_000,
    },
    CatalogEntry {
        id: "claude-haiku-4-5",
        family: "anthropic",
        context_window: 200_000,
        max_output_tokens: 8_192,
    },
    // ── Chat family (common OpenAI-compatible hosts) ──────────────────────────
    CatalogEntry {
        id: "llama-3.3-70b-versatile",
        family: "chat",
        context_window: 131_072,
        max_output_tokens: 32_768,
    },
    CatalogEntry {
        id: "deepseek-chat",
        family: "chat",
        context_window: 128_000,
        max_output_tokens: 8_192,
    },
];

/// Look up a model by family and id.
pub fn lookup(family: &str, model_id: &str) -> Option<&'static CatalogEntry> {
    CATALOG
        .iter()
        .find(|e| e.family == family && e.id == model_id)
}

/// Look up a model by bare id across all families.
pub fn lookup_by_model_name(model_id: &str) -> Option<&'static CatalogEntry> {
    CATALOG.iter().find(|e| e.id == model_id)
}

/// Max output tokens for a model, or `default` when unknown.
pub fn max_output_tokens(family: &str, model_id: &str, default: u32) -> u32 {
    lookup(family, model_id)
        .map(|e| e.max_output_tokens)
        .unwrap_or(default)
}

/// Context window for a model, or `default` when unknown.
pub fn context_window(family: &str, model_id: &str, default: u32) -> u32 {
    lookup(family, model_id)
        .map(|e| e.context_window)
        .unwrap_or(default)
}

/// All catalog ids belonging to one family, in declaration order.
pub fn ids_for_family(family: &str) -> impl Iterator<Item = &'static str> + '_ {
    CATALOG
        .iter()
        .filter(move |e| e.family == family)
        .map(|e| e.id)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
