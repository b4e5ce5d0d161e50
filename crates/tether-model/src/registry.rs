// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Model registry: per-adapter alias maps, prefix rules, and the
//! latest-version picker.
//!
//! This module is the single source of truth for which model identifiers
//! belong to which adapter family.  It contains no construction logic — the
//! embedding application instantiates adapters directly.

use std::collections::HashMap;

/// Matching rules for one adapter family.
#[derive(Debug, Clone)]
pub struct ModelRules {
    /// Adapter family id (`"responses"`, `"anthropic"`, `"chat"`).
    pub adapter: &'static str,
    /// Alias → canonical id.  Keys are stored lowercase; lookups are
    /// case-insensitive.
    pub aliases: &'static [(&'static str, &'static str)],
    /// Model-id prefixes claimed by this family.
    pub prefixes: &'static [&'static str],
    /// Exact non-prefix matches.
    pub exact: &'static [&'static str],
}

pub static RESPONSES_RULES: ModelRules = ModelRules {
    adapter: "responses",
    aliases: &[
        ("gpt5", "gpt-5"),
        ("gpt5-codex", "gpt-5-codex"),
        ("codex", "gpt-5-codex"),
        ("codex-mini", "codex-mini-latest"),
    ],
    prefixes: &["gpt-", "o3", "o4", "codex-"],
    exact: &["codex-mini-latest"],
};

pub static ANTHROPIC_RULES: ModelRules = ModelRules {
    adapter: "anthropic",
    aliases: &[
        ("opus", "claude-opus-4-6"),
        ("sonnet", "claude-sonnet-4-5"),
        ("haiku", "claude-haiku-4-5"),
    ],
    prefixes: &["claude-"],
    exact: &[],
};

/// The chat family carries no rules of its own: it is the fallback for any
/// OpenAI-compatible endpoint.
pub static CHAT_RULES: ModelRules = ModelRules {
    adapter: "chat",
    aliases: &[],
    prefixes: &[],
    exact: &[],
};

impl ModelRules {
    /// Expand an alias.  Lookup is case-insensitive; unknown names are
    /// returned unchanged.
    pub fn expand_alias(&self, name: &str) -> String {
        let lower = name.to_ascii_lowercase();
        self.aliases
            .iter()
            .find(|(alias, _)| *alias == lower)
            .map(|(_, resolved)| resolved.to_string())
            .unwrap_or_else(|| name.to_string())
    }

    /// Whether `name` belongs to this family: alias keys, alias values
    /// (case-insensitive), prefixes, and the exact list all count.
    pub fn matches_model(&self, name: &str) -> bool {
        let lower = name.to_ascii_lowercase();
        self.aliases
            .iter()
            .any(|(alias, resolved)| *alias == lower || resolved.eq_ignore_ascii_case(&lower))
            || self.prefixes.iter().any(|p| lower.starts_with(p))
            || self.exact.iter().any(|e| *e == lower)
    }
}

/// Pick the adapter family for a model identifier.  Responses and Anthropic
/// rules are consulted in order; everything else falls back to chat.
pub fn family_for(name: &str) -> &'static str {
    if RESPONSES_RULES.matches_model(name) {
        RESPONSES_RULES.adapter
    } else if ANTHROPIC_RULES.matches_model(name) {
        ANTHROPIC_RULES.adapter
    } else {
        CHAT_RULES.adapter
    }
}

/// Outcome of resolving one alias against a discovery source.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub alias: String,
    pub resolved: String,
    pub changed: bool,
    pub error: Option<String>,
}

/// Overwrite `map` entries whose resolution reported `changed`.  Entries
/// with an error are left alone.  Returns the number of overwrites.
pub fn apply_resolutions(map: &mut HashMap<String, String>, results: &[Resolution]) -> usize {
    let mut applied = 0;
    for r in results {
        if r.error.is_some() || !r.changed {
            continue;
        }
        map.insert(r.alias.clone(), r.resolved.clone());
        applied += 1;
    }
    applied
}

/// Resolve the newest cataloged model id for a prefix within one family —
/// the discovery path behind rolling aliases like `claude-opus-`.
pub fn latest_for_prefix(family: &str, prefix: &str, suffix: Option<&str>) -> Option<String> {
    pick_latest(crate::catalog::ids_for_family(family), prefix, suffix)
}

// ─── Latest-version picker ────────────────────────────────────────────────────

/// Eight-digit segments are release date stamps, not version numbers.
fn is_date_stamp(n: u64) -> bool {
    (10_000_000..100_000_000).contains(&n)
}

#[derive(Debug, PartialEq, Eq)]
struct VersionKey {
    version: Vec<u64>,
    date: Option<u64>,
}

fn version_key(remainder: &str) -> VersionKey {
    let mut version = Vec::new();
    let mut date = None;
    for seg in remainder.split('-').filter(|s| !s.is_empty()) {
        if let Ok(n) = seg.parse::<u64>() {
            if is_date_stamp(n) {
                date = Some(n);
            } else {
                version.push(n);
            }
        }
    }
    VersionKey { version, date }
}

/// Pick the newest model id among `candidates` for a `prefix`.
///
/// Candidates must start with `prefix` (and end with `suffix` when given);
/// the remainder is split on `-` and compared as a numeric version tuple,
/// descending.  Date-stamped builds are tiebreakers within one version: the
/// bare id (the provider's rolling alias) outranks dated snapshots, and
/// newer dates outrank older ones.  An exact match on `prefix` itself
/// short-circuits and wins.
pub fn pick_latest<'a, I>(candidates: I, prefix: &str, suffix: Option<&str>) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut grouped: Vec<(&str, VersionKey)> = Vec::new();
    for c in candidates {
        if c == prefix {
            return Some(prefix.to_string());
        }
        let Some(rest) = c.strip_prefix(prefix) else {
            continue;
        };
        let rest = match suffix {
            Some(sfx) => match rest.strip_suffix(sfx) {
                Some(r) => r,
                None => continue,
            },
            None => rest,
        };
        grouped.push((c, version_key(rest)));
    }

    grouped.sort_by(|(_, a), (_, b)| {
        b.version.cmp(&a.version).then_with(|| match (a.date, b.date) {
            (None, None) => std::cmp::Ordering::Equal,
            (None, Some(_)) => std::cmp::Ordering::Less, // undated first
            (Some(_), None) => std::cmp::Ordering::Greater,
            (Some(da), Some(db)) => db.cmp(&da),
        })
    });
    grouped.first().map(|(id, _)| id.to_string())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_alias_is_case_insensitive() {
        assert_eq!(RESPONSES_RULES.expand_alias("GPT5"), "gpt-5");
        assert_eq!(ANTHROPIC_RULES.expand_alias("Opus"), "claude-opus-4-6");
    }

    #[test]
    fn expand_alias_returns_unknown_unchanged() {
        assert_eq!(RESPONSES_RULES.expand_alias("gpt-4.1"), "gpt-4.1");
        assert_eq!(ANTHROPIC_RULES.expand_alias("claude-x"), "claude-x");
    }

    #[test]
    fn matches_model_by_prefix() {
        assert!(RESPONSES_RULES.matches_model("gpt-5-codex"));
        assert!(RESPONSES_RULES.matches_model("o3-mini"));
        assert!(ANTHROPIC_RULES.matches_model("claude-sonnet-4-5"));
        assert!(!ANTHROPIC_RULES.matches_model("gpt-5"));
    }

    #[test]
    fn matches_model_by_alias_key_and_value() {
        assert!(RESPONSES_RULES.matches_model("codex"));
        assert!(ANTHROPIC_RULES.matches_model("OPUS"));
        // Alias *values* match too.
        assert!(ANTHROPIC_RULES.matches_model("claude-opus-4-6"));
    }

    #[test]
    fn matches_model_by_exact_entry() {
        assert!(RESPONSES_RULES.matches_model("codex-mini-latest"));
    }

    #[test]
    fn family_for_dispatches_to_chat_fallback() {
        assert_eq!(family_for("gpt-5"), "responses");
        assert_eq!(family_for("claude-opus-4-6"), "anthropic");
        assert_eq!(family_for("llama-3.3-70b-versatile"), "chat");
        assert_eq!(family_for("deepseek-chat"), "chat");
    }

    #[test]
    fn apply_resolutions_counts_only_changed_entries() {
        let mut map: HashMap<String, String> = HashMap::from([
            ("opus".into(), "claude-opus-4-5".into()),
            ("sonnet".into(), "claude-sonnet-4-5".into()),
        ]);
        let results = vec![
            Resolution {
                alias: "opus".into(),
                resolved: "claude-opus-4-6".into(),
                changed: true,
                error: None,
            },
            Resolution {
                alias: "sonnet".into(),
                resolved: "claude-sonnet-4-5".into(),
                changed: false,
                error: None,
            },
            Resolution {
                alias: "haiku".into(),
                resolved: "claude-haiku-9".into(),
                changed: true,
                error: Some("discovery failed".into()),
            },
        ];
        let n = apply_resolutions(&mut map, &results);
        assert_eq!(n, 1);
        assert_eq!(map["opus"], "claude-opus-4-6");
        assert_eq!(map["sonnet"], "claude-sonnet-4-5");
        assert!(!map.contains_key("haiku"), "errored resolutions are skipped");
    }

    // ── Latest-version picker ─────────────────────────────────────────────────

    #[test]
    fn picker_prefers_higher_version_tuple() {
        let ids = [
            "claude-opus-4-5",
            "claude-opus-4-6",
            "claude-opus-4-5-20250929",
        ];
        let picked = pick_latest(ids.iter().copied(), "claude-opus-", None);
        assert_eq!(picked.as_deref(), Some("claude-opus-4-6"));
    }

    #[test]
    fn picker_undated_outranks_dated_same_version() {
        let ids = ["claude-sonnet-4-5-20250929", "claude-sonnet-4-5"];
        let picked = pick_latest(ids.iter().copied(), "claude-sonnet-", None);
        assert_eq!(picked.as_deref(), Some("claude-sonnet-4-5"));
    }

    #[test]
    fn picker_newer_date_wins_among_snapshots() {
        let ids = ["claude-haiku-4-5-20240101", "claude-haiku-4-5-20250601"];
        let picked = pick_latest(ids.iter().copied(), "claude-haiku-", None);
        assert_eq!(picked.as_deref(), Some("claude-haiku-4-5-20250601"));
    }

    #[test]
    fn picker_exact_prefix_match_short_circuits() {
        let ids = ["gpt-5", "gpt-5-codex"];
        let picked = pick_latest(ids.iter().copied(), "gpt-5", None);
        assert_eq!(picked.as_deref(), Some("gpt-5"));
    }

    #[test]
    fn picker_honors_suffix_filter() {
        let ids = [
            "claude-opus-4-5-thinking",
            "claude-opus-4-6",
            "claude-opus-4-4-thinking",
        ];
        let picked = pick_latest(ids.iter().copied(), "claude-opus-", Some("-thinking"));
        assert_eq!(picked.as_deref(), Some("claude-opus-4-5-thinking"));
    }

    #[test]
    fn picker_returns_none_without_matches() {
        let ids = ["gpt-5", "gpt-5-codex"];
        assert!(pick_latest(ids.iter().copied(), "claude-", None).is_none());
    }

    #[test]
    fn latest_for_prefix_resolves_from_catalog() {
        let picked = latest_for_prefix("anthropic", "claude-sonnet-", None);
        assert_eq!(picked.as_deref(), Some("claude-sonnet-4-5"));
        assert!(latest_for_prefix("anthropic", "gpt-", None).is_none());
    }

    #[test]
    fn version_key_separates_dates_from_versions() {
        let k = version_key("4-5-20250929");
        assert_eq!(k.version, vec![4, 5]);
        assert_eq!(k.date, Some(20250929));
    }

    #[test]
    fn alias_tables_use_lowercase_keys() {
        for rules in [&RESPONSES_RULES, &ANTHROPIC_RULES] {
            for (alias, _) in rules.aliases {
                assert_eq!(*alias, alias.to_ascii_lowercase(), "alias keys must be lowercase");
            }
        }
    }
}
