// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Tool-argument cleanup.
//!
//! Some providers emit one frame containing several concatenated JSON values
//! for a single call (typically an empty `{}` placeholder followed by the
//! real arguments).  Models also occasionally produce invalid escape
//! sequences inside argument strings.  [`normalize_arguments`] repairs what
//! it can and leaves the rest untouched — the raw string is always preferred
//! over data loss.

use serde_json::Value;

/// Normalize a streamed argument string.
///
/// 1. Parse the input as a sequence of concatenated JSON values and keep the
///    last one; on any parse failure (after an escape-repair attempt) the
///    raw string is returned unchanged.
/// 2. Recursively drop object entries whose value is JSON `null`; scalars,
///    arrays, and nested objects are kept intact.
/// 3. Re-serialize.
pub fn normalize_arguments(raw: &str) -> String {
    let value = match last_concatenated_value(raw) {
        Some(v) => v,
        None => {
            let repaired = fix_invalid_json_escapes(raw);
            match last_concatenated_value(&repaired) {
                Some(v) => {
                    tracing::warn!("repaired invalid escape sequences in tool arguments");
                    v
                }
                None => return raw.to_string(),
            }
        }
    };
    let cleaned = strip_null_entries(value);
    serde_json::to_string(&cleaned).unwrap_or_else(|_| raw.to_string())
}

/// Parse `raw` as concatenated JSON values and return the last one.
/// `None` when the input is empty or any value fails to parse.
fn last_concatenated_value(raw: &str) -> Option<Value> {
    if raw.trim().is_empty() {
        return None;
    }
    let mut last = None;
    for item in serde_json::Deserializer::from_str(raw).into_iter::<Value>() {
        match item {
            Ok(v) => last = Some(v),
            Err(_) => return None,
        }
    }
    last
}

/// Recursively remove `null`-valued entries from every object in `value`.
fn strip_null_entries(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, strip_null_entries(v)))
                .collect(),
        ),
        Value::Array(items) => {
            Value::Array(items.into_iter().map(strip_null_entries).collect())
        }
        other => other,
    }
}

/// Walk a JSON string and re-escape any invalid escape sequence inside string
/// values.  Valid JSON escapes are `"`, `\`, `/`, `b`, `f`, `n`, `r`, `t`,
/// `u`; anything else becomes `\\X` so the value survives the parse.
fn fix_invalid_json_escapes(json_str: &str) -> String {
    let mut result = String::with_capacity(json_str.len() + 16);
    let mut chars = json_str.chars();
    let mut in_string = false;

    while let Some(c) = chars.next() {
        if in_string {
            match c {
                '\\' => match chars.next() {
                    Some(next)
                        if matches!(next, '"' | '\\' | '/' | 'b' | 'f' | 'n' | 'r' | 't' | 'u') =>
                    {
                        result.push('\\');
                        result.push(next);
                    }
                    Some(next) => {
                        result.push('\\');
                        result.push('\\');
                        result.push(next);
                    }
                    None => result.push('\\'),
                },
                '"' => {
                    in_string = false;
                    result.push('"');
                }
                _ => result.push(c),
            }
        } else {
            if c == '"' {
                in_string = true;
            }
            result.push(c);
        }
    }
    result
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
