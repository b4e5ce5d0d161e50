// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Strict-mode JSON-schema rewriting.
//!
//! Strict providers reject open objects and optional properties, but caller
//! tool schemas are usually lax.  [`normalize_to_strict`] rewrites a schema
//! so that every object is closed, every property is required, and formerly
//! optional properties accept `null` in addition to their declared type.

use serde_json::{json, Map, Value};

/// Rewrite `schema` into strict form.
///
/// For every object-typed node (or untyped node with `properties` /
/// `required`, whose type is inferred to `"object"`):
///
/// 1. `additionalProperties` is forced to `false` unless already `false`.
/// 2. Properties missing from `required` are made nullable and added to it.
/// 3. The walk recurses through `properties`, `items`, `prefixItems`,
///    `anyOf`, `oneOf`, and `allOf`.
pub fn normalize_to_strict(schema: &Value) -> Value {
    let mut out = schema.clone();
    normalize_node(&mut out);
    out
}

fn normalize_node(node: &mut Value) {
    let Some(obj) = node.as_object_mut() else {
        return;
    };

    let declared_object = obj.get("type").and_then(Value::as_str) == Some("object");
    let inferred_object = obj.get("type").is_none()
        && (obj.contains_key("properties") || obj.contains_key("required"));

    if declared_object || inferred_object {
        if inferred_object {
            obj.insert("type".into(), json!("object"));
        }
        if obj.get("additionalProperties") != Some(&Value::Bool(false)) {
            obj.insert("additionalProperties".into(), json!(false));
        }

        let already_required: Vec<String> = obj
            .get("required")
            .and_then(Value::as_array)
            .map(|a| {
                a.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let mut required = already_required.clone();
        if let Some(props) = obj.get_mut("properties").and_then(Value::as_object_mut) {
            for (name, prop) in props.iter_mut() {
                if !already_required.iter().any(|r| r == name) {
                    make_nullable(prop);
                    required.push(name.clone());
                }
                normalize_node(prop);
            }
        }
        obj.insert("required".into(), json!(required));
    }

    for key in ["anyOf", "oneOf", "allOf", "prefixItems"] {
        if let Some(branches) = obj.get_mut(key).and_then(Value::as_array_mut) {
            for branch in branches {
                normalize_node(branch);
            }
        }
    }
    if let Some(items) = obj.get_mut("items") {
        match items {
            // Draft-07 tuple form: items as an array of schemas.
            Value::Array(schemas) => {
                for s in schemas {
                    normalize_node(s);
                }
            }
            other => normalize_node(other),
        }
    }
}

/// Make a property schema accept `null` in addition to its declared type.
fn make_nullable(prop: &mut Value) {
    let needs_wrap = match prop.as_object_mut() {
        // Non-object schema (e.g. boolean) — wrap it whole.
        None => true,
        Some(obj) => match obj.get("type").cloned() {
            Some(Value::String(t)) => {
                obj.insert("type".into(), json!([t, "null"]));
                false
            }
            Some(Value::Array(mut types)) => {
                if !types.iter().any(|t| t == "null") {
                    types.push(json!("null"));
                }
                obj.insert("type".into(), Value::Array(types));
                false
            }
            _ => {
                if let Some(any_of) = obj.get_mut("anyOf").and_then(Value::as_array_mut) {
                    let has_null = any_of
                        .iter()
                        .any(|b| b.get("type").map(|t| t == "null").unwrap_or(false));
                    if !has_null {
                        any_of.push(json!({ "type": "null" }));
                    }
                    false
                } else {
                    true
                }
            }
        },
    };
    if needs_wrap {
        wrap_in_any_of(prop);
    }
}

fn wrap_in_any_of(prop: &mut Value) {
    let original = prop.take();
    let mut wrapper = Map::new();
    wrapper.insert("anyOf".into(), json!([original, { "type": "null" }]));
    *prop = Value::Object(wrapper);
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
