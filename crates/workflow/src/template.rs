// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Loom contributors

//! Renders a step's input template against the execution `context`
//! (spec.md §4.7 "`input` template ... may reference prior step outputs").
//!
//! Placeholders look like `${steps.A.out.field}`. A string leaf that is
//! *exactly* one placeholder is replaced by the referenced JSON value,
//! preserving its type (so a step can pass through an object or number).
//! A placeholder embedded in a larger string is stringified in place.

use serde_json::Value;

/// Look up a dotted path (`steps.A.out.field`) inside a JSON context.
pub fn lookup<'a>(context: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = context;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn render_string(template: &str, context: &Value) -> Value {
    if let Some(path) = whole_placeholder(template) {
        return lookup(context, path).cloned().unwrap_or(Value::Null);
    }

    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let path = &after[..end];
                let resolved = lookup(context, path).map(stringify).unwrap_or_default();
                out.push_str(&resolved);
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);
    Value::String(out)
}

/// If `s` is exactly `${path}` with no surrounding text, returns `path`.
fn whole_placeholder(s: &str) -> Option<&str> {
    let inner = s.strip_prefix("${")?.strip_suffix('}')?;
    if inner.contains("${") {
        None
    } else {
        Some(inner)
    }
}

/// Recursively render every string leaf of `template` against `context`.
pub fn render(template: &Value, context: &Value) -> Value {
    match template {
        Value::String(s) => render_string(s, context),
        Value::Array(items) => Value::Array(items.iter().map(|v| render(v, context)).collect()),
        Value::Object(map) => {
            Value::Object(map.iter().map(|(k, v)| (k.clone(), render(v, context))).collect())
        }
        other => other.clone(),
    }
}

#[cfg(test)]
#[path = "template_tests.rs"]
mod tests;
