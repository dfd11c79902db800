//! Repair and extraction of JSON embedded in generated text.
//!
//! Generated text often wraps JSON in code fences or prose, uses single quotes,
//! leaves trailing commas, or is cut off mid-value. [`repair_json`] fixes what
//! it can; the `extract_*` functions then require a specific shape and report
//! everything else as [`MalformedResponse`]. Neither ever panics.

use serde_json::{Map, Value};

/// Generated text could not be turned into the required JSON shape.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed response: {reason}")]
pub struct MalformedResponse {
    pub reason: String,
}

impl MalformedResponse {
    fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Parse a list out of `raw`. String items are kept as-is (trimmed), numbers
/// and booleans are stringified, empty strings, nulls and nested values are
/// dropped.
pub fn extract_list(raw: &str) -> Result<Vec<String>, MalformedResponse> {
    match parse_repaired(raw)? {
        Value::Array(items) => Ok(items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Number(n) => Some(n.to_string()),
                Value::Bool(b) => Some(b.to_string()),
                _ => None,
            })
            .filter(|s| !s.is_empty())
            .collect()),
        other => Err(MalformedResponse::new(format!(
            "expected a list, got {}",
            shape(&other)
        ))),
    }
}

/// Parse an object out of `raw`.
pub fn extract_object(raw: &str) -> Result<Map<String, Value>, MalformedResponse> {
    match parse_repaired(raw)? {
        Value::Object(map) => Ok(map),
        other => Err(MalformedResponse::new(format!(
            "expected an object, got {}",
            shape(&other)
        ))),
    }
}

fn parse_repaired(raw: &str) -> Result<Value, MalformedResponse> {
    let repaired = repair_json(raw);
    serde_json::from_str(&repaired).map_err(|e| MalformedResponse::new(format!("{e}")))
}

fn shape(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

/// Best-effort repair of a JSON fragment.
///
/// 1. keep the inside of the first code fence, if any
/// 2. start at the first `[` or `{` and stop where that value closes
/// 3. rewrite single-quoted strings as double-quoted
/// 4. drop commas directly before a closing bracket
/// 5. close an unterminated string, then any open brackets
pub fn repair_json(raw: &str) -> String {
    let text = strip_code_fence(raw);
    let Some(start) = text.find(['[', '{']) else {
        return text.trim().to_string();
    };

    let mut out = String::with_capacity(text.len() + 8);
    let mut stack: Vec<char> = Vec::new();
    // Quote char of the string being read, if any.
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for ch in text[start..].chars() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
                out.push(ch);
            } else if ch == '\\' {
                escaped = true;
                out.push(ch);
            } else if ch == q {
                quote = None;
                out.push('"');
            } else if ch == '"' {
                // Only reachable inside a single-quoted string.
                out.push_str("\\\"");
            } else if ch == '\n' {
                out.push_str("\\n");
            } else {
                out.push(ch);
            }
            continue;
        }

        match ch {
            '"' | '\'' => {
                quote = Some(ch);
                out.push('"');
            }
            '[' | '{' => {
                stack.push(if ch == '[' { ']' } else { '}' });
                out.push(ch);
            }
            ']' | '}' => {
                trim_trailing_comma(&mut out);
                if stack.pop().is_some() {
                    out.push(ch);
                }
                if stack.is_empty() {
                    return out;
                }
            }
            _ => out.push(ch),
        }
    }

    if quote.is_some() {
        if escaped {
            out.pop();
        }
        out.push('"');
    }
    trim_trailing_comma(&mut out);
    while let Some(close) = stack.pop() {
        out.push(close);
    }
    out
}

fn strip_code_fence(raw: &str) -> &str {
    let Some(open) = raw.find("```") else {
        return raw;
    };
    let after = &raw[open + 3..];
    // Skip the info string (`json`, `python`, ...).
    let body_start = after.find('\n').map_or(after.len(), |i| i + 1);
    let body = &after[body_start..];
    match body.find("```") {
        Some(close) => &body[..close],
        None => body,
    }
}

fn trim_trailing_comma(out: &mut String) {
    let trimmed_len = out.trim_end().len();
    if out[..trimmed_len].ends_with(',') {
        out.truncate(trimmed_len - 1);
    }
}
